//! Sequential ZIP reader working from local headers only.
//!
//! [`ZipStreamReader`] needs nothing but [`Read`]: it never seeks and never
//! looks at the central directory. Each call to
//! [`ZipStreamReader::next_entry`] finishes the previous entry (verifying it)
//! and parses the next local header.
//!
//! Entries with flag bit 3 carry no sizes in their local header:
//!
//! - DEFLATE payloads end where the compressed stream ends; the data
//!   descriptor is read right after.
//! - STORED payloads are delimited by scanning for a data descriptor whose
//!   compressed size matches the number of bytes seen so far.
//!
//! After a CRC, size or authentication failure the stream stays usable and
//! the next call continues with the following entry. A wrong or missing
//! password skips the entry when its size is known. When it is not, the
//! reader cannot find the next header and reports every later call as
//! invalid state.
//!
//! # Example
//!
//! ```rust
//! use std::io::Read;
//! use zipvault_archive::zip::{ZipStreamReader, ZipWriter};
//!
//! let mut writer = ZipWriter::new(Vec::new());
//! writer.add_file("a.txt", b"hello")?;
//! let bytes = writer.into_inner()?;
//!
//! let mut reader = ZipStreamReader::new(&bytes[..]);
//! let entry = reader.next_entry()?.expect("one entry");
//! assert_eq!(entry.name, "a.txt");
//! let mut data = String::new();
//! reader.read_to_string(&mut data)?;
//! assert_eq!(data, "hello");
//! assert!(reader.next_entry()?.is_none());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::io::{self, Read};

use tracing::{debug, warn};
use zipvault_core::config::{Password, ReaderOptions};
use zipvault_core::entry::{CompressionMethod, Entry, EntryKind};
use zipvault_core::error::{Result, ZipError};

use super::cipher::{self, CipherContext};
use super::crypto;
use super::decode::{DecodeParams, DecodedEntry, EntryDecoder};
use super::input::{DescriptorScanner, InputBuffer, Payload};
use super::record::{
    CENTRAL_DIR_HEADER_SIG, END_OF_CENTRAL_DIR_SIG, ExtraFields, LOCAL_FILE_HEADER_SIG,
    LocalFileHeader, ZIP64_END_OF_CENTRAL_DIR_SIG,
};
use super::{EntryLayout, entry_layout};

enum State<R: Read> {
    /// Positioned at the next local header.
    Idle(InputBuffer<R>),
    /// Inside an entry payload.
    Entry(Box<EntryDecoder<R>>),
    /// The central directory (or the end of input) was reached.
    Done,
    /// The position of the next header is unknown.
    Poisoned,
}

/// Sequential ZIP reader.
pub struct ZipStreamReader<R: Read> {
    state: State<R>,
    options: ReaderOptions,
    current: Option<Entry>,
}

impl<R: Read> ZipStreamReader<R> {
    /// Read an archive without a password.
    pub fn new(reader: R) -> Self {
        Self::with_options(reader, ReaderOptions::default())
    }

    /// Read an archive with explicit options.
    pub fn with_options(reader: R, options: ReaderOptions) -> Self {
        Self {
            state: State::Idle(InputBuffer::new(reader)),
            options,
            current: None,
        }
    }

    /// The entry being read, with sizes filled in once it has been read to
    /// the end.
    pub fn current_entry(&self) -> Option<&Entry> {
        self.current.as_ref()
    }

    /// Advance to the next entry in physical order.
    ///
    /// The previous entry is read to its end and verified first. Returns
    /// `None` when the central directory or the end of input is reached.
    pub fn next_entry(&mut self) -> Result<Option<Entry>> {
        self.finish_entry()?;
        self.current = None;

        let mut input = match std::mem::replace(&mut self.state, State::Poisoned) {
            State::Idle(input) => input,
            State::Done => {
                self.state = State::Done;
                return Ok(None);
            }
            State::Poisoned | State::Entry(_) => {
                return Err(ZipError::invalid_state(
                    "stream reader cannot locate the next entry after an earlier error",
                ));
            }
        };

        let offset = input.position();
        let mut sig = [0u8; 4];
        let n = input
            .read_full(&mut sig)
            .map_err(|e| ZipError::truncated(e, "record signature"))?;
        if n == 0 {
            debug!(offset, "end of input without central directory");
            self.state = State::Done;
            return Ok(None);
        }
        if n < sig.len() {
            return Err(ZipError::malformed("input ends inside a record signature"));
        }
        match u32::from_le_bytes(sig) {
            LOCAL_FILE_HEADER_SIG => {}
            CENTRAL_DIR_HEADER_SIG | END_OF_CENTRAL_DIR_SIG | ZIP64_END_OF_CENTRAL_DIR_SIG => {
                debug!(offset, "reached central directory");
                self.state = State::Done;
                return Ok(None);
            }
            other => {
                return Err(ZipError::invalid_signature(
                    "local file header",
                    LOCAL_FILE_HEADER_SIG,
                    other,
                ));
            }
        }

        let header = LocalFileHeader::read_after_signature(&mut input)?;
        self.open_entry(input, header, offset).map(Some)
    }

    fn open_entry(
        &mut self,
        mut input: InputBuffer<R>,
        header: LocalFileHeader,
        offset: u64,
    ) -> Result<Entry> {
        let name = header.name();
        let extras = ExtraFields::parse(&header.extra)?;
        let EntryLayout {
            method,
            encryption,
            check_crc,
        } = entry_layout(header.method, header.flags, extras.aes.as_ref(), &name)?;
        let deferred = header.has_data_descriptor();
        let zip64 = extras.zip64.is_some();

        let mut entry = entry_from_local(&header, &name, &extras, method, check_crc);
        entry.encryption = encryption;
        entry.header_offset = offset;

        let header_len = cipher::header_len(encryption);
        let trailer_len = cipher::trailer_len(encryption);
        let overhead = (header_len + trailer_len) as u64;
        let payload_len = if deferred {
            None
        } else {
            Some(header.compressed_size.checked_sub(overhead).ok_or_else(|| {
                ZipError::malformed(format!(
                    "compressed size of {name} is smaller than its encryption overhead"
                ))
            })?)
        };

        if !method.is_supported() {
            let err = ZipError::unsupported(format!("compression method {method} of {name}"));
            return self.skip_entry(input, payload_len.map(|len| len + overhead), err);
        }

        let mut encryption_header = vec![0u8; header_len];
        input
            .read_exact(&mut encryption_header)
            .map_err(|e| ZipError::truncated(e, "encryption header"))?;
        let check = crypto::check_byte(header.crc32, header.modified.time, deferred);
        let password = self.options.password.as_ref().map(Password::as_bytes);
        let cipher = match CipherContext::for_read(
            encryption,
            password,
            &encryption_header,
            check,
            &name,
        ) {
            Ok(cipher) => cipher,
            Err(err) if err.is_password_error() => {
                return self.skip_entry(input, payload_len.map(|len| len + trailer_len as u64), err);
            }
            Err(err) => return Err(err),
        };

        let payload = match payload_len {
            Some(len) => Payload::Bounded(input.take(len)),
            None if method == CompressionMethod::Deflate => Payload::Open(input),
            None => Payload::Scan(DescriptorScanner::new(input, header_len, trailer_len, zip64)),
        };
        debug!(
            name = %name,
            offset,
            method = %method,
            encryption = %encryption,
            deferred,
            "open entry"
        );

        let params = DecodeParams {
            name,
            method,
            header_len,
            trailer_len,
            crc32: header.crc32,
            size: (!deferred).then_some(header.uncompressed_size),
            check_crc,
            read_descriptor: deferred,
            zip64,
        };
        let decoder = EntryDecoder::new(payload, cipher, params)?;
        self.state = State::Entry(Box::new(decoder));
        self.current = Some(entry.clone());
        Ok(entry)
    }

    /// Step over an entry that cannot be decoded, then report `err`.
    fn skip_entry(
        &mut self,
        mut input: InputBuffer<R>,
        remaining: Option<u64>,
        err: ZipError,
    ) -> Result<Entry> {
        match remaining {
            Some(len) => {
                input
                    .skip(len)
                    .map_err(|e| ZipError::truncated(e, "entry payload"))?;
                self.state = State::Idle(input);
            }
            None => {
                warn!(error = %err, "entry with deferred sizes cannot be skipped");
            }
        }
        Err(err)
    }

    /// Read the current entry to its end, verify it and return its final
    /// metadata.
    ///
    /// Returns `None` when no entry is open.
    pub fn close_entry(&mut self) -> Result<Option<Entry>> {
        self.finish_entry()?;
        Ok(self.current.clone())
    }

    fn finish_entry(&mut self) -> Result<()> {
        let mut decoder = match std::mem::replace(&mut self.state, State::Poisoned) {
            State::Entry(decoder) => decoder,
            other => {
                self.state = other;
                return Ok(());
            }
        };

        // A payload already read to its end reported its outcome through `read`.
        let result = if decoder.is_finished() {
            Ok(decoder.outcome())
        } else {
            decoder.drain().map(Some)
        };
        let name = decoder.name().to_string();
        if let Some(input) = decoder.into_source() {
            self.state = State::Idle(input);
        }

        match result {
            Ok(outcome) => {
                if let (Some(outcome), Some(entry)) = (outcome, self.current.as_mut()) {
                    apply_outcome(entry, outcome);
                }
                Ok(())
            }
            Err(err) => {
                warn!(name = %name, error = %err, "entry failed verification");
                Err(err)
            }
        }
    }
}

impl<R: Read> Read for ZipStreamReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let State::Entry(decoder) = &mut self.state else {
            return Ok(0);
        };
        let n = decoder.read(buf)?;
        if n == 0 {
            if let (Some(outcome), Some(entry)) = (decoder.outcome(), self.current.as_mut()) {
                apply_outcome(entry, outcome);
            }
        }
        Ok(n)
    }
}

fn entry_from_local(
    header: &LocalFileHeader,
    name: &str,
    extras: &ExtraFields,
    method: CompressionMethod,
    check_crc: bool,
) -> Entry {
    let deferred = header.has_data_descriptor();
    let mut entry = if name.ends_with('/') {
        Entry::directory(name)
    } else {
        Entry::file(name).with_method(method)
    };
    if !deferred {
        entry = entry.with_size(header.uncompressed_size);
        if check_crc {
            entry = entry.with_crc32(header.crc32);
        }
    }
    entry.compressed_size = (!deferred).then_some(header.compressed_size);
    entry.flags = header.flags;
    entry.modified = super::modified_time(extras, header.modified);
    entry
}

fn apply_outcome(entry: &mut Entry, outcome: DecodedEntry) {
    if let EntryKind::File { size, crc32, .. } = &mut entry.kind {
        *size = Some(outcome.size);
        *crc32 = Some(outcome.crc32);
    }
    entry.compressed_size = Some(outcome.compressed_size);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::ZipWriter;
    use zipvault_core::config::WriterOptions;
    use zipvault_core::entry::EncryptionMethod;

    fn archive(options: WriterOptions, files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::with_options(Vec::new(), options);
        for (name, data) in files {
            writer.add_file(name, data).unwrap();
        }
        writer.into_inner().unwrap()
    }

    #[test]
    fn test_empty_archive() {
        let bytes = archive(WriterOptions::new(), &[]);
        let mut reader = ZipStreamReader::new(&bytes[..]);
        assert!(reader.next_entry().unwrap().is_none());
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_empty_input() {
        let mut reader = ZipStreamReader::new(&[][..]);
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_garbage_is_malformed() {
        let mut reader = ZipStreamReader::new(&b"not a zip file"[..]);
        let err = reader.next_entry().unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_skips_unread_payload() {
        let bytes = archive(
            WriterOptions::new(),
            &[("a.txt", b"first"), ("b.txt", b"second")],
        );
        let mut reader = ZipStreamReader::new(&bytes[..]);
        assert_eq!(reader.next_entry().unwrap().unwrap().name, "a.txt");
        let b = reader.next_entry().unwrap().unwrap();
        assert_eq!(b.name, "b.txt");
        let mut data = Vec::new();
        reader.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"second");
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_close_entry_reports_sizes() {
        let bytes = archive(WriterOptions::new(), &[("a.txt", b"hello hello hello")]);
        let mut reader = ZipStreamReader::new(&bytes[..]);
        let opened = reader.next_entry().unwrap().unwrap();
        assert_eq!(opened.size(), None);

        let closed = reader.close_entry().unwrap().unwrap();
        assert_eq!(closed.size(), Some(17));
        assert_eq!(closed.crc32(), Some(crc32fast::hash(b"hello hello hello")));

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());
    }

    #[test]
    fn test_missing_password_skips_entry() {
        let options = WriterOptions::new().with_encryption(EncryptionMethod::Aes128, "pw");
        let mut writer = ZipWriter::with_options(Vec::new(), options);
        writer
            .begin_entry(
                Entry::file("secret.txt")
                    .with_method(CompressionMethod::Stored)
                    .with_size(6)
                    .with_crc32(crc32fast::hash(b"secret")),
            )
            .unwrap();
        std::io::Write::write_all(&mut writer, b"secret").unwrap();
        writer.end_entry().unwrap();
        writer.add_directory("plain").unwrap();
        let bytes = writer.into_inner().unwrap();

        let mut reader = ZipStreamReader::new(&bytes[..]);
        let err = reader.next_entry().unwrap_err();
        assert!(matches!(err, ZipError::PasswordRequired { .. }));
        let next = reader.next_entry().unwrap().unwrap();
        assert_eq!(next.name, "plain/");
        assert!(next.is_dir());
    }

    #[test]
    fn test_deferred_wrong_password_poisons() {
        let bytes = archive(
            WriterOptions::new().with_encryption(EncryptionMethod::Aes256, "right"),
            &[("a.txt", b"payload")],
        );
        let options = ReaderOptions::new().with_password("wrong");
        let mut reader = ZipStreamReader::with_options(&bytes[..], options);
        assert!(matches!(
            reader.next_entry(),
            Err(ZipError::WrongPassword { .. })
        ));
        assert!(matches!(
            reader.next_entry(),
            Err(ZipError::InvalidState { .. })
        ));
    }
}
