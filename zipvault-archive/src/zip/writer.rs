//! Streaming ZIP writer.
//!
//! Entries are written one at a time: [`ZipWriter::begin_entry`] emits the
//! local header, payload bytes go through [`Write`], [`ZipWriter::end_entry`]
//! closes the entry and [`ZipWriter::finish`] writes the central directory.
//!
//! How sizes and CRC-32 reach the local header depends on the sink:
//!
//! - Any sink: a STORED entry whose size and CRC-32 were declared up front is
//!   written with its real values and checked when it ends.
//! - [`StreamSink`] (non-seekable): every other entry sets flag bit 3 and is
//!   followed by a signed data descriptor. Nothing already written is touched.
//! - [`SeekSink`]: the local header is patched in place once the entry ends,
//!   so no data descriptors are written. ZipCrypto entries are the exception:
//!   their check byte is written before the CRC-32 is known, so they keep the
//!   descriptor layout.
//!
//! A writer dropped or failing before `finish` leaves an archive without a
//! central directory. Such output is unreadable by design of the format and is
//! never repaired.
//!
//! # Example
//!
//! ```rust
//! use std::io::Write;
//! use zipvault_archive::zip::ZipWriter;
//! use zipvault_core::entry::Entry;
//!
//! let mut writer = ZipWriter::new(Vec::new());
//! writer.begin_entry(Entry::file("hello.txt"))?;
//! writer.write_all(b"Hello, World!")?;
//! writer.end_entry()?;
//! writer.add_directory("docs")?;
//! let bytes = writer.into_inner()?;
//! assert!(bytes.starts_with(b"PK\x03\x04"));
//! # Ok::<(), zipvault_core::error::ZipError>(())
//! ```

use std::io::{self, Seek, SeekFrom, Write};
use std::time::SystemTime;

use tracing::{debug, warn};
use zipvault_core::config::{EntryOptions, WriterOptions};
use zipvault_core::entry::{
    CompressionMethod, EncryptionMethod, Entry, EntryKind, FLAG_DATA_DESCRIPTOR, FLAG_ENCRYPTED,
    FLAG_UTF8, truncate_to_seconds,
};
use zipvault_core::error::{Result, ZipError};

use super::aes::{AES_METHOD_MARKER, AesExtraField, AesStrength};
use super::cipher::{self, CipherContext};
use super::crypto;
use super::encode::EntryEncoder;
use super::record::{
    CentralDirectoryHeader, DataDescriptor, DosDateTime, EndOfCentralDirectory, LocalFileHeader,
    MAX_COMMENT_LEN, VERSION_MADE_BY, ZIP64_MARKER_32, mtime_extra, version,
    zip64_extra,
};

/// Default permissions recorded for files without a mode.
const DEFAULT_FILE_MODE: u32 = 0o100_644;
/// Default permissions recorded for directories without a mode.
const DEFAULT_DIR_MODE: u32 = 0o040_755;
/// MS-DOS directory attribute.
const DOS_DIRECTORY: u32 = 0x10;
/// Offset of the CRC-32 field inside a local file header.
const LOCAL_CRC_OFFSET: u64 = 14;

/// Output of a [`ZipWriter`].
pub trait ArchiveSink: Write {
    /// The wrapped writer.
    type Inner;

    /// Whether bytes already written may be overwritten.
    fn can_patch(&self) -> bool;

    /// Overwrite bytes at `offset` from the start of the archive, then return
    /// to the end of the output.
    fn patch(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()>;

    /// Release the wrapped writer.
    fn into_inner(self) -> Self::Inner;
}

/// A sink that is only ever appended to.
#[derive(Debug)]
pub struct StreamSink<W>(W);

impl<W: Write> Write for StreamSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<W: Write> ArchiveSink for StreamSink<W> {
    type Inner = W;

    fn can_patch(&self) -> bool {
        false
    }

    fn patch(&mut self, _offset: u64, _bytes: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "cannot rewrite a streamed archive",
        ))
    }

    fn into_inner(self) -> W {
        self.0
    }
}

/// A sink whose earlier bytes can be rewritten.
///
/// The archive starts at the writer's position when the sink is created.
#[derive(Debug)]
pub struct SeekSink<W> {
    inner: W,
    base: u64,
}

impl<W: Write + Seek> SeekSink<W> {
    /// Start an archive at the current position of `inner`.
    pub fn new(mut inner: W) -> io::Result<Self> {
        let base = inner.stream_position()?;
        Ok(Self { inner, base })
    }
}

impl<W: Write + Seek> Write for SeekSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write + Seek> ArchiveSink for SeekSink<W> {
    type Inner = W;

    fn can_patch(&self) -> bool {
        true
    }

    fn patch(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        let end = self.inner.stream_position()?;
        self.inner.seek(SeekFrom::Start(self.base + offset))?;
        self.inner.write_all(bytes)?;
        self.inner.seek(SeekFrom::Start(end))?;
        Ok(())
    }

    fn into_inner(self) -> W {
        self.inner
    }
}

/// Counts bytes so offsets are known without seeking.
struct Counted<S> {
    inner: S,
    written: u64,
}

impl<S: Write> Write for Counted<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// How the sizes and CRC-32 of the active entry reach the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SizeMode {
    /// Real values written in the local header and checked at the end.
    Declared { size: u64, crc32: u32 },
    /// Flag bit 3 and a trailing data descriptor.
    Descriptor,
    /// Placeholder values patched after the payload.
    Patch,
}

struct ActiveEntry {
    entry: Entry,
    local: LocalFileHeader,
    header_offset: u64,
    mode: SizeMode,
    method: CompressionMethod,
    encryption: EncryptionMethod,
    encoder: EntryEncoder,
}

/// Sequential ZIP archive writer.
pub struct ZipWriter<S: ArchiveSink> {
    sink: Option<Counted<S>>,
    options: WriterOptions,
    directory: Vec<CentralDirectoryHeader>,
    active: Option<ActiveEntry>,
    finished: bool,
}

impl<W: Write> ZipWriter<StreamSink<W>> {
    /// Write to a non-seekable sink with default options.
    pub fn new(writer: W) -> Self {
        Self::with_options(writer, WriterOptions::default())
    }

    /// Write to a non-seekable sink.
    pub fn with_options(writer: W, options: WriterOptions) -> Self {
        Self::from_sink(StreamSink(writer), options)
    }
}

impl<W: Write + Seek> ZipWriter<SeekSink<W>> {
    /// Write to a seekable sink with default options, patching local headers.
    pub fn seekable(writer: W) -> Result<Self> {
        Self::seekable_with_options(writer, WriterOptions::default())
    }

    /// Write to a seekable sink, patching local headers.
    pub fn seekable_with_options(writer: W, options: WriterOptions) -> Result<Self> {
        Ok(Self::from_sink(SeekSink::new(writer)?, options))
    }
}

impl<S: ArchiveSink> ZipWriter<S> {
    /// Write to any archive sink.
    pub fn from_sink(sink: S, options: WriterOptions) -> Self {
        Self {
            sink: Some(Counted {
                inner: sink,
                written: 0,
            }),
            options,
            directory: Vec::new(),
            active: None,
            finished: false,
        }
    }

    /// The options entries default to.
    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    /// Number of entries closed so far.
    pub fn len(&self) -> usize {
        self.directory.len()
    }

    /// Check if no entry has been closed yet.
    pub fn is_empty(&self) -> bool {
        self.directory.is_empty()
    }

    fn sink(&mut self) -> Result<&mut Counted<S>> {
        self.sink
            .as_mut()
            .ok_or_else(|| ZipError::invalid_state("archive writer already released its sink"))
    }

    /// Start an entry with the writer's default options.
    pub fn begin_entry(&mut self, entry: Entry) -> Result<()> {
        let options = self.options.entry_options();
        self.begin_entry_with(entry, options)
    }

    /// Start an entry with explicit compression and encryption settings.
    ///
    /// An entry whose own `encryption` is set overrides the options.
    pub fn begin_entry_with(&mut self, mut entry: Entry, options: EntryOptions) -> Result<()> {
        if self.finished {
            return Err(ZipError::invalid_state("archive already finished"));
        }
        if let Some(active) = &self.active {
            return Err(ZipError::invalid_state(format!(
                "entry {} is still open",
                active.entry.name
            )));
        }
        if entry.name.is_empty() {
            return Err(ZipError::invalid_state("entry name is empty"));
        }

        let is_dir = entry.is_dir();
        if is_dir {
            if !entry.name.ends_with('/') {
                entry.name.push('/');
            }
        } else if entry.name.ends_with('/') {
            return Err(ZipError::invalid_state(format!(
                "file entry {} ends with '/'",
                entry.name
            )));
        }

        let encryption = if is_dir {
            EncryptionMethod::None
        } else if entry.encryption.is_encrypted() {
            entry.encryption
        } else {
            options.effective_encryption()?
        };

        let method = if is_dir || options.compression.deflate_level().is_none() {
            CompressionMethod::Stored
        } else {
            entry.method()
        };
        if !method.is_supported() {
            return Err(ZipError::unsupported(format!("writing {method} entries")));
        }
        let level = options.compression.deflate_level().unwrap_or(0);

        let can_patch = self.sink()?.inner.can_patch();
        let mode = match (is_dir, method, entry.size(), entry.crc32()) {
            (true, ..) => SizeMode::Declared { size: 0, crc32: 0 },
            (false, CompressionMethod::Stored, Some(size), Some(crc32)) => {
                SizeMode::Declared { size, crc32 }
            }
            _ if can_patch && encryption != EncryptionMethod::ZipCrypto => SizeMode::Patch,
            _ => SizeMode::Descriptor,
        };

        entry.modified = truncate_to_seconds(entry.modified);
        let modified = DosDateTime::from_system_time(entry.modified);
        let aes = AesStrength::from_method(encryption)
            .map(|strength| AesExtraField::new(strength, method.to_u16()));

        let mut flags = 0u16;
        if !entry.name.is_ascii() {
            flags |= FLAG_UTF8;
        }
        if encryption.is_encrypted() {
            flags |= FLAG_ENCRYPTED;
        }
        if mode == SizeMode::Descriptor {
            flags |= FLAG_DATA_DESCRIPTOR;
        }

        let check = match mode {
            SizeMode::Declared { crc32, .. } => crypto::check_byte(crc32, modified.time, false),
            _ => crypto::check_byte(0, modified.time, true),
        };
        let password = self.options.password.as_ref().map(|p| p.as_bytes());
        let (cipher, encryption_header) =
            CipherContext::for_write(encryption, password, check, &entry.name)?;

        let overhead = (cipher::header_len(encryption) + cipher::trailer_len(encryption)) as u64;
        let (crc_field, compressed_size, size) = match mode {
            SizeMode::Declared { size, crc32 } => {
                let crc_field = if aes.is_some() { 0 } else { crc32 };
                (crc_field, size + overhead, size)
            }
            _ => (0, 0, 0),
        };

        let zip64 =
            size >= u64::from(ZIP64_MARKER_32) || compressed_size >= u64::from(ZIP64_MARKER_32);
        let mut extra = Vec::new();
        if zip64 {
            extra.extend_from_slice(&zip64_extra(&[size, compressed_size]));
        }
        extra.extend_from_slice(&mtime_extra(entry.modified));
        if let Some(aes) = &aes {
            extra.extend_from_slice(&aes.to_bytes());
        }

        let version_needed = if aes.is_some() {
            version::AES
        } else if zip64 {
            version::ZIP64
        } else if is_dir || method == CompressionMethod::Deflate || encryption.is_encrypted() {
            version::DEFLATE
        } else {
            version::DEFAULT
        };

        let local = LocalFileHeader {
            version_needed,
            flags,
            method: if aes.is_some() {
                AES_METHOD_MARKER
            } else {
                method.to_u16()
            },
            modified,
            crc32: crc_field,
            compressed_size,
            uncompressed_size: size,
            file_name: entry.name.as_bytes().to_vec(),
            extra,
        };

        let mut encoder = EntryEncoder::new(method, level, cipher)?;
        let sink = self.sink()?;
        let header_offset = sink.written;
        local.write(sink)?;
        encoder.write_raw(sink, &encryption_header)?;

        debug!(
            name = %entry.name,
            offset = header_offset,
            method = %method,
            encryption = %encryption,
            ?mode,
            "begin entry"
        );

        entry.flags = flags;
        entry.encryption = encryption;
        entry.header_offset = header_offset;
        self.active = Some(ActiveEntry {
            entry,
            local,
            header_offset,
            mode,
            method,
            encryption,
            encoder,
        });
        Ok(())
    }

    /// Feed payload bytes to the open entry.
    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| ZipError::invalid_state("archive writer already released its sink"))?;
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| ZipError::invalid_state("write outside of an entry"))?;
        if data.is_empty() {
            return Ok(());
        }
        if active.entry.is_dir() {
            return Err(ZipError::invalid_state(format!(
                "directory entry {} cannot carry data",
                active.entry.name
            )));
        }
        active.encoder.write(sink, data)?;
        if !matches!(active.mode, SizeMode::Declared { .. })
            && active.encoder.size() >= u64::from(ZIP64_MARKER_32)
        {
            return Err(ZipError::unsupported(format!(
                "entry {} grew past 4 GiB without a declared size",
                active.entry.name
            )));
        }
        Ok(())
    }

    /// Close the open entry and return its final metadata.
    pub fn end_entry(&mut self) -> Result<Entry> {
        let active = self
            .active
            .take()
            .ok_or_else(|| ZipError::invalid_state("no entry is open"))?;
        let ActiveEntry {
            mut entry,
            local,
            header_offset,
            mode,
            method,
            encryption,
            encoder,
        } = active;

        let sink = self.sink()?;
        let encoded = encoder.finish(sink)?;
        let is_aes = encryption.is_aes();
        let crc_field = if is_aes { 0 } else { encoded.crc32 };
        let oversized = encoded.size >= u64::from(ZIP64_MARKER_32)
            || encoded.compressed_size >= u64::from(ZIP64_MARKER_32);

        match mode {
            SizeMode::Declared { size, crc32 } => {
                if encoded.size != size {
                    return Err(ZipError::size_mismatch(&entry.name, size, encoded.size));
                }
                if encoded.crc32 != crc32 {
                    return Err(ZipError::crc_mismatch(&entry.name, crc32, encoded.crc32));
                }
            }
            SizeMode::Descriptor => {
                if oversized {
                    return Err(ZipError::unsupported(format!(
                        "entry {} grew past 4 GiB without a declared size",
                        entry.name
                    )));
                }
                DataDescriptor {
                    crc32: crc_field,
                    compressed_size: encoded.compressed_size,
                    uncompressed_size: encoded.size,
                }
                .write(sink, false)?;
            }
            SizeMode::Patch => {
                if oversized {
                    return Err(ZipError::unsupported(format!(
                        "entry {} grew past 4 GiB without a declared size",
                        entry.name
                    )));
                }
                let mut fields = [0u8; 12];
                fields[..4].copy_from_slice(&crc_field.to_le_bytes());
                fields[4..8].copy_from_slice(&(encoded.compressed_size as u32).to_le_bytes());
                fields[8..].copy_from_slice(&(encoded.size as u32).to_le_bytes());
                sink.inner.patch(header_offset + LOCAL_CRC_OFFSET, &fields)?;
            }
        }

        let is_dir = entry.is_dir();
        let mode_bits = entry.unix_mode.unwrap_or(if is_dir {
            DEFAULT_DIR_MODE
        } else {
            DEFAULT_FILE_MODE
        });
        let external_attr = (mode_bits << 16) | if is_dir { DOS_DIRECTORY } else { 0 };

        // The central directory builds its own Zip64 record.
        let mut extra = Vec::new();
        extra.extend_from_slice(&mtime_extra(entry.modified));
        if let Some(strength) = AesStrength::from_method(encryption) {
            extra.extend_from_slice(&AesExtraField::new(strength, method.to_u16()).to_bytes());
        }

        self.directory.push(CentralDirectoryHeader {
            version_made_by: VERSION_MADE_BY,
            version_needed: local.version_needed,
            flags: local.flags,
            method: local.method,
            modified: local.modified,
            crc32: crc_field,
            compressed_size: encoded.compressed_size,
            uncompressed_size: encoded.size,
            disk_start: 0,
            internal_attr: 0,
            external_attr,
            local_header_offset: header_offset,
            file_name: local.file_name,
            extra,
            comment: entry
                .comment
                .as_deref()
                .map(|c| c.as_bytes().to_vec())
                .unwrap_or_default(),
        });

        debug!(
            name = %entry.name,
            size = encoded.size,
            compressed_size = encoded.compressed_size,
            crc32 = format_args!("{:08x}", encoded.crc32),
            "end entry"
        );

        entry.kind = if is_dir {
            EntryKind::Directory
        } else {
            EntryKind::File {
                size: Some(encoded.size),
                crc32: Some(encoded.crc32),
                method,
            }
        };
        entry.compressed_size = Some(encoded.compressed_size);
        entry.unix_mode = Some(mode_bits);
        Ok(entry)
    }

    /// Write a whole file entry.
    pub fn add_file(&mut self, name: &str, data: &[u8]) -> Result<Entry> {
        self.begin_entry(Entry::file(name).with_modified(SystemTime::now()))?;
        self.write_data(data)?;
        self.end_entry()
    }

    /// Write a directory entry. The name gets a trailing `/` if missing.
    pub fn add_directory(&mut self, name: &str) -> Result<Entry> {
        self.begin_entry(Entry::directory(name).with_modified(SystemTime::now()))?;
        self.end_entry()
    }

    /// Write the central directory and end records, then flush.
    ///
    /// An entry still open is closed first. The sink is not closed; see
    /// [`Self::into_inner`] and [`Self::close`].
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        if self.active.is_some() {
            self.end_entry()?;
        }

        let comment = self.options.comment.clone().unwrap_or_default().into_bytes();
        if comment.len() > MAX_COMMENT_LEN {
            return Err(ZipError::invalid_config(format!(
                "archive comment is {} bytes, at most {MAX_COMMENT_LEN} fit",
                comment.len()
            )));
        }

        let directory = std::mem::take(&mut self.directory);
        let sink = self.sink()?;
        let cd_offset = sink.written;
        let mut cd_size = 0u64;
        for header in &directory {
            cd_size += header.write(sink)?;
        }
        let eocd = EndOfCentralDirectory {
            disk_number: 0,
            cd_disk: 0,
            entries: directory.len() as u64,
            cd_size,
            cd_offset,
            comment,
        };
        let force_zip64 = directory.iter().any(CentralDirectoryHeader::needs_zip64);
        eocd.write(sink, force_zip64)?;
        sink.flush()?;

        debug!(entries = directory.len(), cd_offset, cd_size, "archive finished");
        self.directory = directory;
        self.finished = true;
        Ok(())
    }

    /// Finish the archive and return the sink.
    pub fn into_inner(mut self) -> Result<S::Inner> {
        self.finish()?;
        let sink = self
            .sink
            .take()
            .ok_or_else(|| ZipError::invalid_state("archive writer already released its sink"))?;
        Ok(sink.inner.into_inner())
    }

    /// Finish the archive and release the sink.
    ///
    /// An owned sink is dropped (closing files); a borrowed `&mut W` simply
    /// returns to the caller.
    pub fn close(self) -> Result<()> {
        self.into_inner().map(drop)
    }
}

impl<S: ArchiveSink> Write for ZipWriter<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_data(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.sink.as_mut() {
            Some(sink) => sink.flush(),
            None => Ok(()),
        }
    }
}

impl<S: ArchiveSink> Drop for ZipWriter<S> {
    fn drop(&mut self) {
        if !self.finished && self.sink.is_some() {
            warn!(
                entries = self.directory.len(),
                "archive writer dropped before finish; the archive is incomplete"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::{Duration, UNIX_EPOCH};
    use zipvault_core::config::CompressionLevel;

    use crate::zip::record::{LOCAL_FILE_HEADER_SIG, le_u16, le_u32};

    #[test]
    fn test_write_outside_entry() {
        let mut writer = ZipWriter::new(Vec::new());
        let err = writer.write_data(b"data").unwrap_err();
        assert!(matches!(err, ZipError::InvalidState { .. }));
        assert!(writer.end_entry().is_err());
    }

    #[test]
    fn test_write_after_finish() {
        let mut writer = ZipWriter::new(Vec::new());
        writer.finish().unwrap();
        assert!(matches!(
            writer.begin_entry(Entry::file("late.txt")),
            Err(ZipError::InvalidState { .. })
        ));
        assert!(writer.write_data(b"x").is_err());
    }

    #[test]
    fn test_nested_begin_rejected() {
        let mut writer = ZipWriter::new(Vec::new());
        writer.begin_entry(Entry::file("a")).unwrap();
        assert!(writer.begin_entry(Entry::file("b")).is_err());
    }

    #[test]
    fn test_file_name_with_slash_rejected() {
        let mut writer = ZipWriter::new(Vec::new());
        assert!(writer.begin_entry(Entry::file("dir/")).is_err());
    }

    #[test]
    fn test_directory_rejects_data() {
        let mut writer = ZipWriter::new(Vec::new());
        writer.begin_entry(Entry::directory("dir")).unwrap();
        assert!(writer.write_data(b"x").is_err());
        let entry = writer.end_entry().unwrap();
        assert_eq!(entry.name, "dir/");
        assert_eq!(entry.size(), Some(0));
    }

    #[test]
    fn test_streaming_uses_descriptor() {
        let mut writer = ZipWriter::new(Vec::new());
        writer.begin_entry(Entry::file("a.txt")).unwrap();
        writer.write_all(b"hello").unwrap();
        let entry = writer.end_entry().unwrap();
        assert!(entry.has_data_descriptor());
        let bytes = writer.into_inner().unwrap();

        assert_eq!(le_u32(&bytes, 0), LOCAL_FILE_HEADER_SIG);
        assert_ne!(le_u16(&bytes, 6) & FLAG_DATA_DESCRIPTOR, 0);
        assert_eq!(le_u32(&bytes, 14), 0);
    }

    #[test]
    fn test_declared_stored_entry_has_real_header() {
        let mut writer = ZipWriter::with_options(
            Vec::new(),
            WriterOptions::new().with_compression(CompressionLevel::Store),
        );
        let entry = Entry::file("a.txt")
            .with_method(CompressionMethod::Stored)
            .with_size(5)
            .with_crc32(crc32fast::hash(b"hello"));
        writer.begin_entry(entry).unwrap();
        writer.write_all(b"hello").unwrap();
        writer.end_entry().unwrap();
        let bytes = writer.into_inner().unwrap();

        assert_eq!(le_u16(&bytes, 6) & FLAG_DATA_DESCRIPTOR, 0);
        assert_eq!(le_u32(&bytes, 14), crc32fast::hash(b"hello"));
        assert_eq!(le_u32(&bytes, 18), 5);
        assert_eq!(le_u32(&bytes, 22), 5);
    }

    #[test]
    fn test_declared_size_checked() {
        let mut writer = ZipWriter::new(Vec::new());
        let entry = Entry::file("a.txt")
            .with_method(CompressionMethod::Stored)
            .with_size(10)
            .with_crc32(0);
        writer.begin_entry(entry).unwrap();
        writer.write_all(b"short").unwrap();
        assert!(matches!(
            writer.end_entry(),
            Err(ZipError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_seekable_patches_header() {
        let mut writer = ZipWriter::seekable(Cursor::new(Vec::new())).unwrap();
        writer.begin_entry(Entry::file("a.txt")).unwrap();
        writer.write_all(b"hello hello hello").unwrap();
        let entry = writer.end_entry().unwrap();
        let bytes = writer.into_inner().unwrap().into_inner();

        assert_eq!(le_u16(&bytes, 6) & FLAG_DATA_DESCRIPTOR, 0);
        assert_eq!(le_u32(&bytes, 14), crc32fast::hash(b"hello hello hello"));
        assert_eq!(u64::from(le_u32(&bytes, 18)), entry.compressed_size.unwrap());
        assert_eq!(le_u32(&bytes, 22), 17);
    }

    #[test]
    fn test_encryption_requires_password() {
        let mut options = WriterOptions::new();
        options.encrypt = true;
        options.encryption = EncryptionMethod::Aes256;
        let mut writer = ZipWriter::with_options(Vec::new(), options);
        assert!(matches!(
            writer.begin_entry(Entry::file("a")),
            Err(ZipError::PasswordRequired { .. })
        ));
    }

    #[test]
    fn test_encrypt_without_method_rejected() {
        let mut options = WriterOptions::new();
        options.encrypt = true;
        let mut writer = ZipWriter::with_options(Vec::new(), options);
        assert!(matches!(
            writer.begin_entry(Entry::file("a")),
            Err(ZipError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_finish_closes_open_entry_and_writes_comment() {
        let mut writer =
            ZipWriter::with_options(Vec::new(), WriterOptions::new().with_comment("note"));
        writer
            .begin_entry(Entry::file("a").with_modified(UNIX_EPOCH + Duration::from_secs(1)))
            .unwrap();
        writer.write_all(b"x").unwrap();
        let bytes = writer.into_inner().unwrap();
        assert!(bytes.ends_with(b"note"));
    }

    #[test]
    fn test_borrowed_sink_stays_with_caller() {
        let mut out = Vec::new();
        {
            let mut writer = ZipWriter::new(&mut out);
            writer.add_file("a.txt", b"abc").unwrap();
            writer.close().unwrap();
        }
        assert!(out.starts_with(b"PK\x03\x04"));
    }
}
