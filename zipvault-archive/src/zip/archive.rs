//! Random-access ZIP reader.
//!
//! [`ZipArchive`] parses the central directory once and then extracts any
//! entry on demand. All reads go through [`ReadAt`], so every
//! [`ZipFileReader`] owns its own position and extractions from one archive
//! can run on several threads at once.
//!
//! # Example
//!
//! ```rust
//! use std::io::Read;
//! use zipvault_archive::zip::{ZipArchive, ZipWriter};
//! use zipvault_core::config::ReaderOptions;
//!
//! let mut writer = ZipWriter::new(Vec::new());
//! writer.add_file("a.txt", b"hello")?;
//! writer.add_file("b.txt", b"world")?;
//! let bytes = writer.into_inner()?;
//!
//! let archive = ZipArchive::open(bytes, ReaderOptions::default())?;
//! assert_eq!(archive.len(), 2);
//! let mut text = String::new();
//! archive.extract("b.txt")?.read_to_string(&mut text)?;
//! assert_eq!(text, "world");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::HashMap;
use std::io::{self, BufReader, Read};

use tracing::{debug, trace};
use zipvault_core::config::{Password, ReaderOptions};
use zipvault_core::entry::{Entry, EntryKind, FLAG_ENCRYPTED};
use zipvault_core::error::{Result, ZipError};
use zipvault_core::source::{ReadAt, ReadAtCursor};

use super::aes::AesExtraField;
use super::cipher::{self, CipherContext};
use super::crypto;
use super::decode::{DecodeParams, DecodedEntry, EntryDecoder};
use super::input::{InputBuffer, Payload};
use super::record::{
    CENTRAL_DIR_HEADER_LEN, CentralDirectoryHeader, EndOfCentralDirectory, ExtraFields,
    LOCAL_FILE_HEADER_LEN, LocalFileHeader, decode_text,
};
use super::{EntryLayout, entry_layout, modified_time};

/// Host system "Unix" in the upper byte of version made by.
const HOST_UNIX: u16 = 3;

/// Values from the central directory the payload is checked against.
#[derive(Debug, Clone, Copy)]
struct Expected {
    crc32: u32,
    check_crc: bool,
    method: u16,
    encrypted: bool,
    aes: Option<AesExtraField>,
}

/// A ZIP archive opened through its central directory.
#[derive(Debug)]
pub struct ZipArchive<S> {
    source: S,
    options: ReaderOptions,
    entries: Vec<Entry>,
    expected: Vec<Expected>,
    index: HashMap<String, usize>,
    comment: String,
    cd_offset: u64,
}

impl<S: ReadAt> ZipArchive<S> {
    /// Parse the central directory of `source`.
    ///
    /// # Errors
    ///
    /// [`ZipError::MalformedArchive`] when the end of central directory
    /// record is missing or the directory does not fit the source.
    pub fn open(source: S, options: ReaderOptions) -> Result<Self> {
        let (eocd, end) = EndOfCentralDirectory::locate(&source)?;
        debug!(
            entries = eocd.entries,
            cd_offset = eocd.cd_offset,
            cd_size = eocd.cd_size,
            eocd_offset = end.eocd_offset,
            "located central directory"
        );

        let cd_end = eocd
            .cd_offset
            .checked_add(eocd.cd_size)
            .ok_or_else(|| ZipError::malformed("central directory offset overflows"))?;
        if cd_end > end.records_offset {
            return Err(ZipError::malformed(format!(
                "central directory ends at {cd_end}, past the end records at {}",
                end.records_offset
            )));
        }
        if eocd.entries.saturating_mul(CENTRAL_DIR_HEADER_LEN as u64) > eocd.cd_size {
            return Err(ZipError::malformed(format!(
                "{} entries cannot fit a central directory of {} bytes",
                eocd.entries, eocd.cd_size
            )));
        }

        let count = eocd.entries as usize;
        let mut entries = Vec::with_capacity(count);
        let mut expected = Vec::with_capacity(count);
        let mut index = HashMap::with_capacity(count);
        let mut reader = BufReader::new(ReadAtCursor::new(&source, eocd.cd_offset, eocd.cd_size));
        for position in 0..count {
            let header = CentralDirectoryHeader::read(&mut reader)?;
            if header
                .local_header_offset
                .saturating_add(LOCAL_FILE_HEADER_LEN as u64)
                > eocd.cd_offset
            {
                return Err(ZipError::malformed(format!(
                    "local header of {} at {} lies outside the entry area",
                    header.name(),
                    header.local_header_offset
                )));
            }
            let (entry, check) = entry_from_central(&header)?;
            trace!(name = %entry.name, offset = entry.header_offset, "central directory entry");
            index.entry(entry.name.clone()).or_insert(position);
            entries.push(entry);
            expected.push(check);
        }

        Ok(Self {
            source,
            options,
            entries,
            expected,
            index,
            comment: decode_text(&eocd.comment),
            cd_offset: eocd.cd_offset,
        })
    }

    /// Entries in central directory order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the archive has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The archive comment.
    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Look up an entry. With duplicate names the first one wins.
    pub fn by_name(&self, name: &str) -> Option<&Entry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// The underlying source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Open a decode stream for `name` with the archive's password.
    pub fn extract(&self, name: &str) -> Result<ZipFileReader<'_, S>> {
        let password = self.options.password.as_ref().map(Password::as_bytes);
        self.extract_with_password(name, password)
    }

    /// Open a decode stream for `name` with an explicit password.
    pub fn extract_with_password(
        &self,
        name: &str,
        password: Option<&[u8]>,
    ) -> Result<ZipFileReader<'_, S>> {
        let index = *self
            .index
            .get(name)
            .ok_or_else(|| ZipError::entry_not_found(name))?;
        self.extract_index(index, password)
    }

    /// Open a decode stream for the entry at `index` in directory order.
    pub fn extract_index(
        &self,
        index: usize,
        password: Option<&[u8]>,
    ) -> Result<ZipFileReader<'_, S>> {
        let entry = self
            .entries
            .get(index)
            .ok_or_else(|| ZipError::entry_not_found(format!("#{index}")))?;
        let expected = self.expected[index];
        let offset = entry.header_offset;

        let mut cursor = ReadAtCursor::new(&self.source, offset, self.cd_offset - offset);
        let local = LocalFileHeader::read(&mut cursor)?;
        let local_name = local.name();
        if local_name != entry.name {
            return Err(ZipError::malformed(format!(
                "local header name {local_name} does not match central directory name {}",
                entry.name
            )));
        }
        check_local_layout(&local, &expected, &entry.name)?;

        let compressed_size = entry.compressed_size.unwrap_or(0);
        let data_start = offset + local.encoded_len();
        if data_start.saturating_add(compressed_size) > self.cd_offset {
            return Err(ZipError::malformed(format!(
                "payload of {} runs into the central directory",
                entry.name
            )));
        }

        let encryption = entry.encryption;
        let header_len = cipher::header_len(encryption);
        let trailer_len = cipher::trailer_len(encryption);
        let payload_len = compressed_size
            .checked_sub((header_len + trailer_len) as u64)
            .ok_or_else(|| {
                ZipError::malformed(format!(
                    "compressed size of {} is smaller than its encryption overhead",
                    entry.name
                ))
            })?;

        let mut input = InputBuffer::new(ReadAtCursor::new(
            &self.source,
            data_start,
            compressed_size,
        ));
        let mut encryption_header = vec![0u8; header_len];
        input
            .read_exact(&mut encryption_header)
            .map_err(|e| ZipError::truncated(e, "encryption header"))?;
        let check = crypto::check_byte(
            expected.crc32,
            local.modified.time,
            local.has_data_descriptor(),
        );
        let cipher =
            CipherContext::for_read(encryption, password, &encryption_header, check, &entry.name)?;

        debug!(name = %entry.name, offset, data_start, "extract entry");
        let params = DecodeParams {
            name: entry.name.clone(),
            method: entry.method(),
            header_len,
            trailer_len,
            crc32: expected.crc32,
            size: entry.size(),
            check_crc: expected.check_crc,
            read_descriptor: false,
            zip64: false,
        };
        let decoder = EntryDecoder::new(Payload::Bounded(input.take(payload_len)), cipher, params)?;
        Ok(ZipFileReader { entry, decoder })
    }

    /// Extract an entry into memory.
    pub fn read_to_vec(&self, name: &str) -> Result<Vec<u8>> {
        let mut reader = self.extract(name)?;
        let capacity = reader.entry().size().unwrap_or(0).min(1 << 24) as usize;
        let mut data = Vec::with_capacity(capacity);
        reader.read_to_end(&mut data)?;
        Ok(data)
    }
}

/// Decode stream of one entry of a [`ZipArchive`].
///
/// Verification (size, CRC-32, AES authentication code) runs when the
/// payload is read to its end; the failing `read` call reports it.
pub struct ZipFileReader<'a, S: ReadAt> {
    entry: &'a Entry,
    decoder: EntryDecoder<ReadAtCursor<&'a S>>,
}

impl<'a, S: ReadAt> ZipFileReader<'a, S> {
    /// The entry being read.
    pub fn entry(&self) -> &'a Entry {
        self.entry
    }

    /// Read the rest of the payload and run all checks.
    pub fn verify(mut self) -> Result<DecodedEntry> {
        self.decoder.drain()
    }
}

impl<S: ReadAt> Read for ZipFileReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.decoder.read(buf)
    }
}

/// The local header must describe the payload the same way as the central
/// directory: compression method field, encryption bit and AES parameters.
fn check_local_layout(local: &LocalFileHeader, expected: &Expected, name: &str) -> Result<()> {
    if local.method != expected.method {
        return Err(ZipError::malformed(format!(
            "local header of {name} has method {} but the central directory says {}",
            local.method, expected.method
        )));
    }
    if (local.flags & FLAG_ENCRYPTED != 0) != expected.encrypted {
        return Err(ZipError::malformed(format!(
            "encryption flag of {name} differs between local header and central directory"
        )));
    }
    if expected.aes.is_some() {
        let local_aes = ExtraFields::parse(&local.extra)?.aes;
        if local_aes.map(|aes| (aes.strength, aes.compression_method))
            != expected.aes.map(|aes| (aes.strength, aes.compression_method))
        {
            return Err(ZipError::malformed(format!(
                "AES parameters of {name} differ between local header and central directory"
            )));
        }
    }
    Ok(())
}

fn entry_from_central(header: &CentralDirectoryHeader) -> Result<(Entry, Expected)> {
    let name = header.name();
    let extras = ExtraFields::parse(&header.extra)?;
    let EntryLayout {
        method,
        encryption,
        check_crc,
    } = entry_layout(header.method, header.flags, extras.aes.as_ref(), &name)?;

    let mut entry = if name.ends_with('/') {
        Entry::directory(name)
    } else {
        Entry {
            kind: EntryKind::File {
                size: Some(header.uncompressed_size),
                crc32: check_crc.then_some(header.crc32),
                method,
            },
            ..Entry::file(name)
        }
    };
    entry.compressed_size = Some(header.compressed_size);
    entry.modified = modified_time(&extras, header.modified);
    entry.encryption = encryption;
    entry.flags = header.flags;
    entry.header_offset = header.local_header_offset;
    if !header.comment.is_empty() {
        entry.comment = Some(decode_text(&header.comment));
    }
    let mode = header.external_attr >> 16;
    if header.version_made_by >> 8 == HOST_UNIX && mode != 0 {
        entry.unix_mode = Some(mode);
    }

    Ok((
        entry,
        Expected {
            crc32: header.crc32,
            check_crc,
            method: header.method,
            encrypted: header.flags & FLAG_ENCRYPTED != 0,
            aes: extras.aes,
        },
    ))
}
