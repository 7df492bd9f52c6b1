//! ZIP archive format support.
//!
//! This module provides reading and writing of ZIP archives as specified
//! in the PKWARE APPNOTE:
//!
//! - [`ZipStreamReader`]: sequential reading from any [`std::io::Read`]
//! - [`ZipArchive`]: random access through the central directory over a
//!   positioned-read source, safe for concurrent extraction
//! - [`ZipWriter`]: sequential writing to streamed or seekable sinks
//!
//! Payloads may be STORED or DEFLATE compressed, and encrypted with
//! ZipCrypto or WinZip AES (128/192/256). Zip64 sizes and offsets are read
//! and written.

pub mod aes;
mod archive;
mod cipher;
pub mod crypto;
mod decode;
mod encode;
mod input;
pub mod record;
mod stream;
mod writer;

pub use archive::{ZipArchive, ZipFileReader};
pub use decode::DecodedEntry;
pub use stream::ZipStreamReader;
pub use writer::{ArchiveSink, SeekSink, StreamSink, ZipWriter};

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::SystemTime;

use zipvault_core::config::{ReaderOptions, WriterOptions};
use zipvault_core::entry::{CompressionMethod, EncryptionMethod, FLAG_ENCRYPTED};
use zipvault_core::error::{Result, ZipError};

use self::aes::{AES_METHOD_MARKER, AesExtraField, AesVendorVersion};
use self::record::{DosDateTime, ExtraFields, from_unix_seconds};

/// General purpose flag: PKWARE strong encryption.
const FLAG_STRONG_ENCRYPTION: u16 = 0x0040;

/// Open a ZIP file for random access.
pub fn open_zip<P: AsRef<Path>>(path: P, options: ReaderOptions) -> Result<ZipArchive<File>> {
    ZipArchive::open(File::open(path.as_ref())?, options)
}

/// Create a new ZIP archive writer on a non-seekable sink.
pub fn write_zip<W: Write>(writer: W, options: WriterOptions) -> ZipWriter<StreamSink<W>> {
    ZipWriter::with_options(writer, options)
}

/// How an entry's payload is encoded, as declared by its headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryLayout {
    /// Compression method applied before encryption.
    pub method: CompressionMethod,
    pub encryption: EncryptionMethod,
    /// False for AE-2 entries, whose CRC field is zero.
    pub check_crc: bool,
}

/// Resolve the real compression and encryption of an entry.
pub(crate) fn entry_layout(
    raw_method: u16,
    flags: u16,
    aes: Option<&AesExtraField>,
    name: &str,
) -> Result<EntryLayout> {
    if raw_method == AES_METHOD_MARKER {
        let aes = aes.ok_or_else(|| {
            ZipError::malformed(format!("{name} is AES encrypted but has no AES extra field"))
        })?;
        return Ok(EntryLayout {
            method: CompressionMethod::from_u16(aes.compression_method),
            encryption: aes.strength.method(),
            check_crc: aes.version == AesVendorVersion::Ae1,
        });
    }

    let encryption = if flags & FLAG_ENCRYPTED == 0 {
        EncryptionMethod::None
    } else if flags & FLAG_STRONG_ENCRYPTION != 0 {
        return Err(ZipError::unsupported(format!(
            "PKWARE strong encryption of {name}"
        )));
    } else {
        EncryptionMethod::ZipCrypto
    };
    Ok(EntryLayout {
        method: CompressionMethod::from_u16(raw_method),
        encryption,
        check_crc: true,
    })
}

/// Modification time, preferring the extended timestamp over DOS fields.
pub(crate) fn modified_time(extras: &ExtraFields, dos: DosDateTime) -> SystemTime {
    extras
        .mtime
        .map_or_else(|| dos.to_system_time(), from_unix_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::aes::AesStrength;

    #[test]
    fn test_layout_plain() {
        let layout = entry_layout(8, 0, None, "a").unwrap();
        assert_eq!(layout.method, CompressionMethod::Deflate);
        assert_eq!(layout.encryption, EncryptionMethod::None);
        assert!(layout.check_crc);
    }

    #[test]
    fn test_layout_zipcrypto() {
        let layout = entry_layout(0, FLAG_ENCRYPTED, None, "a").unwrap();
        assert_eq!(layout.encryption, EncryptionMethod::ZipCrypto);
        assert!(matches!(
            entry_layout(0, FLAG_ENCRYPTED | FLAG_STRONG_ENCRYPTION, None, "a"),
            Err(ZipError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_layout_aes() {
        let field = AesExtraField::new(AesStrength::Aes192, 8);
        let layout = entry_layout(AES_METHOD_MARKER, FLAG_ENCRYPTED, Some(&field), "a").unwrap();
        assert_eq!(layout.method, CompressionMethod::Deflate);
        assert_eq!(layout.encryption, EncryptionMethod::Aes192);
        assert!(!layout.check_crc);

        let err = entry_layout(AES_METHOD_MARKER, FLAG_ENCRYPTED, None, "a").unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_extended_timestamp_preferred() {
        let extras = ExtraFields {
            mtime: Some(1_000_000_001),
            ..ExtraFields::default()
        };
        assert_eq!(
            modified_time(&extras, DosDateTime::MIN),
            from_unix_seconds(1_000_000_001)
        );
        assert_eq!(
            modified_time(&ExtraFields::default(), DosDateTime::MIN),
            DosDateTime::MIN.to_system_time()
        );
    }
}
