//! Archive entry metadata.
//!
//! An [`Entry`] describes one archive member. Whether the member is a directory
//! or a file is carried by [`EntryKind`]; only files have a payload, a CRC-32
//! and a compression method.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Result, ZipError};

/// General purpose flag: the entry is encrypted.
pub const FLAG_ENCRYPTED: u16 = 0x0001;
/// General purpose flag: CRC and sizes follow the payload in a data descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
/// General purpose flag: name and comment are UTF-8.
pub const FLAG_UTF8: u16 = 0x0800;

/// Compression method used for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompressionMethod {
    /// No compression (stored).
    #[default]
    Stored,
    /// DEFLATE compression.
    Deflate,
    /// Bzip2 compression (recognised, not decoded).
    Bzip2,
    /// LZMA compression (recognised, not decoded).
    Lzma,
    /// Unknown method id.
    Unknown(u16),
}

impl CompressionMethod {
    /// Map a ZIP method id to a method.
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::Stored,
            8 => Self::Deflate,
            12 => Self::Bzip2,
            14 => Self::Lzma,
            other => Self::Unknown(other),
        }
    }

    /// The ZIP method id.
    pub fn to_u16(self) -> u16 {
        match self {
            Self::Stored => 0,
            Self::Deflate => 8,
            Self::Bzip2 => 12,
            Self::Lzma => 14,
            Self::Unknown(id) => id,
        }
    }

    /// Whether payloads using this method can be encoded and decoded.
    pub fn is_supported(self) -> bool {
        matches!(self, Self::Stored | Self::Deflate)
    }

    /// Get the method name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stored => "STORED",
            Self::Deflate => "DEFLATED",
            Self::Bzip2 => "BZIP2",
            Self::Lzma => "LZMA",
            Self::Unknown(_) => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(id) => write!(f, "UNKNOWN({})", id),
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// Encryption applied to an entry's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionMethod {
    /// Plain payload.
    #[default]
    None,
    /// PKWARE traditional encryption. Weak, kept for compatibility only.
    ZipCrypto,
    /// WinZip AES with a 128-bit key.
    Aes128,
    /// WinZip AES with a 192-bit key.
    Aes192,
    /// WinZip AES with a 256-bit key.
    Aes256,
}

impl EncryptionMethod {
    /// Whether the payload is encrypted at all.
    pub fn is_encrypted(self) -> bool {
        !matches!(self, Self::None)
    }

    /// Whether this is one of the WinZip AES variants.
    pub fn is_aes(self) -> bool {
        matches!(self, Self::Aes128 | Self::Aes192 | Self::Aes256)
    }

    /// Get the method name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ZipCrypto => "zipcrypto",
            Self::Aes128 => "aes128",
            Self::Aes192 => "aes192",
            Self::Aes256 => "aes256",
        }
    }
}

impl std::fmt::Display for EncryptionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EncryptionMethod {
    type Err = ZipError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "none" | "" => Ok(Self::None),
            "zipcrypto" | "zip_standard" | "pkware" | "standard" => Ok(Self::ZipCrypto),
            "aes128" | "aes_128" => Ok(Self::Aes128),
            "aes192" | "aes_192" => Ok(Self::Aes192),
            "aes" | "aes256" | "aes_256" => Ok(Self::Aes256),
            "zip_standard_variant_strong" => Err(ZipError::unsupported(
                "PKWARE strong encryption is not supported",
            )),
            other => Err(ZipError::invalid_config(format!(
                "unknown encryption method '{other}'"
            ))),
        }
    }
}

/// Directory or file, with the payload properties only a file has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A directory. Never carries payload bytes.
    Directory,
    /// A regular file.
    File {
        /// Uncompressed size, `None` until known.
        size: Option<u64>,
        /// CRC-32 of the uncompressed bytes, `None` until known or when not stored.
        crc32: Option<u32>,
        /// Compression method.
        method: CompressionMethod,
    },
}

/// Archive entry metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The name/path of the entry within the archive. Directories end with `/`.
    pub name: String,
    /// Directory or file.
    pub kind: EntryKind,
    /// Stored payload size including encryption overhead, `None` until known.
    pub compressed_size: Option<u64>,
    /// Last modification time, whole seconds.
    pub modified: SystemTime,
    /// Encryption method.
    pub encryption: EncryptionMethod,
    /// General purpose bit flags as found in (or written to) the local header.
    pub flags: u16,
    /// Per-entry comment.
    pub comment: Option<String>,
    /// Unix permission bits, if recorded.
    pub unix_mode: Option<u32>,
    /// Offset of the local file header from the start of the archive.
    pub header_offset: u64,
}

impl Entry {
    /// Create a file entry whose size and CRC are not known yet.
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File {
                size: None,
                crc32: None,
                method: CompressionMethod::Deflate,
            },
            compressed_size: None,
            modified: UNIX_EPOCH,
            encryption: EncryptionMethod::None,
            flags: 0,
            comment: None,
            unix_mode: None,
            header_offset: 0,
        }
    }

    /// Create a directory entry. The name is normalized to end with `/`.
    pub fn directory(name: impl Into<String>) -> Self {
        let mut name = name.into();
        if !name.ends_with('/') {
            name.push('/');
        }
        Self {
            name,
            kind: EntryKind::Directory,
            compressed_size: Some(0),
            ..Self::file(String::new())
        }
    }

    /// Build an entry from filesystem metadata.
    ///
    /// Directories get a trailing `/`; files carry their size so it can be
    /// reported before the payload is written.
    pub fn from_path(path: impl AsRef<Path>, name: impl Into<String>) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path.as_ref())?;
        let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
        let entry = if metadata.is_dir() {
            Self::directory(name)
        } else {
            Self::file(name).with_size(metadata.len())
        };

        #[cfg(unix)]
        let entry = {
            use std::os::unix::fs::PermissionsExt;
            entry.with_unix_mode(metadata.permissions().mode() & 0o7777)
        };

        Ok(entry.with_modified(modified))
    }

    /// Check if this is a file.
    pub fn is_file(&self) -> bool {
        matches!(self.kind, EntryKind::File { .. })
    }

    /// Check if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory)
    }

    /// Uncompressed size. Directories are always zero.
    pub fn size(&self) -> Option<u64> {
        match self.kind {
            EntryKind::Directory => Some(0),
            EntryKind::File { size, .. } => size,
        }
    }

    /// CRC-32 of the payload. Directories are always zero.
    pub fn crc32(&self) -> Option<u32> {
        match self.kind {
            EntryKind::Directory => Some(0),
            EntryKind::File { crc32, .. } => crc32,
        }
    }

    /// Compression method of the payload.
    pub fn method(&self) -> CompressionMethod {
        match self.kind {
            EntryKind::Directory => CompressionMethod::Stored,
            EntryKind::File { method, .. } => method,
        }
    }

    /// Check if the payload is encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_encrypted()
    }

    /// Check if sizes and CRC were deferred to a data descriptor.
    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    /// Get the compression ratio (compressed/uncompressed).
    pub fn compression_ratio(&self) -> f64 {
        match (self.size(), self.compressed_size) {
            (Some(size), Some(compressed)) if size > 0 => compressed as f64 / size as f64,
            _ => 1.0,
        }
    }

    /// Get the space savings as a percentage.
    pub fn space_savings(&self) -> f64 {
        (1.0 - self.compression_ratio()) * 100.0
    }

    /// Builder method to declare the uncompressed size up front.
    pub fn with_size(mut self, value: u64) -> Self {
        if let EntryKind::File { size, .. } = &mut self.kind {
            *size = Some(value);
        }
        self
    }

    /// Builder method to declare the CRC-32 up front.
    pub fn with_crc32(mut self, value: u32) -> Self {
        if let EntryKind::File { crc32, .. } = &mut self.kind {
            *crc32 = Some(value);
        }
        self
    }

    /// Builder method to set compression method.
    pub fn with_method(mut self, value: CompressionMethod) -> Self {
        if let EntryKind::File { method, .. } = &mut self.kind {
            *method = value;
        }
        self
    }

    /// Builder method to set modification time. Sub-second precision is dropped.
    pub fn with_modified(mut self, time: SystemTime) -> Self {
        self.modified = truncate_to_seconds(time);
        self
    }

    /// Builder method to set the encryption method.
    pub fn with_encryption(mut self, encryption: EncryptionMethod) -> Self {
        self.encryption = encryption;
        self
    }

    /// Builder method to set Unix permission bits.
    pub fn with_unix_mode(mut self, mode: u32) -> Self {
        self.unix_mode = Some(mode);
        self
    }

    /// Builder method to set comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Validate the entry path for security.
    ///
    /// Returns an error if the path contains potentially dangerous components
    /// like ".." (parent directory traversal) or absolute paths.
    pub fn validate_path(&self) -> Result<()> {
        let path = Path::new(&self.name);

        if path.is_absolute() || self.name.starts_with('/') || self.name.starts_with('\\') {
            return Err(ZipError::unsafe_path(&self.name));
        }

        for component in path.components() {
            match component {
                Component::ParentDir | Component::Prefix(_) | Component::RootDir => {
                    return Err(ZipError::unsafe_path(&self.name));
                }
                Component::Normal(s) => {
                    if s.to_string_lossy().contains('\0') {
                        return Err(ZipError::unsafe_path(&self.name));
                    }
                }
                Component::CurDir => {}
            }
        }

        Ok(())
    }

    /// Get a sanitized path that's safe for extraction.
    ///
    /// This removes dangerous components like ".." and converts absolute
    /// paths to relative ones.
    pub fn sanitized_name(&self) -> String {
        let mut result = String::new();

        for component in Path::new(&self.name).components() {
            if let Component::Normal(s) = component {
                if !result.is_empty() {
                    result.push('/');
                }
                result.push_str(&s.to_string_lossy().replace('\0', "_"));
            }
        }

        result
    }
}

/// Drop the sub-second part of a timestamp.
pub fn truncate_to_seconds(time: SystemTime) -> SystemTime {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => UNIX_EPOCH + Duration::from_secs(after.as_secs()),
        Err(before) => {
            let before = before.duration();
            let secs = before.as_secs() + u64::from(before.subsec_nanos() > 0);
            UNIX_EPOCH - Duration::from_secs(secs)
        }
    }
}

impl std::fmt::Display for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let type_char = if self.is_dir() { 'd' } else { '-' };
        let lock = if self.is_encrypted() { '*' } else { ' ' };
        let size = self.size().map_or_else(|| "?".to_string(), |s| s.to_string());
        let compressed = self
            .compressed_size
            .map_or_else(|| "?".to_string(), |s| s.to_string());
        write!(
            f,
            "{}{}{:>10} {:>10} {:>6.1}% {}",
            type_char,
            lock,
            size,
            compressed,
            self.space_savings(),
            self.name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_file() {
        let entry = Entry::file("test.txt")
            .with_size(1000)
            .with_method(CompressionMethod::Deflate);
        let entry = Entry {
            compressed_size: Some(500),
            ..entry
        };

        assert!(entry.is_file());
        assert!(!entry.is_dir());
        assert_eq!(entry.size(), Some(1000));
        assert_eq!(entry.crc32(), None);
        assert_eq!(entry.compression_ratio(), 0.5);
        assert_eq!(entry.space_savings(), 50.0);
    }

    #[test]
    fn test_entry_directory_normalized() {
        let entry = Entry::directory("subdir");
        assert!(entry.is_dir());
        assert_eq!(entry.name, "subdir/");
        assert_eq!(entry.size(), Some(0));
        assert_eq!(entry.crc32(), Some(0));

        let entry = Entry::directory("already/");
        assert_eq!(entry.name, "already/");
    }

    #[test]
    fn test_directory_ignores_payload_builders() {
        let entry = Entry::directory("d").with_size(42).with_crc32(7);
        assert_eq!(entry.size(), Some(0));
        assert_eq!(entry.crc32(), Some(0));
    }

    #[test]
    fn test_validate_path() {
        assert!(Entry::file("subdir/file.txt").validate_path().is_ok());
        assert!(Entry::file("../etc/passwd").validate_path().is_err());
        assert!(Entry::file("subdir/../../etc/passwd").validate_path().is_err());
        assert!(Entry::file("/etc/passwd").validate_path().is_err());
    }

    #[test]
    fn test_sanitized_name() {
        let entry = Entry::file("../etc/passwd");
        assert_eq!(entry.sanitized_name(), "etc/passwd");

        let entry = Entry::file("/absolute/path/file.txt");
        assert_eq!(entry.sanitized_name(), "absolute/path/file.txt");
    }

    #[test]
    fn test_method_ids() {
        assert_eq!(CompressionMethod::from_u16(8), CompressionMethod::Deflate);
        assert_eq!(CompressionMethod::Deflate.to_u16(), 8);
        assert_eq!(CompressionMethod::from_u16(77), CompressionMethod::Unknown(77));
        assert!(!CompressionMethod::Bzip2.is_supported());
        assert_eq!(CompressionMethod::Stored.to_string(), "STORED");
        assert_eq!(CompressionMethod::Deflate.to_string(), "DEFLATED");
    }

    #[test]
    fn test_encryption_method_parse() {
        assert_eq!("AES".parse::<EncryptionMethod>().ok(), Some(EncryptionMethod::Aes256));
        assert_eq!(
            "ZIP_STANDARD".parse::<EncryptionMethod>().ok(),
            Some(EncryptionMethod::ZipCrypto)
        );
        assert_eq!("aes-128".parse::<EncryptionMethod>().ok(), Some(EncryptionMethod::Aes128));
        assert!("rot13".parse::<EncryptionMethod>().is_err());
        assert!(matches!(
            "ZIP_STANDARD_VARIANT_STRONG".parse::<EncryptionMethod>(),
            Err(ZipError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_modified_truncated() {
        let time = UNIX_EPOCH + Duration::from_millis(1_700_000_000_750);
        let entry = Entry::file("t").with_modified(time);
        assert_eq!(entry.modified, UNIX_EPOCH + Duration::from_secs(1_700_000_000));
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.bin");
        std::fs::write(&file, b"12345").unwrap();

        let entry = Entry::from_path(&file, "data.bin").unwrap();
        assert!(entry.is_file());
        assert_eq!(entry.size(), Some(5));

        let entry = Entry::from_path(dir.path(), "root").unwrap();
        assert!(entry.is_dir());
        assert_eq!(entry.name, "root/");
    }
}
