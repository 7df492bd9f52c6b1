//! Error types for zipvault operations.
//!
//! Every failure the codec can report has its own variant so callers can react
//! to it without inspecting message text. The variants fall into a few families:
//!
//! - structural problems with the archive ([`ZipError::MalformedArchive`])
//! - integrity failures of a single entry ([`ZipError::CrcMismatch`],
//!   [`ZipError::SizeMismatch`], [`ZipError::AuthenticationFailed`])
//! - password problems ([`ZipError::PasswordRequired`], [`ZipError::WrongPassword`])
//! - lookups and API misuse ([`ZipError::EntryNotFound`], [`ZipError::InvalidState`])
//!
//! Decode and encode streams implement [`std::io::Read`] and [`std::io::Write`],
//! so a `ZipError` raised inside them travels as the payload of an
//! [`io::Error`]. The [`From<io::Error>`] conversion unwraps that payload again,
//! which means `?` on a stream read gives back the original variant.

use std::io;
use thiserror::Error;

/// The main error type for zipvault operations.
#[derive(Debug, Error)]
pub enum ZipError {
    /// I/O error from the underlying source or sink.
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),

    /// Structurally invalid records, bad signatures or inconsistent offsets.
    #[error("Malformed archive: {message}")]
    MalformedArchive {
        /// Description of the structural problem.
        message: String,
    },

    /// The CRC-32 of the decoded bytes differs from the stored value.
    #[error("CRC mismatch in {name}: expected {expected:#010x}, computed {computed:#010x}")]
    CrcMismatch {
        /// Entry name.
        name: String,
        /// CRC-32 recorded in the archive.
        expected: u32,
        /// CRC-32 computed over the decoded bytes.
        computed: u32,
    },

    /// The number of decoded bytes differs from the stored size.
    #[error("Size mismatch in {name}: expected {expected} bytes, decoded {actual}")]
    SizeMismatch {
        /// Entry name.
        name: String,
        /// Size recorded in the archive.
        expected: u64,
        /// Number of bytes actually decoded.
        actual: u64,
    },

    /// The WinZip AES authentication code did not verify.
    #[error("Authentication code mismatch in {name}")]
    AuthenticationFailed {
        /// Entry name.
        name: String,
    },

    /// The entry is encrypted and no password was supplied.
    #[error("Password required for encrypted entry {name}")]
    PasswordRequired {
        /// Entry name.
        name: String,
    },

    /// The supplied password does not match the entry's verification value.
    #[error("Wrong password for entry {name}")]
    WrongPassword {
        /// Entry name.
        name: String,
    },

    /// Entry not found in archive.
    #[error("Entry not found: {name}")]
    EntryNotFound {
        /// Name of the missing entry.
        name: String,
    },

    /// An entry path escapes the extraction root.
    #[error("Unsafe entry path: {path}")]
    UnsafePath {
        /// The offending path.
        path: String,
    },

    /// API misuse, such as writing outside of an entry.
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Description of the misuse.
        message: String,
    },

    /// A feature of the archive is recognised but not supported.
    #[error("Unsupported: {message}")]
    Unsupported {
        /// Description of the unsupported feature.
        message: String,
    },

    /// A configuration value could not be parsed or is contradictory.
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration problem.
        message: String,
    },
}

/// Result type alias for zipvault operations.
pub type Result<T> = std::result::Result<T, ZipError>;

impl ZipError {
    /// Create a malformed archive error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedArchive {
            message: message.into(),
        }
    }

    /// Create a malformed archive error for an unexpected record signature.
    pub fn invalid_signature(record: &str, expected: u32, found: u32) -> Self {
        Self::malformed(format!(
            "bad {record} signature: expected {expected:#010x}, found {found:#010x}"
        ))
    }

    /// Map a failed fixed-size read to [`ZipError::MalformedArchive`] when the
    /// data simply ran out.
    pub fn truncated(err: io::Error, record: &str) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::malformed(format!("truncated {record}"))
        } else {
            Self::from(err)
        }
    }

    /// Create a CRC mismatch error.
    pub fn crc_mismatch(name: impl Into<String>, expected: u32, computed: u32) -> Self {
        Self::CrcMismatch {
            name: name.into(),
            expected,
            computed,
        }
    }

    /// Create a size mismatch error.
    pub fn size_mismatch(name: impl Into<String>, expected: u64, actual: u64) -> Self {
        Self::SizeMismatch {
            name: name.into(),
            expected,
            actual,
        }
    }

    /// Create an authentication failure error.
    pub fn authentication_failed(name: impl Into<String>) -> Self {
        Self::AuthenticationFailed { name: name.into() }
    }

    /// Create a password required error.
    pub fn password_required(name: impl Into<String>) -> Self {
        Self::PasswordRequired { name: name.into() }
    }

    /// Create a wrong password error.
    pub fn wrong_password(name: impl Into<String>) -> Self {
        Self::WrongPassword { name: name.into() }
    }

    /// Create an entry not found error.
    pub fn entry_not_found(name: impl Into<String>) -> Self {
        Self::EntryNotFound { name: name.into() }
    }

    /// Create an unsafe path error.
    pub fn unsafe_path(path: impl Into<String>) -> Self {
        Self::UnsafePath { path: path.into() }
    }

    /// Create an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create an unsupported feature error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Whether this is a CRC, size or authentication failure of an entry.
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            Self::CrcMismatch { .. } | Self::SizeMismatch { .. } | Self::AuthenticationFailed { .. }
        )
    }

    /// Whether the caller could retry with a (different) password.
    pub fn is_password_error(&self) -> bool {
        matches!(self, Self::PasswordRequired { .. } | Self::WrongPassword { .. })
    }

    /// Whether the archive itself is structurally broken.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedArchive { .. })
    }
}

impl From<io::Error> for ZipError {
    fn from(err: io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<ZipError>()) {
            if let Some(inner) = err.into_inner() {
                if let Ok(zip_err) = inner.downcast::<ZipError>() {
                    return *zip_err;
                }
            }
            return Self::invalid_state("lost error payload while unwrapping I/O error");
        }
        Self::Io(err)
    }
}

impl From<ZipError> for io::Error {
    fn from(err: ZipError) -> Self {
        match err {
            ZipError::Io(inner) => inner,
            other => {
                let kind = if other.is_integrity_error() || other.is_malformed() {
                    io::ErrorKind::InvalidData
                } else if other.is_password_error() {
                    io::ErrorKind::PermissionDenied
                } else if matches!(other, ZipError::EntryNotFound { .. }) {
                    io::ErrorKind::NotFound
                } else {
                    io::ErrorKind::Other
                };
                io::Error::new(kind, other)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ZipError::crc_mismatch("a.txt", 0x12345678, 0xABCDEF00);
        assert_eq!(
            err.to_string(),
            "CRC mismatch in a.txt: expected 0x12345678, computed 0xabcdef00"
        );

        let err = ZipError::password_required("secret.bin");
        assert_eq!(
            err.to_string(),
            "Password required for encrypted entry secret.bin"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: ZipError = io_err.into();
        assert!(matches!(err, ZipError::Io(_)));
    }

    #[test]
    fn test_round_trip_through_io_error() {
        let io_err: io::Error = ZipError::wrong_password("x").into();
        assert_eq!(io_err.kind(), io::ErrorKind::PermissionDenied);

        let back: ZipError = io_err.into();
        assert!(matches!(back, ZipError::WrongPassword { ref name } if name == "x"));
    }

    #[test]
    fn test_integrity_family() {
        assert!(ZipError::authentication_failed("a").is_integrity_error());
        assert!(ZipError::size_mismatch("a", 1, 2).is_integrity_error());
        assert!(!ZipError::wrong_password("a").is_integrity_error());
        assert!(ZipError::wrong_password("a").is_password_error());
        assert!(ZipError::password_required("a").is_password_error());
    }

    #[test]
    fn test_truncated_maps_eof() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(ZipError::truncated(eof, "local file header").is_malformed());

        let other = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        assert!(matches!(
            ZipError::truncated(other, "local file header"),
            ZipError::Io(_)
        ));
    }
}
