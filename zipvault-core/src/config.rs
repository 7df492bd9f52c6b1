//! Reader and writer configuration.
//!
//! All settings are plain values handed to a reader or writer when it is built.
//! Nothing here is process-wide: two archives with different passwords or levels
//! can be open at the same time. [`ReaderOptions::from_env`] and
//! [`WriterOptions::from_env`] read the conventional environment variables once
//! and return an ordinary value.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::entry::EncryptionMethod;
use crate::error::{Result, ZipError};

/// Environment variable holding the password used to read archives.
pub const ENV_INPUT_PASSWORD: &str = "ZIPVAULT_INPUT_PASSWORD";
/// Environment variable holding the password used to write archives.
pub const ENV_OUTPUT_PASSWORD: &str = "ZIPVAULT_OUTPUT_PASSWORD";
/// Environment variable holding the default compression level.
pub const ENV_OUTPUT_COMPRESSION_LEVEL: &str = "ZIPVAULT_OUTPUT_COMPRESSION_LEVEL";
/// Environment variable enabling encryption of written entries (`true`).
pub const ENV_OUTPUT_ENCRYPT: &str = "ZIPVAULT_OUTPUT_ENCRYPT";
/// Environment variable holding the encryption method of written entries.
pub const ENV_OUTPUT_ENCRYPTION_METHOD: &str = "ZIPVAULT_OUTPUT_ENCRYPTION_METHOD";

/// Compression level for written entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionLevel {
    /// No compression (STORED).
    Store,
    /// Fast DEFLATE (level 1).
    Fast,
    /// Default DEFLATE (level 6).
    #[default]
    Normal,
    /// Best DEFLATE (level 9).
    Best,
}

impl CompressionLevel {
    /// The DEFLATE level, or `None` when entries are stored.
    pub fn deflate_level(self) -> Option<u32> {
        match self {
            Self::Store => None,
            Self::Fast => Some(1),
            Self::Normal => Some(6),
            Self::Best => Some(9),
        }
    }
}

impl FromStr for CompressionLevel {
    type Err = ZipError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "store" | "stored" | "none" | "no_compression" | "0" => Ok(Self::Store),
            "fast" | "fastest" | "faster" | "1" | "2" | "3" => Ok(Self::Fast),
            "normal" | "default" | "medium_fast" | "4" | "5" | "6" => Ok(Self::Normal),
            "best" | "higher" | "maximum" | "pre_ultra" | "ultra" | "7" | "8" | "9" => {
                Ok(Self::Best)
            }
            other => Err(ZipError::invalid_config(format!(
                "unknown compression level '{other}'"
            ))),
        }
    }
}

/// A password as raw bytes. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub struct Password(Vec<u8>);

impl Password {
    /// Create a password from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The password bytes fed to the key derivation.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

impl From<&str> for Password {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl From<String> for Password {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}

impl From<&[u8]> for Password {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

/// Options for reading archives.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    /// Password for encrypted entries.
    pub password: Option<Password>,
}

impl ReaderOptions {
    /// Create options without a password.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the password.
    pub fn with_password(mut self, password: impl Into<Password>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Read [`ENV_INPUT_PASSWORD`] from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build options from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            password: lookup(ENV_INPUT_PASSWORD).map(Password::from),
        }
    }
}

/// Per-entry compression and encryption settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryOptions {
    /// Compression level.
    pub compression: CompressionLevel,
    /// Whether the entry is encrypted.
    pub encrypt: bool,
    /// Encryption method used when `encrypt` is set.
    pub encryption: EncryptionMethod,
}

impl EntryOptions {
    /// The encryption that will actually be applied.
    ///
    /// Fails when encryption is switched on without naming a method.
    pub fn effective_encryption(&self) -> Result<EncryptionMethod> {
        match (self.encrypt, self.encryption) {
            (false, _) => Ok(EncryptionMethod::None),
            (true, EncryptionMethod::None) => Err(ZipError::invalid_config(
                "encryption enabled without an encryption method",
            )),
            (true, method) => Ok(method),
        }
    }
}

/// Options for writing archives.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WriterOptions {
    /// Default compression level.
    pub compression: CompressionLevel,
    /// Encrypt entries by default.
    pub encrypt: bool,
    /// Default encryption method.
    pub encryption: EncryptionMethod,
    /// Password for encrypted entries.
    pub password: Option<Password>,
    /// Archive comment written to the end of central directory record.
    pub comment: Option<String>,
}

impl WriterOptions {
    /// Create default options: DEFLATE level 6, no encryption.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default compression level.
    pub fn with_compression(mut self, level: CompressionLevel) -> Self {
        self.compression = level;
        self
    }

    /// Encrypt every entry with `method` using `password`.
    pub fn with_encryption(
        mut self,
        method: EncryptionMethod,
        password: impl Into<Password>,
    ) -> Self {
        self.encrypt = method.is_encrypted();
        self.encryption = method;
        self.password = Some(password.into());
        self
    }

    /// Set the archive comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Entry settings derived from these defaults.
    pub fn entry_options(&self) -> EntryOptions {
        EntryOptions {
            compression: self.compression,
            encrypt: self.encrypt,
            encryption: self.encryption,
        }
    }

    /// Read the `ZIPVAULT_OUTPUT_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build options from an arbitrary key lookup.
    ///
    /// Unset keys keep their defaults. The encrypt flag is on only for a
    /// case-insensitive `true`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();
        if let Some(level) = lookup(ENV_OUTPUT_COMPRESSION_LEVEL) {
            options.compression = level.parse()?;
        }
        if let Some(encrypt) = lookup(ENV_OUTPUT_ENCRYPT) {
            options.encrypt = encrypt.trim().eq_ignore_ascii_case("true");
        }
        if let Some(method) = lookup(ENV_OUTPUT_ENCRYPTION_METHOD) {
            options.encryption = method.parse()?;
        }
        options.password = lookup(ENV_OUTPUT_PASSWORD).map(Password::from);
        Ok(options)
    }
}
