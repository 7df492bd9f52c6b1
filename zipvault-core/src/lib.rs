//! # zipvault core
//!
//! Core components shared by the zipvault ZIP codec:
//!
//! - [`entry`]: archive entry metadata
//! - [`error`]: the error taxonomy
//! - [`config`]: explicit reader/writer configuration
//! - [`source`]: positioned-read storage for random access
//! - `mmap` (feature `mmap`): memory-mapped sources
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ L4: CLI                                                 │
//! │     zipvault list / extract / create / test / convert   │
//! ├─────────────────────────────────────────────────────────┤
//! │ L3: Container                                           │
//! │     stream reader, random-access reader, writer         │
//! ├─────────────────────────────────────────────────────────┤
//! │ L2: Pipelines                                           │
//! │     DEFLATE, ZipCrypto, WinZip AES, CRC-32              │
//! ├─────────────────────────────────────────────────────────┤
//! │ L1: Core (this crate)                                   │
//! │     Entry, ZipError, options, ReadAt                    │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use zipvault_core::config::{CompressionLevel, WriterOptions};
//! use zipvault_core::entry::{EncryptionMethod, Entry};
//!
//! let options = WriterOptions::new()
//!     .with_compression(CompressionLevel::Best)
//!     .with_encryption(EncryptionMethod::Aes256, "secret");
//! assert!(options.encrypt);
//!
//! let dir = Entry::directory("docs");
//! assert_eq!(dir.name, "docs/");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod entry;
pub mod error;
#[cfg(feature = "mmap")]
pub mod mmap;
pub mod source;

// Re-exports for convenience
pub use config::{CompressionLevel, EntryOptions, Password, ReaderOptions, WriterOptions};
pub use entry::{CompressionMethod, EncryptionMethod, Entry, EntryKind};
pub use error::{Result, ZipError};
pub use source::{ReadAt, ReadAtCursor};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{CompressionLevel, EntryOptions, Password, ReaderOptions, WriterOptions};
    pub use crate::entry::{CompressionMethod, EncryptionMethod, Entry, EntryKind};
    pub use crate::error::{Result, ZipError};
    pub use crate::source::ReadAt;
}
