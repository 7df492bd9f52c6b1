//! # zipvault archive
//!
//! ZIP container support for zipvault.
//!
//! - **Streaming reader**: [`ZipStreamReader`] decodes entries straight off
//!   any [`std::io::Read`] using local headers only
//! - **Random-access reader**: [`ZipArchive`] parses the central directory
//!   and extracts entries by name, concurrently if needed
//! - **Streaming writer**: [`ZipWriter`] emits entries one at a time to a
//!   streamed or seekable sink
//! - **Encryption**: ZipCrypto (compatibility only) and WinZip AES-128/192/256
//!   with HMAC verification
//! - **Format dispatch**: [`FormatHandle`] maps names, extensions and magic
//!   bytes to the readers and writer
//!
//! ## Example
//!
//! ```rust
//! use std::io::{Read, Write};
//! use zipvault_archive::zip::{ZipArchive, ZipWriter};
//! use zipvault_core::config::{ReaderOptions, WriterOptions};
//! use zipvault_core::entry::{EncryptionMethod, Entry};
//!
//! let options = WriterOptions::new().with_encryption(EncryptionMethod::Aes256, "secret");
//! let mut writer = ZipWriter::with_options(Vec::new(), options);
//! writer.begin_entry(Entry::file("a.txt"))?;
//! writer.write_all(b"hello")?;
//! writer.end_entry()?;
//! let bytes = writer.into_inner()?;
//!
//! let archive = ZipArchive::open(bytes, ReaderOptions::new().with_password("secret"))?;
//! let mut text = String::new();
//! archive.extract("a.txt")?.read_to_string(&mut text)?;
//! assert_eq!(text, "hello");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Logging
//!
//! Entry and record events are emitted through [`tracing`]. The crate never
//! installs a subscriber.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod format;
pub mod zip;

// Re-exports
pub use format::{FormatHandle, copy_archive, copy_entry, write_directory_entry, write_entry};
pub use zip::{
    ArchiveSink, SeekSink, StreamSink, ZipArchive, ZipFileReader, ZipStreamReader, ZipWriter,
};
