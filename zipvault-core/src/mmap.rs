//! Memory-mapped archive sources.
//!
//! [`MmapSource`] maps an archive read-only and serves positioned reads straight
//! from the mapping, so concurrent extractions cost no system calls.
//!
//! # Example
//!
//! ```no_run
//! use zipvault_core::mmap::MmapSource;
//! use zipvault_core::source::ReadAt;
//!
//! let source = MmapSource::open("archive.zip")?;
//! let mut magic = [0u8; 4];
//! source.read_exact_at(0, &mut magic)?;
//! # Ok::<(), zipvault_core::error::ZipError>(())
//! ```
//!
//! # Safety
//!
//! A mapping observes later modifications of the file by other processes.
//! The archive must not be truncated or rewritten while it is mapped.

use crate::error::Result;
use crate::source::ReadAt;
use memmap2::Mmap;
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// A read-only memory mapping usable as an archive source.
///
/// Clones share the mapping.
#[derive(Debug, Clone)]
pub struct MmapSource {
    mmap: Arc<Mmap>,
}

impl MmapSource {
    /// Open and map a file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ZipError::Io`] if the file cannot be opened or
    /// mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::from_file(&file)
    }

    /// Map an already open file.
    pub fn from_file(file: &File) -> Result<Self> {
        // SAFETY: the mapping is read-only; the module docs require the file
        // to stay unmodified while mapped.
        let mmap = unsafe { Mmap::map(file)? };
        Ok(Self {
            mmap: Arc::new(mmap),
        })
    }

    /// Length of the mapped file.
    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Check if the mapped file is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// The whole mapping as a slice.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }
}

impl ReadAt for MmapSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.as_slice().read_at(offset, buf)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.mmap.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_mmap_read_at() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"PK\x03\x04 mapped").unwrap();
        file.flush().unwrap();

        let source = MmapSource::open(file.path()).unwrap();
        assert_eq!(source.len(), 11);
        let mut buf = [0u8; 6];
        source.read_exact_at(5, &mut buf).unwrap();
        assert_eq!(&buf, b"mapped");
    }

    #[test]
    fn test_clones_share_mapping() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"shared").unwrap();
        file.flush().unwrap();

        let first = MmapSource::open(file.path()).unwrap();
        let second = first.clone();
        assert_eq!(first.as_slice().as_ptr(), second.as_slice().as_ptr());
    }
}
