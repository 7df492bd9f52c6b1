//! Write pipeline of one entry: CRC-32, compression, encryption.

use std::io::Write;

use flate2::{Compress, Compression, FlushCompress, Status};
use zipvault_core::entry::CompressionMethod;
use zipvault_core::error::{Result, ZipError};

use super::cipher::CipherContext;

const OUT_CHUNK: usize = 32 * 1024;

/// Final values of an encoded entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedEntry {
    /// CRC-32 of the uncompressed bytes.
    pub crc32: u32,
    /// Uncompressed size.
    pub size: u64,
    /// Bytes written, encryption header and trailer included.
    pub compressed_size: u64,
}

/// Incremental compressor and encryptor of one entry.
pub struct EntryEncoder {
    deflate: Option<Compress>,
    cipher: CipherContext,
    hasher: crc32fast::Hasher,
    size: u64,
    written: u64,
    out: Vec<u8>,
}

impl EntryEncoder {
    /// Create an encoder. `level` is the DEFLATE level (0-9).
    pub fn new(method: CompressionMethod, level: u32, cipher: CipherContext) -> Result<Self> {
        let deflate = match method {
            CompressionMethod::Stored => None,
            CompressionMethod::Deflate => Some(Compress::new(Compression::new(level), false)),
            other => return Err(ZipError::unsupported(format!("writing {other} entries"))),
        };
        Ok(Self {
            deflate,
            cipher,
            hasher: crc32fast::Hasher::new(),
            size: 0,
            written: 0,
            out: Vec::with_capacity(OUT_CHUNK),
        })
    }

    /// Uncompressed bytes accepted so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Write bytes that bypass compression and encryption (the encryption
    /// header).
    pub fn write_raw<W: Write>(&mut self, sink: &mut W, bytes: &[u8]) -> Result<()> {
        sink.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    fn emit<W: Write>(&mut self, sink: &mut W) -> Result<()> {
        if self.out.is_empty() {
            return Ok(());
        }
        self.cipher.transform_on_write(&mut self.out);
        sink.write_all(&self.out)?;
        self.written += self.out.len() as u64;
        self.out.clear();
        Ok(())
    }

    /// Feed payload bytes.
    pub fn write<W: Write>(&mut self, sink: &mut W, data: &[u8]) -> Result<()> {
        self.hasher.update(data);
        self.size += data.len() as u64;

        if self.deflate.is_none() {
            for chunk in data.chunks(OUT_CHUNK) {
                self.out.extend_from_slice(chunk);
                self.emit(sink)?;
            }
            return Ok(());
        }

        let mut input = data;
        while let Some(deflate) = self.deflate.as_mut() {
            self.out.reserve(OUT_CHUNK);
            let before = deflate.total_in();
            deflate
                .compress_vec(input, &mut self.out, FlushCompress::None)
                .map_err(|e| ZipError::Io(std::io::Error::other(e)))?;
            input = &input[(deflate.total_in() - before) as usize..];
            let full = self.out.len() == self.out.capacity();
            self.emit(sink)?;
            if input.is_empty() && !full {
                break;
            }
        }
        Ok(())
    }

    /// Flush the compressor, write the encryption trailer and return the
    /// entry's final values.
    pub fn finish<W: Write>(mut self, sink: &mut W) -> Result<EncodedEntry> {
        if let Some(mut deflate) = self.deflate.take() {
            loop {
                self.out.reserve(OUT_CHUNK);
                let status = deflate
                    .compress_vec(&[], &mut self.out, FlushCompress::Finish)
                    .map_err(|e| ZipError::Io(std::io::Error::other(e)))?;
                self.emit(sink)?;
                if status == Status::StreamEnd {
                    break;
                }
            }
        }

        let cipher = std::mem::replace(&mut self.cipher, CipherContext::None);
        let trailer = cipher.finalize();
        self.write_raw(sink, &trailer)?;

        Ok(EncodedEntry {
            crc32: self.hasher.finalize(),
            size: self.size,
            compressed_size: self.written,
        })
    }
}
