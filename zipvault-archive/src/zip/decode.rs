//! Read pipeline of one entry: raw bytes, decryption, decompression, CRC-32.
//!
//! Verification happens when the payload is exhausted: the AES authentication
//! code first, then the size, then the CRC-32 against the data descriptor or
//! the expected values given up front.

use std::io::{self, BufRead, Read};

use flate2::bufread::DeflateDecoder;
use tracing::trace;
use zipvault_core::entry::CompressionMethod;
use zipvault_core::error::{Result, ZipError};

use super::cipher::CipherContext;
use super::input::{DecryptingReader, InputBuffer, Payload};
use super::record::DataDescriptor;

/// Values an entry is checked against.
#[derive(Debug, Clone)]
pub struct DecodeParams {
    /// Entry name, for error messages.
    pub name: String,
    /// Compression method of the payload.
    pub method: CompressionMethod,
    /// Encryption header bytes already consumed before the payload.
    pub header_len: usize,
    /// Encryption trailer bytes following the payload.
    pub trailer_len: usize,
    /// Expected CRC-32, unless a data descriptor supplies it.
    pub crc32: u32,
    /// Expected uncompressed size, unless a data descriptor supplies it.
    pub size: Option<u64>,
    /// Whether the CRC-32 is meaningful (false for AE-2).
    pub check_crc: bool,
    /// Whether a data descriptor follows the payload and must be consumed.
    pub read_descriptor: bool,
    /// Whether that descriptor uses 64-bit sizes.
    pub zip64: bool,
}

/// Final values of a fully decoded entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedEntry {
    /// CRC-32 of the produced bytes.
    pub crc32: u32,
    /// Uncompressed size.
    pub size: u64,
    /// Stored size including encryption header and trailer.
    pub compressed_size: u64,
}

enum Body<R: Read> {
    Stored(DecryptingReader<Payload<R>>),
    Deflate(DeflateDecoder<DecryptingReader<Payload<R>>>),
}

impl<R: Read> Body<R> {
    fn into_reader(self) -> DecryptingReader<Payload<R>> {
        match self {
            Self::Stored(reader) => reader,
            Self::Deflate(decoder) => decoder.into_inner(),
        }
    }
}

/// Streaming decoder of one entry payload.
pub struct EntryDecoder<R: Read> {
    body: Option<Body<R>>,
    params: DecodeParams,
    hasher: crc32fast::Hasher,
    produced: u64,
    rest: Option<InputBuffer<R>>,
    outcome: Option<DecodedEntry>,
}

impl<R: Read> EntryDecoder<R> {
    /// Decode `payload`, decrypting with `cipher`.
    pub fn new(payload: Payload<R>, cipher: CipherContext, params: DecodeParams) -> Result<Self> {
        let reader = DecryptingReader::new(payload, cipher);
        let body = match params.method {
            CompressionMethod::Stored => Body::Stored(reader),
            CompressionMethod::Deflate => Body::Deflate(DeflateDecoder::new(reader)),
            other => {
                return Err(ZipError::unsupported(format!(
                    "compression method {other} of {}",
                    params.name
                )));
            }
        };
        Ok(Self {
            body: Some(body),
            params,
            hasher: crc32fast::Hasher::new(),
            produced: 0,
            rest: None,
            outcome: None,
        })
    }

    /// Entry name.
    pub fn name(&self) -> &str {
        &self.params.name
    }

    /// Whether the payload was read to its end, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.body.is_none()
    }

    /// Final values, once the payload has been read to the end.
    pub fn outcome(&self) -> Option<DecodedEntry> {
        self.outcome
    }

    /// Read and discard the rest of the payload, running all checks.
    pub fn drain(&mut self) -> Result<DecodedEntry> {
        io::copy(self, &mut io::sink())?;
        self.outcome
            .ok_or_else(|| ZipError::invalid_state("entry payload was not fully decoded"))
    }

    /// The input positioned after the entry, once the payload is exhausted.
    ///
    /// Available even when verification failed, so a stream can continue with
    /// the next entry.
    pub fn into_source(self) -> Option<InputBuffer<R>> {
        self.rest
    }

    fn finish(&mut self) -> Result<()> {
        let Some(body) = self.body.take() else {
            return Ok(());
        };
        let mut reader = body.into_reader();
        if matches!(reader.get_ref(), Payload::Bounded(_)) {
            // A compressed stream that ends early leaves payload bytes behind.
            io::copy(&mut reader, &mut io::sink())?;
        }
        let consumed = reader.consumed();
        let (payload, cipher) = reader.into_parts();

        let params = &self.params;
        let (mut input, trailer, descriptor) = match payload {
            Payload::Bounded(take) => {
                let mut input = take.into_inner();
                let trailer = read_trailer(&mut input, params.trailer_len)?;
                (input, trailer, None)
            }
            Payload::Open(mut input) => {
                let trailer = read_trailer(&mut input, params.trailer_len)?;
                (input, trailer, None)
            }
            Payload::Scan(scanner) => {
                let (input, trailer, descriptor) = scanner
                    .into_parts()
                    .ok_or_else(|| ZipError::malformed("data descriptor not found"))?;
                (input, trailer, Some(descriptor))
            }
        };
        let descriptor = match descriptor {
            Some(found) => Some(found),
            None if params.read_descriptor => {
                Some(DataDescriptor::read(&mut input, params.zip64)?.0)
            }
            None => None,
        };
        self.rest = Some(input);

        let computed = self.hasher.clone().finalize();
        let compressed_size = (params.header_len + params.trailer_len) as u64 + consumed;
        trace!(
            name = %params.name,
            size = self.produced,
            compressed_size,
            "entry payload exhausted"
        );

        cipher.verify(&trailer, &params.name)?;

        let (expected_crc, expected_size) = match descriptor {
            Some(descriptor) => {
                if descriptor.compressed_size != compressed_size {
                    return Err(ZipError::size_mismatch(
                        &params.name,
                        descriptor.compressed_size,
                        compressed_size,
                    ));
                }
                (descriptor.crc32, Some(descriptor.uncompressed_size))
            }
            None => (params.crc32, params.size),
        };
        if let Some(expected) = expected_size {
            if expected != self.produced {
                return Err(ZipError::size_mismatch(&params.name, expected, self.produced));
            }
        }
        if params.check_crc && expected_crc != computed {
            return Err(ZipError::crc_mismatch(&params.name, expected_crc, computed));
        }

        self.outcome = Some(DecodedEntry {
            crc32: computed,
            size: self.produced,
            compressed_size,
        });
        Ok(())
    }
}

fn read_trailer<R: BufRead>(input: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut trailer = vec![0u8; len];
    input
        .read_exact(&mut trailer)
        .map_err(|e| ZipError::truncated(e, "authentication code"))?;
    Ok(trailer)
}

fn corrupt_stream(name: &str, err: io::Error) -> io::Error {
    if err.get_ref().is_some_and(|inner| inner.is::<ZipError>()) {
        return err;
    }
    match err.kind() {
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => {
            ZipError::malformed(format!("corrupt compressed data in {name}: {err}")).into()
        }
        io::ErrorKind::UnexpectedEof => ZipError::truncated(err, "entry payload").into(),
        _ => err,
    }
}

impl<R: Read> Read for EntryDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(body) = self.body.as_mut() else {
            return Ok(0);
        };
        if buf.is_empty() {
            return Ok(0);
        }
        let n = match body {
            Body::Stored(reader) => reader.read(buf),
            Body::Deflate(decoder) => decoder.read(buf),
        }
        .map_err(|e| corrupt_stream(&self.params.name, e))?;

        if n == 0 {
            self.finish()?;
            return Ok(0);
        }
        self.hasher.update(&buf[..n]);
        self.produced += n as u64;
        Ok(n)
    }
}
