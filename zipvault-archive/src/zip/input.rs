//! Buffered input plumbing for entry payloads.
//!
//! The readers never over-read past an entry: [`InputBuffer`] allows pushing
//! bytes back, [`DecryptingReader`] releases ciphertext to its source only as
//! the decompressor consumes plaintext, and [`DescriptorScanner`] delimits
//! stored payloads whose size only appears in a trailing data descriptor.

use std::io::{self, BufRead, Read, Take};

use zipvault_core::error::ZipError;

use super::cipher::CipherContext;
use super::record::{DATA_DESCRIPTOR_SIG, DataDescriptor};

const CHUNK: usize = 8 * 1024;

/// A buffered reader that can take bytes back.
pub struct InputBuffer<R> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
    position: u64,
}

impl<R: Read> InputBuffer<R> {
    /// Wrap a reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(CHUNK),
            pos: 0,
            position: 0,
        }
    }

    /// Put bytes back so they are returned before anything else.
    ///
    /// Only bytes that were read from this buffer may be put back.
    pub fn unread(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        debug_assert!(
            bytes.len() as u64 <= self.position,
            "unread of {} bytes after consuming {}",
            bytes.len(),
            self.position
        );
        let mut merged = Vec::with_capacity(bytes.len() + self.buf.len() - self.pos);
        merged.extend_from_slice(bytes);
        merged.extend_from_slice(&self.buf[self.pos..]);
        self.buf = merged;
        self.pos = 0;
        self.position = self.position.saturating_sub(bytes.len() as u64);
    }

    /// Bytes consumed so far, net of bytes put back.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read up to `buf.len()` bytes, returning fewer only at end of input.
    pub fn read_full(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    /// Discard exactly `len` bytes.
    pub fn skip(&mut self, len: u64) -> io::Result<()> {
        let copied = io::copy(&mut self.by_ref().take(len), &mut io::sink())?;
        if copied < len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "input ended inside an entry",
            ));
        }
        Ok(())
    }

    /// Recover the underlying reader. Buffered bytes are lost.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for InputBuffer<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl<R: Read> BufRead for InputBuffer<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos >= self.buf.len() {
            self.buf.resize(CHUNK, 0);
            let n = loop {
                match self.inner.read(&mut self.buf) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        self.buf.clear();
                        self.pos = 0;
                        return Err(e);
                    }
                }
            };
            self.buf.truncate(n);
            self.pos = 0;
        }
        Ok(&self.buf[self.pos..])
    }

    fn consume(&mut self, amt: usize) {
        let amt = amt.min(self.buf.len() - self.pos);
        self.pos += amt;
        self.position += amt as u64;
    }
}

/// Finds the end of a stored payload followed by a signed data descriptor.
///
/// A candidate descriptor is accepted only when its compressed size equals the
/// number of bytes seen since the payload began (plus the encryption header
/// and trailer), which rules out signature bytes occurring inside the data.
pub struct DescriptorScanner<R> {
    inner: InputBuffer<R>,
    header_len: u64,
    trailer_len: usize,
    zip64: bool,
    window: Vec<u8>,
    start: usize,
    ready: usize,
    emitted: u64,
    found: Option<(Vec<u8>, DataDescriptor)>,
}

impl<R: Read> DescriptorScanner<R> {
    /// Scan the payload that starts at the current position of `inner`.
    pub fn new(inner: InputBuffer<R>, header_len: usize, trailer_len: usize, zip64: bool) -> Self {
        Self {
            inner,
            header_len: header_len as u64,
            trailer_len,
            zip64,
            window: Vec::new(),
            start: 0,
            ready: 0,
            emitted: 0,
            found: None,
        }
    }

    fn descriptor_len(&self) -> usize {
        DataDescriptor::signed_len(self.zip64)
    }

    /// Offset from `start` of a descriptor that closes the payload.
    fn search(&self) -> Option<(usize, DataDescriptor)> {
        let pending = &self.window[self.start..];
        let desc_len = self.descriptor_len();
        if pending.len() < self.trailer_len + desc_len {
            return None;
        }
        let sig = DATA_DESCRIPTOR_SIG.to_le_bytes();
        (self.trailer_len..=pending.len() - desc_len).find_map(|i| {
            if pending[i..i + 4] != sig {
                return None;
            }
            let descriptor = DataDescriptor::parse_signed(&pending[i..], self.zip64)?;
            let seen = self.header_len + self.emitted + i as u64;
            (descriptor.compressed_size == seen).then_some((i, descriptor))
        })
    }

    fn refill(&mut self) -> io::Result<()> {
        loop {
            if let Some((i, descriptor)) = self.search() {
                let payload_end = self.start + i - self.trailer_len;
                let trailer = self.window[payload_end..self.start + i].to_vec();
                let rest_at = self.start + i + self.descriptor_len();
                self.inner.unread(&self.window[rest_at..]);
                self.window.truncate(payload_end);
                self.ready = payload_end - self.start;
                self.found = Some((trailer, descriptor));
                return Ok(());
            }

            let hold_back = self.trailer_len + self.descriptor_len() - 1;
            let pending = self.window.len() - self.start;
            if pending > hold_back {
                self.ready = pending - hold_back;
                return Ok(());
            }

            if self.start > 0 {
                self.window.drain(..self.start);
                self.start = 0;
            }
            let chunk = self.inner.fill_buf()?;
            if chunk.is_empty() {
                return Err(ZipError::malformed("data descriptor of stored entry not found").into());
            }
            let n = chunk.len();
            self.window.extend_from_slice(chunk);
            self.inner.consume(n);
        }
    }

    /// The source, trailer and descriptor once the payload is exhausted.
    pub fn into_parts(self) -> Option<(InputBuffer<R>, Vec<u8>, DataDescriptor)> {
        let (trailer, descriptor) = self.found?;
        Some((self.inner, trailer, descriptor))
    }
}

impl<R: Read> Read for DescriptorScanner<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl<R: Read> BufRead for DescriptorScanner<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.ready == 0 && self.found.is_none() {
            self.refill()?;
        }
        Ok(&self.window[self.start..self.start + self.ready])
    }

    fn consume(&mut self, amt: usize) {
        let amt = amt.min(self.ready);
        self.start += amt;
        self.ready -= amt;
        self.emitted += amt as u64;
    }
}

/// Where an entry's payload ends.
pub enum Payload<R> {
    /// Length known up front.
    Bounded(Take<InputBuffer<R>>),
    /// Delimited by the compressed stream itself.
    Open(InputBuffer<R>),
    /// Delimited by a trailing data descriptor.
    Scan(DescriptorScanner<R>),
}

impl<R: Read> Read for Payload<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Bounded(r) => r.read(out),
            Self::Open(r) => r.read(out),
            Self::Scan(r) => r.read(out),
        }
    }
}

impl<R: Read> BufRead for Payload<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match self {
            Self::Bounded(r) => r.fill_buf(),
            Self::Open(r) => r.fill_buf(),
            Self::Scan(r) => r.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            Self::Bounded(r) => r.consume(amt),
            Self::Open(r) => r.consume(amt),
            Self::Scan(r) => r.consume(amt),
        }
    }
}

/// Decrypts a payload lazily.
///
/// A chunk from the source is decrypted as a whole, but the source is only
/// advanced, and the authenticator only fed, by what the caller consumes. The
/// source therefore stops exactly at the end of the compressed stream even
/// when that ends inside a chunk.
pub struct DecryptingReader<S> {
    inner: S,
    cipher: CipherContext,
    plain: Vec<u8>,
    pos: usize,
    consumed: u64,
}

impl<S: BufRead> DecryptingReader<S> {
    /// Decrypt `inner` with `cipher`.
    pub fn new(inner: S, cipher: CipherContext) -> Self {
        Self {
            inner,
            cipher,
            plain: Vec::new(),
            pos: 0,
            consumed: 0,
        }
    }

    /// Ciphertext bytes consumed so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// The source.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// The source and the cipher state.
    pub fn into_parts(self) -> (S, CipherContext) {
        (self.inner, self.cipher)
    }
}

impl<S: BufRead> Read for DecryptingReader<S> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl<S: BufRead> BufRead for DecryptingReader<S> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if matches!(self.cipher, CipherContext::None) {
            return self.inner.fill_buf();
        }
        if self.pos >= self.plain.len() {
            let chunk = self.inner.fill_buf()?;
            self.plain.clear();
            self.plain.extend_from_slice(chunk);
            self.pos = 0;
            self.cipher.transform_on_read(&mut self.plain);
        }
        Ok(&self.plain[self.pos..])
    }

    fn consume(&mut self, amt: usize) {
        if matches!(self.cipher, CipherContext::None) {
            self.inner.consume(amt);
            self.consumed += amt as u64;
            return;
        }
        let amt = amt.min(self.plain.len() - self.pos);
        if amt == 0 {
            return;
        }
        // The unconsumed ciphertext is still at the front of the source.
        if let Ok(raw) = self.inner.fill_buf() {
            let take = amt.min(raw.len());
            self.cipher.authenticate(&raw[..take]);
        }
        self.inner.consume(amt);
        self.pos += amt;
        self.consumed += amt as u64;
    }
}
