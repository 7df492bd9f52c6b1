//! Encryption strategy of a single entry.
//!
//! [`CipherContext`] hides which of the three strategies (none, ZipCrypto,
//! WinZip AES) applies to an entry. The writer and both readers go through it
//! and never branch on the method themselves.

use zipvault_core::entry::EncryptionMethod;
use zipvault_core::error::{Result, ZipError};

use super::aes::{AUTH_CODE_LEN, AesDecryptor, AesEncryptor, AesStrength};
use super::crypto::{self, ZipCryptoKeys};

/// Bytes written before the payload for `method`.
pub fn header_len(method: EncryptionMethod) -> usize {
    match method {
        EncryptionMethod::None => 0,
        EncryptionMethod::ZipCrypto => crypto::HEADER_LEN,
        aes => AesStrength::from_method(aes).map_or(0, AesStrength::header_len),
    }
}

/// Bytes written after the payload for `method`.
pub fn trailer_len(method: EncryptionMethod) -> usize {
    if method.is_aes() { AUTH_CODE_LEN } else { 0 }
}

/// Per-entry cipher state.
pub enum CipherContext {
    /// Payload is stored in the clear.
    None,
    /// Traditional PKWARE encryption.
    ZipCrypto(ZipCryptoKeys),
    /// WinZip AES, writing side.
    AesEncrypt(AesEncryptor),
    /// WinZip AES, reading side.
    AesDecrypt(AesDecryptor),
}

impl std::fmt::Debug for CipherContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::None => "None",
            Self::ZipCrypto(_) => "ZipCrypto",
            Self::AesEncrypt(_) => "AesEncrypt",
            Self::AesDecrypt(_) => "AesDecrypt",
        };
        f.write_str(name)
    }
}

impl CipherContext {
    /// Set up encryption of an entry.
    ///
    /// Returns the context and the header bytes to write before the payload.
    /// `check` is the ZipCrypto check byte and is ignored by other methods.
    pub fn for_write(
        method: EncryptionMethod,
        password: Option<&[u8]>,
        check: u8,
        name: &str,
    ) -> Result<(Self, Vec<u8>)> {
        if !method.is_encrypted() {
            return Ok((Self::None, Vec::new()));
        }
        let password = password.ok_or_else(|| ZipError::password_required(name))?;
        match method {
            EncryptionMethod::ZipCrypto => {
                let mut keys = ZipCryptoKeys::new(password);
                let header = keys.encrypt_header(check);
                Ok((Self::ZipCrypto(keys), header.to_vec()))
            }
            aes => {
                let strength = AesStrength::from_method(aes)
                    .ok_or_else(|| ZipError::unsupported(format!("encryption method {aes}")))?;
                let (encryptor, header) = AesEncryptor::new(password, strength)?;
                Ok((Self::AesEncrypt(encryptor), header))
            }
        }
    }

    /// Set up decryption of an entry from the header read off the payload.
    pub fn for_read(
        method: EncryptionMethod,
        password: Option<&[u8]>,
        header: &[u8],
        check: u8,
        name: &str,
    ) -> Result<Self> {
        if !method.is_encrypted() {
            return Ok(Self::None);
        }
        let password = password.ok_or_else(|| ZipError::password_required(name))?;
        match method {
            EncryptionMethod::ZipCrypto => {
                let header: &[u8; crypto::HEADER_LEN] = header
                    .try_into()
                    .map_err(|_| ZipError::malformed("ZipCrypto header has the wrong length"))?;
                let mut keys = ZipCryptoKeys::new(password);
                if !keys.decrypt_header(header, check) {
                    return Err(ZipError::wrong_password(name));
                }
                Ok(Self::ZipCrypto(keys))
            }
            aes => {
                let strength = AesStrength::from_method(aes)
                    .ok_or_else(|| ZipError::unsupported(format!("encryption method {aes}")))?;
                AesDecryptor::new(password, header, strength)?
                    .map(Self::AesDecrypt)
                    .ok_or_else(|| ZipError::wrong_password(name))
            }
        }
    }

    /// Encrypt outgoing payload bytes in place.
    pub fn transform_on_write(&mut self, data: &mut [u8]) {
        match self {
            Self::ZipCrypto(keys) => keys.encrypt(data),
            Self::AesEncrypt(encryptor) => encryptor.encrypt(data),
            Self::None | Self::AesDecrypt(_) => {}
        }
    }

    /// Decrypt incoming payload bytes in place.
    ///
    /// Authentication is fed separately through [`Self::authenticate`] so a
    /// reader can decrypt ahead of what it finally consumes.
    pub fn transform_on_read(&mut self, data: &mut [u8]) {
        match self {
            Self::ZipCrypto(keys) => keys.decrypt(data),
            Self::AesDecrypt(decryptor) => decryptor.decrypt(data),
            Self::None | Self::AesEncrypt(_) => {}
        }
    }

    /// Feed consumed ciphertext to the authenticator, if any.
    pub fn authenticate(&mut self, ciphertext: &[u8]) {
        if let Self::AesDecrypt(decryptor) = self {
            decryptor.authenticate(ciphertext);
        }
    }

    /// Trailer to write after the payload.
    pub fn finalize(self) -> Vec<u8> {
        match self {
            Self::AesEncrypt(encryptor) => encryptor.finalize().to_vec(),
            _ => Vec::new(),
        }
    }

    /// Check the trailer read after the payload.
    pub fn verify(self, trailer: &[u8], name: &str) -> Result<()> {
        match self {
            Self::AesDecrypt(decryptor) => {
                if decryptor.verify(trailer) {
                    Ok(())
                } else {
                    Err(ZipError::authentication_failed(name))
                }
            }
            _ => Ok(()),
        }
    }
}
