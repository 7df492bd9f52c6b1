//! WinZip AES encryption (AE-1 / AE-2).
//!
//! Key material is derived with PBKDF2-HMAC-SHA1 (1000 iterations) from the
//! password and a per-entry random salt. The derived block holds, in order, the
//! AES key, the HMAC-SHA1 key and a 2-byte password verifier. The payload is
//! encrypted with AES in CTR mode using a little-endian counter that starts at
//! 1, and authenticated with HMAC-SHA1 over the ciphertext truncated to 10
//! bytes.
//!
//! On disk an AES entry looks like:
//!
//! ```text
//! salt (8/12/16) | verifier (2) | ciphertext | authentication code (10)
//! ```
//!
//! The compression method field of the headers is set to 99 and the real
//! method lives in the `0x9901` extra field.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use zipvault_core::entry::EncryptionMethod;
use zipvault_core::error::{Result, ZipError};

type HmacSha1 = Hmac<Sha1>;

/// WinZip AES extra field header ID.
pub const AES_EXTRA_FIELD_ID: u16 = 0x9901;

/// Compression method field value of AES-encrypted entries.
pub const AES_METHOD_MARKER: u16 = 99;

/// PBKDF2 iteration count fixed by the WinZip format.
pub const PBKDF2_ITERATIONS: u32 = 1000;

/// Length of the truncated HMAC-SHA1 authentication code.
pub const AUTH_CODE_LEN: usize = 10;

/// Length of the password verification value.
pub const PASSWORD_VERIFIER_LEN: usize = 2;

/// AES key size used for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AesStrength {
    /// AES-128.
    Aes128 = 1,
    /// AES-192.
    Aes192 = 2,
    /// AES-256.
    Aes256 = 3,
}

impl AesStrength {
    /// Salt length in bytes.
    pub fn salt_len(self) -> usize {
        match self {
            Self::Aes128 => 8,
            Self::Aes192 => 12,
            Self::Aes256 => 16,
        }
    }

    /// Key length in bytes.
    pub fn key_len(self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 => 32,
        }
    }

    /// Length of the PBKDF2 output: two keys plus the verifier.
    pub fn derived_key_len(self) -> usize {
        self.key_len() * 2 + PASSWORD_VERIFIER_LEN
    }

    /// Bytes preceding the ciphertext.
    pub fn header_len(self) -> usize {
        self.salt_len() + PASSWORD_VERIFIER_LEN
    }

    /// Bytes added to the compressed size by encryption.
    pub fn overhead(self) -> u64 {
        (self.header_len() + AUTH_CODE_LEN) as u64
    }

    /// Parse the strength byte of the extra field.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Aes128),
            2 => Some(Self::Aes192),
            3 => Some(Self::Aes256),
            _ => None,
        }
    }

    /// Strength of an encryption method, if it is an AES variant.
    pub fn from_method(method: EncryptionMethod) -> Option<Self> {
        match method {
            EncryptionMethod::Aes128 => Some(Self::Aes128),
            EncryptionMethod::Aes192 => Some(Self::Aes192),
            EncryptionMethod::Aes256 => Some(Self::Aes256),
            _ => None,
        }
    }

    /// The matching encryption method.
    pub fn method(self) -> EncryptionMethod {
        match self {
            Self::Aes128 => EncryptionMethod::Aes128,
            Self::Aes192 => EncryptionMethod::Aes192,
            Self::Aes256 => EncryptionMethod::Aes256,
        }
    }
}

/// AE-1 stores the real CRC-32; AE-2 stores zero and relies on the HMAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesVendorVersion {
    /// CRC-32 recorded and checked.
    Ae1,
    /// CRC-32 field is zero.
    Ae2,
}

/// WinZip AES extra field (`0x9901`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AesExtraField {
    /// Vendor version.
    pub version: AesVendorVersion,
    /// Key size.
    pub strength: AesStrength,
    /// Compression method applied before encryption.
    pub compression_method: u16,
}

impl AesExtraField {
    /// Create an AE-2 extra field.
    pub fn new(strength: AesStrength, compression_method: u16) -> Self {
        Self {
            version: AesVendorVersion::Ae2,
            strength,
            compression_method,
        }
    }

    /// Serialize the complete record, header included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let version: u16 = match self.version {
            AesVendorVersion::Ae1 => 1,
            AesVendorVersion::Ae2 => 2,
        };
        let mut bytes = Vec::with_capacity(11);
        bytes.extend_from_slice(&AES_EXTRA_FIELD_ID.to_le_bytes());
        bytes.extend_from_slice(&7u16.to_le_bytes());
        bytes.extend_from_slice(&version.to_le_bytes());
        bytes.extend_from_slice(b"AE");
        bytes.push(self.strength as u8);
        bytes.extend_from_slice(&self.compression_method.to_le_bytes());
        bytes
    }

    /// Parse the data part of the record (without the 4-byte header).
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 7 {
            return Err(ZipError::malformed("AES extra field too short"));
        }
        let version = match u16::from_le_bytes([data[0], data[1]]) {
            1 => AesVendorVersion::Ae1,
            2 => AesVendorVersion::Ae2,
            other => {
                return Err(ZipError::unsupported(format!(
                    "AES extra field vendor version {other}"
                )));
            }
        };
        if &data[2..4] != b"AE" {
            return Err(ZipError::malformed("AES extra field vendor id is not 'AE'"));
        }
        let strength = AesStrength::from_u8(data[4]).ok_or_else(|| {
            ZipError::unsupported(format!("AES strength {}", data[4]))
        })?;
        Ok(Self {
            version,
            strength,
            compression_method: u16::from_le_bytes([data[5], data[6]]),
        })
    }
}

enum BlockCipher {
    Aes128(aes::Aes128),
    Aes192(aes::Aes192),
    Aes256(aes::Aes256),
}

impl BlockCipher {
    fn new(strength: AesStrength, key: &[u8]) -> Result<Self> {
        let invalid = |_| ZipError::invalid_state("derived AES key has the wrong length");
        Ok(match strength {
            AesStrength::Aes128 => {
                Self::Aes128(<aes::Aes128 as KeyInit>::new_from_slice(key).map_err(invalid)?)
            }
            AesStrength::Aes192 => {
                Self::Aes192(<aes::Aes192 as KeyInit>::new_from_slice(key).map_err(invalid)?)
            }
            AesStrength::Aes256 => {
                Self::Aes256(<aes::Aes256 as KeyInit>::new_from_slice(key).map_err(invalid)?)
            }
        })
    }

    fn encrypt_block(&self, block: &mut [u8; 16]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            Self::Aes128(cipher) => cipher.encrypt_block(block),
            Self::Aes192(cipher) => cipher.encrypt_block(block),
            Self::Aes256(cipher) => cipher.encrypt_block(block),
        }
    }
}

/// AES in CTR mode with the WinZip little-endian counter.
struct AesCtr {
    cipher: BlockCipher,
    counter: u128,
    keystream: [u8; 16],
    keystream_pos: usize,
}

impl AesCtr {
    fn new(cipher: BlockCipher) -> Self {
        Self {
            cipher,
            counter: 1,
            keystream: [0u8; 16],
            keystream_pos: 16,
        }
    }

    /// Encrypt or decrypt in place; CTR is symmetric.
    fn process(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            if self.keystream_pos == 16 {
                self.keystream = self.counter.to_le_bytes();
                self.cipher.encrypt_block(&mut self.keystream);
                self.counter = self.counter.wrapping_add(1);
                self.keystream_pos = 0;
            }
            *byte ^= self.keystream[self.keystream_pos];
            self.keystream_pos += 1;
        }
    }
}

struct DerivedKeys {
    ctr: AesCtr,
    mac: HmacSha1,
    verifier: [u8; PASSWORD_VERIFIER_LEN],
}

fn derive_keys(password: &[u8], salt: &[u8], strength: AesStrength) -> Result<DerivedKeys> {
    if salt.len() != strength.salt_len() {
        return Err(ZipError::malformed(format!(
            "AES salt length {} does not match strength (expected {})",
            salt.len(),
            strength.salt_len()
        )));
    }

    let mut derived = vec![0u8; strength.derived_key_len()];
    pbkdf2::pbkdf2_hmac::<Sha1>(password, salt, PBKDF2_ITERATIONS, &mut derived);

    let key_len = strength.key_len();
    let cipher = BlockCipher::new(strength, &derived[..key_len])?;
    let mac = <HmacSha1 as Mac>::new_from_slice(&derived[key_len..key_len * 2])
        .map_err(|_| ZipError::invalid_state("HMAC key rejected"))?;
    let verifier = [derived[key_len * 2], derived[key_len * 2 + 1]];

    Ok(DerivedKeys {
        ctr: AesCtr::new(cipher),
        mac,
        verifier,
    })
}

/// Fill a buffer from the thread-local CSPRNG.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Encrypting side of a WinZip AES entry.
pub struct AesEncryptor {
    ctr: AesCtr,
    mac: HmacSha1,
}

impl AesEncryptor {
    /// Create an encryptor with a fresh random salt.
    ///
    /// Returns the encryptor and the bytes to write before the ciphertext
    /// (salt followed by the password verifier).
    pub fn new(password: &[u8], strength: AesStrength) -> Result<(Self, Vec<u8>)> {
        let salt = random_bytes(strength.salt_len());
        let (encryptor, verifier) = Self::with_salt(password, &salt, strength)?;
        let mut header = salt;
        header.extend_from_slice(&verifier);
        Ok((encryptor, header))
    }

    /// Create an encryptor for a given salt. Returns the password verifier.
    pub fn with_salt(
        password: &[u8],
        salt: &[u8],
        strength: AesStrength,
    ) -> Result<(Self, [u8; PASSWORD_VERIFIER_LEN])> {
        let keys = derive_keys(password, salt, strength)?;
        Ok((
            Self {
                ctr: keys.ctr,
                mac: keys.mac,
            },
            keys.verifier,
        ))
    }

    /// Encrypt in place and authenticate the ciphertext.
    pub fn encrypt(&mut self, data: &mut [u8]) {
        self.ctr.process(data);
        self.mac.update(data);
    }

    /// The 10-byte authentication code written after the ciphertext.
    pub fn finalize(self) -> [u8; AUTH_CODE_LEN] {
        let full = self.mac.finalize().into_bytes();
        let mut code = [0u8; AUTH_CODE_LEN];
        code.copy_from_slice(&full[..AUTH_CODE_LEN]);
        code
    }
}

/// Decrypting side of a WinZip AES entry.
pub struct AesDecryptor {
    ctr: AesCtr,
    mac: HmacSha1,
}

impl AesDecryptor {
    /// Derive keys from the header bytes (salt followed by verifier).
    ///
    /// Returns `Ok(None)` when the password verifier does not match.
    pub fn new(password: &[u8], header: &[u8], strength: AesStrength) -> Result<Option<Self>> {
        if header.len() != strength.header_len() {
            return Err(ZipError::malformed("AES encryption header has the wrong length"));
        }
        let (salt, stored_verifier) = header.split_at(strength.salt_len());
        let keys = derive_keys(password, salt, strength)?;
        if keys.verifier != stored_verifier {
            return Ok(None);
        }
        Ok(Some(Self {
            ctr: keys.ctr,
            mac: keys.mac,
        }))
    }

    /// Authenticate ciphertext bytes in stream order.
    pub fn authenticate(&mut self, ciphertext: &[u8]) {
        self.mac.update(ciphertext);
    }

    /// Decrypt in place.
    pub fn decrypt(&mut self, data: &mut [u8]) {
        self.ctr.process(data);
    }

    /// Check the stored authentication code in constant time.
    pub fn verify(self, code: &[u8]) -> bool {
        code.len() == AUTH_CODE_LEN && self.mac.verify_truncated_left(code).is_ok()
    }
}
