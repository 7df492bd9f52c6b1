//! Traditional PKWARE encryption ("ZipCrypto").
//!
//! A byte-oriented stream cipher keyed by three 32-bit registers. It is weak
//! against known-plaintext attacks and is only offered for interoperability.
//!
//! Every encrypted entry starts with a 12-byte header: 11 random bytes and a
//! check byte, all encrypted. The check byte is the high byte of the entry's
//! CRC-32, or the high byte of the DOS time when the entry uses a data
//! descriptor and the CRC is not known when the header is written.

use rand::RngCore;

/// Length of the encryption header preceding the payload.
pub const HEADER_LEN: usize = 12;

const INITIAL_KEYS: [u32; 3] = [0x1234_5678, 0x2345_6789, 0x3456_7890];

/// Reflected CRC-32 table (polynomial 0xEDB88320) for single-byte key updates.
const CRC_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
};

#[inline]
fn crc_step(crc: u32, byte: u8) -> u32 {
    CRC_TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize] ^ (crc >> 8)
}

/// Check byte expected in the decrypted header.
pub fn check_byte(crc32: u32, dos_time: u16, has_data_descriptor: bool) -> u8 {
    if has_data_descriptor {
        (dos_time >> 8) as u8
    } else {
        (crc32 >> 24) as u8
    }
}

/// Cipher state of one entry.
#[derive(Debug, Clone)]
pub struct ZipCryptoKeys {
    keys: [u32; 3],
}

impl ZipCryptoKeys {
    /// Initialize the registers from a password.
    pub fn new(password: &[u8]) -> Self {
        let mut state = Self { keys: INITIAL_KEYS };
        for &byte in password {
            state.update(byte);
        }
        state
    }

    #[inline]
    fn update(&mut self, plain: u8) {
        let [k0, k1, k2] = &mut self.keys;
        *k0 = crc_step(*k0, plain);
        *k1 = k1
            .wrapping_add(*k0 & 0xFF)
            .wrapping_mul(134_775_813)
            .wrapping_add(1);
        *k2 = crc_step(*k2, (*k1 >> 24) as u8);
    }

    #[inline]
    fn keystream(&self) -> u8 {
        let t = (self.keys[2] | 2) as u16;
        (t.wrapping_mul(t ^ 1) >> 8) as u8
    }

    /// Encrypt in place.
    pub fn encrypt(&mut self, data: &mut [u8]) {
        for byte in data {
            let plain = *byte;
            *byte = plain ^ self.keystream();
            self.update(plain);
        }
    }

    /// Decrypt in place.
    pub fn decrypt(&mut self, data: &mut [u8]) {
        for byte in data {
            let plain = *byte ^ self.keystream();
            *byte = plain;
            self.update(plain);
        }
    }

    /// Produce the encrypted header ending in `check`, using random filler.
    pub fn encrypt_header(&mut self, check: u8) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        rand::thread_rng().fill_bytes(&mut header[..HEADER_LEN - 1]);
        header[HEADER_LEN - 1] = check;
        self.encrypt(&mut header);
        header
    }

    /// Decrypt a header and compare its last byte with `check`.
    ///
    /// A wrong password passes this test with probability 1/256; the CRC or
    /// decompression catches the rest.
    pub fn decrypt_header(&mut self, header: &[u8; HEADER_LEN], check: u8) -> bool {
        let mut plain = *header;
        self.decrypt(&mut plain);
        plain[HEADER_LEN - 1] == check
    }

    #[cfg(test)]
    fn registers(&self) -> [u32; 3] {
        self.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_password_keeps_initial_keys() {
        assert_eq!(ZipCryptoKeys::new(b"").registers(), INITIAL_KEYS);
        assert_ne!(ZipCryptoKeys::new(b"test").registers(), INITIAL_KEYS);
    }

    #[test]
    fn test_crc_table_matches_crc32() {
        // CRC-32 of "a" via the table with the usual pre/post conditioning.
        let crc = !crc_step(0xFFFF_FFFF, b'a');
        assert_eq!(crc, crc32fast::hash(b"a"));
    }

    #[test]
    fn test_roundtrip() {
        let plaintext: Vec<u8> = (0..10_000).map(|i| (i % 251) as u8).collect();
        let mut data = plaintext.clone();
        ZipCryptoKeys::new(b"secret").encrypt(&mut data);
        assert_ne!(data, plaintext);
        ZipCryptoKeys::new(b"secret").decrypt(&mut data);
        assert_eq!(data, plaintext);
    }

    #[test]
    fn test_passwords_give_different_ciphertext() {
        let mut first = b"Test data".to_vec();
        let mut second = first.clone();
        ZipCryptoKeys::new(b"password1").encrypt(&mut first);
        ZipCryptoKeys::new(b"password2").encrypt(&mut second);
        assert_ne!(first, second);
    }

    #[test]
    fn test_header_then_payload() {
        let check = check_byte(0xDEAD_BEEF, 0, false);
        let mut writer = ZipCryptoKeys::new(b"pw");
        let header = writer.encrypt_header(check);
        let mut payload = b"payload".to_vec();
        writer.encrypt(&mut payload);

        let mut reader = ZipCryptoKeys::new(b"pw");
        assert!(reader.decrypt_header(&header, 0xDE));
        reader.decrypt(&mut payload);
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn test_wrong_password_fails_check_usually() {
        let mut writer = ZipCryptoKeys::new(b"correct");
        let header = writer.encrypt_header(0x5A);
        // A single wrong password collides with probability 1/256; try several.
        let all_pass = ["wrong", "wrong2", "wrong3", "wrong4"]
            .iter()
            .all(|pw| ZipCryptoKeys::new(pw.as_bytes()).decrypt_header(&header, 0x5A));
        assert!(!all_pass);
    }

    #[test]
    fn test_check_byte_from_time_with_descriptor() {
        assert_eq!(check_byte(0x1122_3344, 0x5678, true), 0x56);
        assert_eq!(check_byte(0x1122_3344, 0x5678, false), 0x11);
    }
}
