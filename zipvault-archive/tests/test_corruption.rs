use std::io::Read;

use zipvault_archive::zip::record::END_OF_CENTRAL_DIR_SIG;
use zipvault_archive::zip::{ZipArchive, ZipStreamReader, ZipWriter};
use zipvault_core::config::{CompressionLevel, ReaderOptions, WriterOptions};
use zipvault_core::entry::EncryptionMethod;
use zipvault_core::error::ZipError;

const PAYLOAD: &[u8] = b"The quick brown fox jumps over the lazy dog. 0123456789";

fn archive_with(options: WriterOptions) -> Vec<u8> {
    let mut writer = ZipWriter::with_options(Vec::new(), options);
    writer.add_file("fox.txt", &PAYLOAD.repeat(20)).unwrap();
    writer.into_inner().unwrap()
}

/// Offset of the first payload byte of the first entry.
fn payload_start(bytes: &[u8]) -> usize {
    let name_len = u16::from_le_bytes([bytes[26], bytes[27]]) as usize;
    let extra_len = u16::from_le_bytes([bytes[28], bytes[29]]) as usize;
    30 + name_len + extra_len
}

fn extract_error(bytes: &[u8], options: ReaderOptions) -> ZipError {
    let archive = ZipArchive::open(bytes, options).unwrap();
    archive.read_to_vec("fox.txt").unwrap_err()
}

#[test]
fn test_flipped_stored_byte_is_crc_mismatch() {
    let mut bytes = archive_with(WriterOptions::new().with_compression(CompressionLevel::Store));
    let at = payload_start(&bytes) + 5;
    bytes[at] ^= 0x20;

    let err = extract_error(&bytes, ReaderOptions::default());
    assert!(matches!(err, ZipError::CrcMismatch { ref name, .. } if name == "fox.txt"), "{err}");
}

#[test]
fn test_tampered_aes_payload_fails_authentication() {
    let options = WriterOptions::new()
        .with_compression(CompressionLevel::Store)
        .with_encryption(EncryptionMethod::Aes256, "pw");
    let mut bytes = archive_with(options);
    // Past the 16-byte salt and 2-byte verifier.
    let at = payload_start(&bytes) + 18 + 40;
    bytes[at] ^= 0x01;

    let err = extract_error(&bytes, ReaderOptions::new().with_password("pw"));
    assert!(matches!(err, ZipError::AuthenticationFailed { .. }), "{err}");

    let mut reader = ZipStreamReader::with_options(&bytes[..], ReaderOptions::new().with_password("pw"));
    reader.next_entry().unwrap().unwrap();
    let mut sink = Vec::new();
    let err = ZipError::from(reader.read_to_end(&mut sink).unwrap_err());
    assert!(matches!(err, ZipError::AuthenticationFailed { .. }), "{err}");
}

#[test]
fn test_aes_wrong_password_detected_by_verifier() {
    let bytes = archive_with(WriterOptions::new().with_encryption(EncryptionMethod::Aes128, "right"));
    let err = extract_error(&bytes, ReaderOptions::new().with_password("wrong"));
    // The two-byte verifier lets one password in 65536 through to the HMAC.
    assert!(err.is_password_error() || err.is_integrity_error(), "{err}");
}

#[test]
fn test_missing_end_record() {
    let bytes = archive_with(WriterOptions::new());
    let sig = END_OF_CENTRAL_DIR_SIG.to_le_bytes();
    let at = bytes.windows(4).rposition(|w| w == sig).unwrap();

    let err = ZipArchive::open(&bytes[..at], ReaderOptions::default()).unwrap_err();
    assert!(err.is_malformed(), "{err}");
}

#[test]
fn test_truncated_inputs() {
    let bytes = archive_with(WriterOptions::new());

    // Too short to hold an end record at all.
    let err = ZipArchive::open(&bytes[..10], ReaderOptions::default()).unwrap_err();
    assert!(err.is_malformed(), "{err}");

    // Cut in the middle of the payload: the stream runs dry.
    let cut = payload_start(&bytes) + 10;
    let mut reader = ZipStreamReader::new(&bytes[..cut]);
    reader.next_entry().unwrap().unwrap();
    let mut sink = Vec::new();
    let err = ZipError::from(reader.read_to_end(&mut sink).unwrap_err());
    assert!(err.is_malformed() || matches!(err, ZipError::Io(_)), "{err}");

    // Cut inside the local header.
    let mut reader = ZipStreamReader::new(&bytes[..20]);
    let err = reader.next_entry().unwrap_err();
    assert!(err.is_malformed(), "{err}");
}

#[test]
fn test_corrupt_central_directory_signature() {
    let mut bytes = archive_with(WriterOptions::new());
    let cd = bytes
        .windows(4)
        .position(|w| w == b"PK\x01\x02")
        .unwrap();
    bytes[cd + 3] = 0x09;

    let err = ZipArchive::open(&bytes[..], ReaderOptions::default()).unwrap_err();
    assert!(err.is_malformed(), "{err}");
}

#[test]
fn test_entry_count_larger_than_directory() {
    let mut bytes = archive_with(WriterOptions::new());
    let eocd = bytes.len() - 22;
    bytes[eocd + 10..eocd + 12].copy_from_slice(&500u16.to_le_bytes());
    bytes[eocd + 8..eocd + 10].copy_from_slice(&500u16.to_le_bytes());

    let err = ZipArchive::open(&bytes[..], ReaderOptions::default()).unwrap_err();
    assert!(err.is_malformed(), "{err}");
}

#[test]
fn test_unsupported_method_is_reported() {
    let mut bytes = archive_with(WriterOptions::new());
    // LZMA (14) in both the local and the central header.
    bytes[8..10].copy_from_slice(&14u16.to_le_bytes());
    let cd = bytes
        .windows(4)
        .position(|w| w == b"PK\x01\x02")
        .unwrap();
    bytes[cd + 10..cd + 12].copy_from_slice(&14u16.to_le_bytes());

    let archive = ZipArchive::open(&bytes[..], ReaderOptions::default()).unwrap();
    let err = archive.read_to_vec("fox.txt").unwrap_err();
    assert!(matches!(err, ZipError::Unsupported { .. }), "{err}");

    // The stream reader cannot skip it: its size sits behind a descriptor.
    let mut reader = ZipStreamReader::new(&bytes[..]);
    let err = reader.next_entry().unwrap_err();
    assert!(matches!(err, ZipError::Unsupported { .. }), "{err}");
}
