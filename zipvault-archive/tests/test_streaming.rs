use std::io::{Read, Write};

use zipvault_archive::zip::record::DATA_DESCRIPTOR_SIG;
use zipvault_archive::zip::{ZipArchive, ZipStreamReader, ZipWriter};
use zipvault_core::config::{CompressionLevel, ReaderOptions, WriterOptions};
use zipvault_core::entry::{CompressionMethod, EncryptionMethod, Entry};
use zipvault_core::error::ZipError;

/// Reads an input one byte per call to exercise buffer boundaries.
struct Trickle<'a>(&'a [u8]);

impl Read for Trickle<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match (self.0.split_first(), buf.first_mut()) {
            (Some((&byte, rest)), Some(slot)) => {
                *slot = byte;
                self.0 = rest;
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

fn read_all<R: Read>(reader: &mut ZipStreamReader<R>) -> Vec<(String, Vec<u8>)> {
    let mut out = Vec::new();
    while let Some(entry) = reader.next_entry().unwrap() {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).unwrap();
        out.push((entry.name, data));
    }
    out
}

#[test]
fn test_deferred_entries_use_descriptors() -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = ZipWriter::new(Vec::new());
    let entry = writer.add_file("a.txt", &b"abc".repeat(1000))?;
    assert!(entry.has_data_descriptor());
    let bytes = writer.into_inner()?;
    let sig = DATA_DESCRIPTOR_SIG.to_le_bytes();
    assert!(bytes.windows(4).any(|w| w == sig));

    let mut reader = ZipStreamReader::new(&bytes[..]);
    let opened = reader.next_entry()?.expect("entry");
    assert_eq!(opened.size(), None);
    assert_eq!(opened.crc32(), None);
    let closed = reader.close_entry()?.expect("entry");
    assert_eq!(closed.size(), Some(3000));
    assert_eq!(closed.compressed_size, entry.compressed_size);
    Ok(())
}

#[test]
fn test_stored_payload_containing_descriptor_signature() -> Result<(), Box<dyn std::error::Error>> {
    // A fake descriptor inside the payload whose sizes cannot match.
    let mut payload = b"prefix".to_vec();
    payload.extend_from_slice(&DATA_DESCRIPTOR_SIG.to_le_bytes());
    payload.extend_from_slice(&[0xAA; 12]);
    payload.extend_from_slice(&DATA_DESCRIPTOR_SIG.to_le_bytes());
    payload.extend_from_slice(b"suffix");

    for encryption in [EncryptionMethod::None, EncryptionMethod::Aes256] {
        let mut options = WriterOptions::new().with_compression(CompressionLevel::Store);
        if encryption.is_encrypted() {
            options = options.with_encryption(encryption, "pw");
        }
        let mut writer = ZipWriter::with_options(Vec::new(), options);
        writer.add_file("tricky.bin", &payload)?;
        writer.add_file("after.txt", b"next")?;
        let bytes = writer.into_inner()?;

        let options = ReaderOptions::new().with_password("pw");
        let mut reader = ZipStreamReader::with_options(Trickle(&bytes), options);
        let entries = read_all(&mut reader);
        assert_eq!(entries.len(), 2, "{encryption}");
        assert_eq!(entries[0].1, payload);
        assert_eq!(entries[1], ("after.txt".to_string(), b"next".to_vec()));
    }
    Ok(())
}

#[test]
fn test_many_deferred_entries_across_buffers() {
    let mut writer = ZipWriter::with_options(
        Vec::new(),
        WriterOptions::new().with_encryption(EncryptionMethod::ZipCrypto, "zc"),
    );
    let mut expected = Vec::new();
    for i in 0..20u32 {
        let data: Vec<u8> = (0..i * 1_500).map(|b| (b * 31 % 251) as u8).collect();
        let name = format!("entry{i:02}.bin");
        writer.add_file(&name, &data).unwrap();
        expected.push((name, data));
    }
    let bytes = writer.into_inner().unwrap();

    let mut reader =
        ZipStreamReader::with_options(&bytes[..], ReaderOptions::new().with_password("zc"));
    assert_eq!(read_all(&mut reader), expected);
}

#[test]
fn test_partial_reads_then_next() -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = ZipWriter::new(Vec::new());
    writer.add_file("big.txt", &b"0123456789".repeat(10_000))?;
    writer.add_file("small.txt", b"tail")?;
    let bytes = writer.into_inner()?;

    let mut reader = ZipStreamReader::new(&bytes[..]);
    reader.next_entry()?;
    let mut head = [0u8; 10];
    reader.read_exact(&mut head)?;
    assert_eq!(&head, b"0123456789");

    let next = reader.next_entry()?.expect("second entry");
    assert_eq!(next.name, "small.txt");
    let mut tail = String::new();
    reader.read_to_string(&mut tail)?;
    assert_eq!(tail, "tail");
    Ok(())
}

#[test]
fn test_crc_failure_allows_next_entry() {
    let mut writer = ZipWriter::with_options(
        Vec::new(),
        WriterOptions::new().with_compression(CompressionLevel::Store),
    );
    let declared = Entry::file("bad.txt")
        .with_method(CompressionMethod::Stored)
        .with_size(5)
        .with_crc32(crc32fast::hash(b"hello"));
    writer.begin_entry(declared).unwrap();
    writer.write_all(b"hello").unwrap();
    writer.end_entry().unwrap();
    writer.add_file("good.txt", b"fine").unwrap();
    let mut bytes = writer.into_inner().unwrap();

    // Corrupt the stored payload of the first entry.
    let at = bytes.windows(5).position(|w| w == b"hello").unwrap();
    bytes[at] = b'j';

    let mut reader = ZipStreamReader::new(&bytes[..]);
    reader.next_entry().unwrap().unwrap();
    let err = reader.next_entry().unwrap_err();
    assert!(matches!(err, ZipError::CrcMismatch { .. }), "{err}");

    let next = reader.next_entry().unwrap().unwrap();
    assert_eq!(next.name, "good.txt");
}

#[test]
fn test_read_reports_crc_failure() {
    let bytes = {
        let mut writer = ZipWriter::new(Vec::new());
        writer.add_file("x.txt", &b"payload ".repeat(64)).unwrap();
        writer.into_inner().unwrap()
    };
    let archive = ZipArchive::open(&bytes[..], ReaderOptions::default()).unwrap();
    let crc = archive.by_name("x.txt").unwrap().crc32().unwrap();

    // Flip the CRC in the data descriptor; the payload itself stays valid.
    let mut corrupted = bytes.clone();
    let sig = DATA_DESCRIPTOR_SIG.to_le_bytes();
    let at = corrupted.windows(4).position(|w| w == sig).unwrap();
    corrupted[at + 4..at + 8].copy_from_slice(&(crc ^ 1).to_le_bytes());

    let mut reader = ZipStreamReader::new(&corrupted[..]);
    reader.next_entry().unwrap();
    let mut sink = Vec::new();
    let err = ZipError::from(reader.read_to_end(&mut sink).unwrap_err());
    assert!(matches!(err, ZipError::CrcMismatch { .. }), "{err}");
    // The failure was already reported; the stream moves on.
    assert!(reader.next_entry().unwrap().is_none());
}

#[test]
fn test_jar_style_descriptor_without_signature() {
    // Hand-built DEFLATE entry with flag bit 3 and a descriptor lacking its signature.
    use flate2::Compression;
    use flate2::write::DeflateEncoder;

    let data = b"unsigned descriptor payload".repeat(10);
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&data).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut bytes = Vec::new();
    bytes.extend_from_slice(&0x04034B50u32.to_le_bytes());
    bytes.extend_from_slice(&20u16.to_le_bytes());
    bytes.extend_from_slice(&0x0008u16.to_le_bytes());
    bytes.extend_from_slice(&8u16.to_le_bytes());
    bytes.extend_from_slice(&[0, 0, 0x21, 0]); // 1980-01-01
    bytes.extend_from_slice(&[0; 12]);
    bytes.extend_from_slice(&5u16.to_le_bytes());
    bytes.extend_from_slice(&0u16.to_le_bytes());
    bytes.extend_from_slice(b"j.txt");
    bytes.extend_from_slice(&compressed);
    bytes.extend_from_slice(&crc32fast::hash(&data).to_le_bytes());
    bytes.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());

    let mut reader = ZipStreamReader::new(&bytes[..]);
    let entries = read_all(&mut reader);
    assert_eq!(entries, vec![("j.txt".to_string(), data)]);
}
