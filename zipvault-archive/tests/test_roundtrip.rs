use std::io::{Read, Write};
use std::time::{Duration, UNIX_EPOCH};

use zipvault_archive::zip::{ZipArchive, ZipStreamReader, ZipWriter};
use zipvault_core::config::{CompressionLevel, ReaderOptions, WriterOptions};
use zipvault_core::entry::{CompressionMethod, EncryptionMethod, Entry};
use zipvault_core::error::ZipError;

fn write_one(options: WriterOptions, name: &str, data: &[u8]) -> Vec<u8> {
    let mut writer = ZipWriter::with_options(Vec::new(), options);
    writer.begin_entry(Entry::file(name)).unwrap();
    writer.write_all(data).unwrap();
    writer.end_entry().unwrap();
    writer.into_inner().unwrap()
}

#[test]
fn test_stored_entry_streams_back() -> Result<(), Box<dyn std::error::Error>> {
    let options = WriterOptions::new().with_compression(CompressionLevel::Store);
    let bytes = write_one(options, "a.txt", b"hello");

    let mut reader = ZipStreamReader::new(&bytes[..]);
    let entry = reader.next_entry()?.expect("entry");
    assert_eq!(entry.name, "a.txt");
    assert_eq!(entry.method(), CompressionMethod::Stored);

    let mut payload = Vec::new();
    reader.read_to_end(&mut payload)?;
    assert_eq!(payload, b"hello");
    assert_eq!(reader.current_entry().and_then(Entry::size), Some(5));
    assert!(reader.next_entry()?.is_none());
    Ok(())
}

#[test]
fn test_aes256_random_access() -> Result<(), Box<dyn std::error::Error>> {
    let options = WriterOptions::new().with_encryption(EncryptionMethod::Aes256, "secret");
    let bytes = write_one(options, "a.txt", b"hello");

    let archive = ZipArchive::open(&bytes[..], ReaderOptions::new().with_password("secret"))?;
    let entry = archive.by_name("a.txt").expect("entry");
    assert_eq!(entry.encryption, EncryptionMethod::Aes256);
    assert_eq!(archive.read_to_vec("a.txt")?, b"hello");

    let err = archive
        .extract_with_password("a.txt", Some(b"wrong"))
        .and_then(|mut reader| {
            let mut sink = Vec::new();
            reader.read_to_end(&mut sink)?;
            Ok(sink)
        })
        .unwrap_err();
    assert!(
        err.is_password_error() || err.is_integrity_error(),
        "unexpected error {err}"
    );
    Ok(())
}

#[test]
fn test_every_encryption_method_roundtrips() -> Result<(), Box<dyn std::error::Error>> {
    let data = "Encrypted payload. ".repeat(200);
    for method in [
        EncryptionMethod::ZipCrypto,
        EncryptionMethod::Aes128,
        EncryptionMethod::Aes192,
        EncryptionMethod::Aes256,
    ] {
        for level in [CompressionLevel::Store, CompressionLevel::Best] {
            let options = WriterOptions::new()
                .with_compression(level)
                .with_encryption(method, "pässword");
            let bytes = write_one(options, "data.txt", data.as_bytes());

            let read_options = ReaderOptions::new().with_password("pässword");
            let archive = ZipArchive::open(&bytes[..], read_options.clone())?;
            assert_eq!(archive.read_to_vec("data.txt")?, data.as_bytes(), "{method} {level:?}");

            let mut reader = ZipStreamReader::with_options(&bytes[..], read_options);
            reader.next_entry()?.expect("entry");
            let mut streamed = Vec::new();
            reader.read_to_end(&mut streamed)?;
            assert_eq!(streamed, data.as_bytes(), "{method} {level:?} streamed");
        }
    }
    Ok(())
}

#[test]
fn test_missing_password_is_distinct() {
    let options = WriterOptions::new().with_encryption(EncryptionMethod::Aes128, "pw");
    let bytes = write_one(options, "a.txt", b"hello");

    let archive = ZipArchive::open(&bytes[..], ReaderOptions::default()).unwrap();
    assert!(matches!(
        archive.extract("a.txt").err().unwrap(),
        ZipError::PasswordRequired { .. }
    ));

    let mut reader = ZipStreamReader::new(&bytes[..]);
    assert!(matches!(
        reader.next_entry(),
        Err(ZipError::PasswordRequired { .. })
    ));
}

#[test]
fn test_zipcrypto_wrong_password() {
    let options = WriterOptions::new().with_encryption(EncryptionMethod::ZipCrypto, "right");
    let bytes = write_one(options, "a.txt", b"hello");
    let archive = ZipArchive::open(&bytes[..], ReaderOptions::new().with_password("wrong")).unwrap();

    // One in 256 wrong passwords passes the check byte; the CRC catches it.
    match archive.read_to_vec("a.txt") {
        Err(err) => assert!(err.is_password_error() || err.is_integrity_error(), "{err}"),
        Ok(data) => panic!("wrong password produced {} bytes", data.len()),
    }
}

#[test]
fn test_directory_entries() -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = ZipWriter::new(Vec::new());
    let entry = writer.add_directory("dir")?;
    assert_eq!(entry.name, "dir/");
    writer.begin_entry(Entry::directory("other/"))?;
    writer.end_entry()?;
    let bytes = writer.into_inner()?;

    let archive = ZipArchive::open(&bytes[..], ReaderOptions::default())?;
    for name in ["dir/", "other/"] {
        let entry = archive.by_name(name).expect("directory");
        assert!(entry.is_dir());
        assert_eq!(entry.size(), Some(0));
        assert_eq!(entry.crc32(), Some(0));
    }

    let mut reader = ZipStreamReader::new(&bytes[..]);
    let entry = reader.next_entry()?.expect("directory");
    assert!(entry.is_dir());
    assert_eq!(entry.size(), Some(0));
    Ok(())
}

#[test]
fn test_entry_count_matches_writes() -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = ZipWriter::new(Vec::new());
    for i in 0..25 {
        writer.add_file(&format!("file{i}.txt"), format!("content {i}").as_bytes())?;
    }
    writer.add_directory("empty")?;
    assert_eq!(writer.len(), 26);
    let bytes = writer.into_inner()?;

    let archive = ZipArchive::open(&bytes[..], ReaderOptions::default())?;
    assert_eq!(archive.len(), 26);
    for i in 0..25 {
        let data = archive.read_to_vec(&format!("file{i}.txt"))?;
        assert_eq!(data, format!("content {i}").as_bytes());
    }

    let offsets: Vec<u64> = archive.entries().iter().map(|e| e.header_offset).collect();
    assert!(offsets.windows(2).all(|pair| pair[0] < pair[1]));
    Ok(())
}

#[test]
fn test_multifile_deflate() -> Result<(), Box<dyn std::error::Error>> {
    let files = [
        ("file1.txt", "Test data file 1. ".repeat(100)),
        ("file2.txt", "File 2 with different content. ".repeat(100)),
        ("file3.txt", "Third file data here. ".repeat(100)),
    ];
    let mut writer = ZipWriter::with_options(
        Vec::new(),
        WriterOptions::new().with_compression(CompressionLevel::Normal),
    );
    for (name, data) in &files {
        writer.add_file(name, data.as_bytes())?;
    }
    let bytes = writer.into_inner()?;

    let archive = ZipArchive::open(&bytes[..], ReaderOptions::default())?;
    for (name, data) in &files {
        let entry = archive.by_name(name).expect("entry");
        assert_eq!(entry.method(), CompressionMethod::Deflate);
        assert!(entry.compressed_size.unwrap() < data.len() as u64);
        assert_eq!(archive.read_to_vec(name)?, data.as_bytes());
    }
    Ok(())
}

#[test]
fn test_timestamps_keep_whole_seconds() -> Result<(), Box<dyn std::error::Error>> {
    let odd_second = UNIX_EPOCH + Duration::from_millis(1_234_567_891_999);
    let before_dos = UNIX_EPOCH + Duration::from_secs(86_400);
    let mut writer = ZipWriter::new(Vec::new());
    writer.begin_entry(Entry::file("odd.txt").with_modified(odd_second))?;
    writer.end_entry()?;
    writer.begin_entry(Entry::file("early.txt").with_modified(before_dos))?;
    writer.end_entry()?;
    let bytes = writer.into_inner()?;

    let archive = ZipArchive::open(&bytes[..], ReaderOptions::default())?;
    assert_eq!(
        archive.by_name("odd.txt").unwrap().modified,
        UNIX_EPOCH + Duration::from_secs(1_234_567_891)
    );
    assert_eq!(archive.by_name("early.txt").unwrap().modified, before_dos);

    let mut reader = ZipStreamReader::new(&bytes[..]);
    let entry = reader.next_entry()?.unwrap();
    assert_eq!(entry.modified, UNIX_EPOCH + Duration::from_secs(1_234_567_891));
    Ok(())
}

#[test]
fn test_timestamps_past_2038_keep_whole_seconds() -> Result<(), Box<dyn std::error::Error>> {
    // 2040-01-01T00:00:01Z, an odd second past the 32-bit Unix range.
    let late = UNIX_EPOCH + Duration::from_secs(2_208_988_801);
    let mut writer = ZipWriter::new(Vec::new());
    writer.begin_entry(Entry::file("late.txt").with_modified(late))?;
    writer.write_all(b"future")?;
    writer.end_entry()?;
    let bytes = writer.into_inner()?;

    let archive = ZipArchive::open(&bytes[..], ReaderOptions::default())?;
    assert_eq!(archive.by_name("late.txt").unwrap().modified, late);

    let mut reader = ZipStreamReader::new(&bytes[..]);
    let entry = reader.next_entry()?.unwrap();
    assert_eq!(entry.modified, late);
    Ok(())
}

#[test]
fn test_unicode_names_and_comments() -> Result<(), Box<dyn std::error::Error>> {
    let options = WriterOptions::new().with_comment("archive notes");
    let mut writer = ZipWriter::with_options(Vec::new(), options);
    writer.begin_entry(Entry::file("日本語/ファイル.txt").with_comment("entry note"))?;
    writer.write_all("こんにちは".as_bytes())?;
    let closed = writer.end_entry()?;
    assert_ne!(closed.flags & zipvault_core::entry::FLAG_UTF8, 0);
    let bytes = writer.into_inner()?;

    let archive = ZipArchive::open(&bytes[..], ReaderOptions::default())?;
    assert_eq!(archive.comment(), "archive notes");
    let entry = archive.by_name("日本語/ファイル.txt").expect("entry");
    assert_eq!(entry.comment.as_deref(), Some("entry note"));
    assert_eq!(archive.read_to_vec(&entry.name)?, "こんにちは".as_bytes());
    Ok(())
}

#[test]
fn test_empty_payloads() -> Result<(), Box<dyn std::error::Error>> {
    for level in [CompressionLevel::Store, CompressionLevel::Fast] {
        let bytes = write_one(WriterOptions::new().with_compression(level), "empty", b"");
        let archive = ZipArchive::open(&bytes[..], ReaderOptions::default())?;
        assert_eq!(archive.by_name("empty").unwrap().size(), Some(0));
        assert!(archive.read_to_vec("empty")?.is_empty());

        let mut reader = ZipStreamReader::new(&bytes[..]);
        reader.next_entry()?.unwrap();
        let closed = reader.close_entry()?.unwrap();
        assert_eq!(closed.size(), Some(0));
    }
    Ok(())
}

#[test]
fn test_duplicate_names_first_wins() -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = ZipWriter::new(Vec::new());
    writer.add_file("same.txt", b"first")?;
    writer.add_file("same.txt", b"second")?;
    let bytes = writer.into_inner()?;

    let archive = ZipArchive::open(&bytes[..], ReaderOptions::default())?;
    assert_eq!(archive.len(), 2);
    assert_eq!(archive.read_to_vec("same.txt")?, b"first");
    let mut second = Vec::new();
    archive.extract_index(1, None)?.read_to_end(&mut second)?;
    assert_eq!(second, b"second");
    Ok(())
}
