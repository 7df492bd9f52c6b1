use std::io::Read;
use std::sync::Arc;
use std::thread;

use zipvault_archive::zip::{ZipArchive, ZipWriter};
use zipvault_core::config::{ReaderOptions, WriterOptions};
use zipvault_core::entry::EncryptionMethod;
use zipvault_core::source::ReadAt;

fn content(i: usize) -> Vec<u8> {
    format!("entry {i} ").repeat(500 + i * 13).into_bytes()
}

fn build(count: usize, options: WriterOptions) -> Vec<u8> {
    let mut writer = ZipWriter::with_options(Vec::new(), options);
    for i in 0..count {
        writer.add_file(&format!("e{i:03}.txt"), &content(i)).unwrap();
    }
    writer.into_inner().unwrap()
}

fn extract_all_concurrently<S: ReadAt + Sync>(archive: &ZipArchive<S>, count: usize) {
    thread::scope(|scope| {
        for worker in 0..8 {
            scope.spawn(move || {
                for round in 0..3 {
                    for i in (worker + round..count).step_by(8) {
                        let data = archive.read_to_vec(&format!("e{i:03}.txt")).unwrap();
                        assert_eq!(data, content(i), "worker {worker} entry {i}");
                    }
                }
            });
        }
    });
}

#[test]
fn test_concurrent_extract_from_memory() {
    let bytes = build(40, WriterOptions::new());
    let archive = ZipArchive::open(&bytes[..], ReaderOptions::default()).unwrap();
    extract_all_concurrently(&archive, 40);
}

#[test]
fn test_concurrent_extract_encrypted_from_file() {
    let options = WriterOptions::new().with_encryption(EncryptionMethod::Aes128, "shared");
    let bytes = build(16, options);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, &bytes).unwrap();

    let archive = zipvault_archive::zip::open_zip(
        file.path(),
        ReaderOptions::new().with_password("shared"),
    )
    .unwrap();
    extract_all_concurrently(&archive, 16);
}

#[test]
fn test_interleaved_readers_on_one_thread() {
    let bytes = build(2, WriterOptions::new());
    let archive = ZipArchive::open(&bytes[..], ReaderOptions::default()).unwrap();
    let mut first = archive.extract("e000.txt").unwrap();
    let mut second = archive.extract("e001.txt").unwrap();

    let mut a = Vec::new();
    let mut b = Vec::new();
    let mut chunk = [0u8; 97];
    loop {
        let n = first.read(&mut chunk).unwrap();
        a.extend_from_slice(&chunk[..n]);
        let m = second.read(&mut chunk).unwrap();
        b.extend_from_slice(&chunk[..m]);
        if n == 0 && m == 0 {
            break;
        }
    }
    assert_eq!(a, content(0));
    assert_eq!(b, content(1));
}

#[test]
fn test_shared_archive_across_spawned_threads() {
    let bytes = Arc::new(build(4, WriterOptions::new()));
    let archive = Arc::new(ZipArchive::open(Arc::clone(&bytes), ReaderOptions::default()).unwrap());
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let archive = Arc::clone(&archive);
            thread::spawn(move || archive.read_to_vec(&format!("e{i:03}.txt")).unwrap())
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap(), content(i));
    }
}

#[cfg(feature = "mmap")]
#[test]
fn test_concurrent_extract_from_mmap() {
    use zipvault_core::mmap::MmapSource;

    let bytes = build(24, WriterOptions::new());
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, &bytes).unwrap();

    let source = MmapSource::open(file.path()).unwrap();
    let archive = ZipArchive::open(source, ReaderOptions::default()).unwrap();
    extract_all_concurrently(&archive, 24);
}
