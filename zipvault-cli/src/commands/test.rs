//! Test command implementation.

use crate::utils::{PasswordPrompt, open_entry};
use std::path::Path;
use zipvault_archive::ZipArchive;
use zipvault_archive::zip::open_zip;
use zipvault_core::config::ReaderOptions;
use zipvault_core::error::ZipError;
use zipvault_core::source::ReadAt;

/// Result of verifying every entry of an archive.
#[derive(Debug, Default)]
pub(crate) struct TestReport {
    pub ok: usize,
    pub failures: Vec<(String, ZipError)>,
}

impl TestReport {
    fn total(&self) -> usize {
        self.ok + self.failures.len()
    }
}

pub fn cmd_test(
    archive: &Path,
    reader_options: ReaderOptions,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut prompt = PasswordPrompt::new(reader_options.password.clone());
    let zip = open_zip(archive, reader_options)?;
    println!("Testing {}", archive.display());

    let mut report = test_archive(&zip, &mut prompt, verbose);
    println!();
    println!(
        "Tested {} entries: {} OK, {} failed",
        report.total(),
        report.ok,
        report.failures.len()
    );
    if report.failures.is_empty() {
        println!("All entries OK");
        return Ok(());
    }

    for (name, err) in &report.failures {
        eprintln!("  {name}: {err}");
    }
    // Password problems decide the exit status over integrity failures.
    match report.failures.iter().position(|(_, err)| err.is_password_error()) {
        Some(index) => Err(report.failures.swap_remove(index).1.into()),
        None => Err(format!(
            "{} of {} entries failed verification",
            report.failures.len(),
            report.total()
        )
        .into()),
    }
}

/// Decode every file entry and check CRC-32, sizes and AES authentication.
pub(crate) fn test_archive<S: ReadAt>(
    zip: &ZipArchive<S>,
    prompt: &mut PasswordPrompt,
    verbose: bool,
) -> TestReport {
    let mut report = TestReport::default();
    for (index, entry) in zip.entries().iter().enumerate() {
        if entry.is_dir() {
            continue;
        }
        let verified = open_entry(zip, index, prompt).and_then(|reader| reader.verify());
        match verified {
            Ok(decoded) => {
                report.ok += 1;
                if verbose {
                    println!("  OK: {} (crc {:08x})", entry.name, decoded.crc32);
                }
            }
            Err(err) => {
                if verbose {
                    println!("  FAILED: {} - {}", entry.name, err);
                }
                report.failures.push((entry.name.clone(), err));
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use zipvault_archive::ZipWriter;
    use zipvault_core::config::WriterOptions;
    use zipvault_core::entry::EncryptionMethod;

    #[test]
    fn test_report_counts_failures() {
        let mut writer = ZipWriter::new(Vec::new());
        writer.add_file("good.txt", b"fine").unwrap();
        writer.add_file("bad.txt", &b"corrupt me ".repeat(30)).unwrap();
        writer.add_directory("dir").unwrap();
        let mut bytes = writer.into_inner().unwrap();

        // Flip the CRC-32 of bad.txt in the central directory.
        let cd = bytes.windows(4).rposition(|w| w == b"PK\x01\x02").unwrap();
        let cd = bytes[..cd].windows(4).rposition(|w| w == b"PK\x01\x02").unwrap();
        bytes[cd + 16] ^= 0xFF;

        let zip = ZipArchive::open(bytes, ReaderOptions::default()).unwrap();
        let report = test_archive(&zip, &mut PasswordPrompt::non_interactive(None), false);
        assert_eq!(report.ok, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "bad.txt");
        assert!(report.failures[0].1.is_integrity_error());
    }

    #[test]
    fn test_wrong_password_is_reported() {
        let options = WriterOptions::new().with_encryption(EncryptionMethod::Aes192, "right");
        let mut writer = ZipWriter::with_options(Vec::new(), options);
        writer.add_file("a", b"a").unwrap();
        let bytes = writer.into_inner().unwrap();

        let zip = ZipArchive::open(bytes, ReaderOptions::default()).unwrap();
        let mut prompt = PasswordPrompt::non_interactive(Some("wrong".into()));
        let report = test_archive(&zip, &mut prompt, false);
        assert_eq!(report.ok, 0);
        let err = &report.failures[0].1;
        assert!(err.is_password_error() || err.is_integrity_error(), "{err}");
    }
}
