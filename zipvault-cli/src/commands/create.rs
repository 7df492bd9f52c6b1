//! Create command implementation.

use crate::utils::{PasswordPrompt, create_progress_bar};
use clap::ValueEnum;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zipvault_archive::{ArchiveSink, FormatHandle, ZipWriter};
use zipvault_core::config::{self, WriterOptions};
use zipvault_core::entry::{EncryptionMethod, Entry};
use zipvault_core::error::ZipError;

/// Compression level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CompressionArg {
    /// Store without compression
    Store,
    /// Fast compression
    Fast,
    /// Normal compression
    Normal,
    /// Best compression
    Best,
}

impl From<CompressionArg> for config::CompressionLevel {
    fn from(value: CompressionArg) -> Self {
        match value {
            CompressionArg::Store => Self::Store,
            CompressionArg::Fast => Self::Fast,
            CompressionArg::Normal => Self::Normal,
            CompressionArg::Best => Self::Best,
        }
    }
}

/// Encryption method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EncryptionArg {
    /// No encryption
    None,
    /// Traditional PKWARE encryption (weak, for old tools only)
    Zipcrypto,
    /// WinZip AES-128
    Aes128,
    /// WinZip AES-192
    Aes192,
    /// WinZip AES-256
    Aes256,
}

impl From<EncryptionArg> for EncryptionMethod {
    fn from(value: EncryptionArg) -> Self {
        match value {
            EncryptionArg::None => Self::None,
            EncryptionArg::Zipcrypto => Self::ZipCrypto,
            EncryptionArg::Aes128 => Self::Aes128,
            EncryptionArg::Aes192 => Self::Aes192,
            EncryptionArg::Aes256 => Self::Aes256,
        }
    }
}

/// Apply command-line overrides to configured writer options, asking for a
/// password when encryption ends up enabled without one.
pub fn resolve_writer_options(
    mut options: WriterOptions,
    compression: Option<CompressionArg>,
    encryption: Option<EncryptionArg>,
    password: Option<String>,
    comment: Option<String>,
) -> Result<WriterOptions, ZipError> {
    if let Some(level) = compression {
        options.compression = level.into();
    }
    if let Some(method) = encryption {
        options.encryption = method.into();
        options.encrypt = options.encryption.is_encrypted();
    }
    if let Some(password) = password {
        options.password = Some(password.into());
    }
    if let Some(comment) = comment {
        options.comment = Some(comment);
    }
    if options.entry_options().effective_encryption()?.is_encrypted() {
        let mut prompt = PasswordPrompt::new(options.password.take());
        options.password = Some(prompt.require_new()?);
    }
    Ok(options)
}

/// Options for creating an archive.
pub struct CreateOptions {
    pub writer: WriterOptions,
    pub verbose: bool,
    pub progress: bool,
}

pub fn cmd_create(
    archive: &Path,
    files: &[PathBuf],
    options: CreateOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    if files.is_empty() {
        return Err("no input files given".into());
    }
    let file_name = archive.to_string_lossy();
    if !FormatHandle::is_archive_file_name(&file_name) {
        info!(archive = %file_name, "archive name has no ZIP or JAR extension");
    }

    let inputs = collect_inputs(files, archive)?;
    let out = BufWriter::new(File::create(archive)?);
    let mut writer = ZipWriter::seekable_with_options(out, options.writer)?;
    let pb = create_progress_bar(inputs.len() as u64, options.progress && !options.verbose);

    for (path, name) in &inputs {
        pb.set_message(name.clone());
        let entry = add_path(&mut writer, path, name)?;
        if options.verbose {
            println!(
                "  adding: {} ({})",
                entry.name,
                if entry.is_dir() {
                    "directory".to_string()
                } else {
                    format!("{:.1}% saved", entry.space_savings())
                }
            );
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
    writer.close()?;

    println!("Created {} with {} entries", archive.display(), inputs.len());
    Ok(())
}

/// Write one file or directory from disk.
pub(crate) fn add_path<S: ArchiveSink>(
    writer: &mut ZipWriter<S>,
    path: &Path,
    name: &str,
) -> Result<Entry, ZipError> {
    let entry = Entry::from_path(path, name)?;
    writer.begin_entry(entry.clone())?;
    if entry.is_file() {
        let mut input = BufReader::new(File::open(path)?);
        io::copy(&mut input, writer)?;
    }
    writer.end_entry()
}

/// Expand the inputs into `(path, entry name)` pairs, parents first.
///
/// Directories are walked recursively. Entry names are relative to each
/// input's parent and always use `/`. The archive being written is skipped.
pub(crate) fn collect_inputs(
    files: &[PathBuf],
    archive: &Path,
) -> io::Result<Vec<(PathBuf, String)>> {
    let parent = archive
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let archive = fs::canonicalize(parent)
        .map(|dir| dir.join(archive.file_name().unwrap_or_default()))
        .unwrap_or_else(|_| archive.to_path_buf());
    let mut out = Vec::new();
    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("cannot archive {}", path.display()),
                )
            })?;
        walk(path, name, &archive, &mut out)?;
    }
    Ok(out)
}

fn walk(
    path: &Path,
    name: String,
    archive: &Path,
    out: &mut Vec<(PathBuf, String)>,
) -> io::Result<()> {
    if fs::canonicalize(path).is_ok_and(|p| p == archive) {
        debug!(path = %path.display(), "skipping the archive itself");
        return Ok(());
    }
    let is_dir = fs::metadata(path)?.is_dir();
    out.push((path.to_path_buf(), name.clone()));
    if is_dir {
        let mut children: Vec<_> = fs::read_dir(path)?.collect::<io::Result<_>>()?;
        children.sort_by_key(|child| child.file_name());
        for child in children {
            let child_name = format!("{name}/{}", child.file_name().to_string_lossy());
            walk(&child.path(), child_name, archive, out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use zipvault_archive::ZipArchive;
    use zipvault_core::config::{CompressionLevel, ReaderOptions};

    #[test]
    fn test_collect_inputs_walks_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("tree");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("b.txt"), b"b").unwrap();
        fs::write(root.join("sub/a.txt"), b"a").unwrap();

        let inputs = collect_inputs(&[root], &dir.path().join("out.zip")).unwrap();
        let names: Vec<_> = inputs.iter().map(|(_, name)| name.as_str()).collect();
        assert_eq!(names, ["tree", "tree/b.txt", "tree/sub", "tree/sub/a.txt"]);
    }

    #[test]
    fn test_create_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("data.txt"), "line\n".repeat(100)).unwrap();
        let archive = dir.path().join("out.zip");

        let writer = WriterOptions::new()
            .with_compression(CompressionLevel::Best)
            .with_encryption(EncryptionMethod::Aes128, "pw");
        let options = CreateOptions {
            writer,
            verbose: false,
            progress: false,
        };
        cmd_create(&archive, &[src], options).unwrap();

        let zip = ZipArchive::open(File::open(&archive).unwrap(), ReaderOptions::new().with_password("pw"))
            .unwrap();
        assert!(zip.by_name("src/").unwrap().is_dir());
        assert_eq!(zip.read_to_vec("src/data.txt").unwrap(), "line\n".repeat(100).as_bytes());
    }

    #[test]
    fn test_resolve_overrides() {
        let options = resolve_writer_options(
            WriterOptions::new(),
            Some(CompressionArg::Store),
            Some(EncryptionArg::Aes256),
            Some("pw".to_string()),
            Some("note".to_string()),
        )
        .unwrap();
        assert_eq!(options.compression, CompressionLevel::Store);
        assert!(options.encrypt);
        assert_eq!(options.encryption, EncryptionMethod::Aes256);
        assert_eq!(options.comment.as_deref(), Some("note"));
    }
}
