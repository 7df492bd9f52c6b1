//! Extract command implementation.

use crate::utils::{PasswordPrompt, create_progress_bar, open_entry, select_entries};
use filetime::FileTime;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zipvault_archive::ZipArchive;
use zipvault_archive::zip::open_zip;
use zipvault_core::config::ReaderOptions;
use zipvault_core::entry::Entry;
use zipvault_core::error::ZipError;
use zipvault_core::source::ReadAt;

/// Options for extracting archive contents.
pub struct ExtractOptions<'a> {
    pub output: &'a Path,
    pub files: &'a [String],
    pub include: &'a [String],
    pub exclude: &'a [String],
    pub overwrite: bool,
    pub verbose: bool,
    pub progress: bool,
}

/// What happened to one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Written,
    Skipped,
}

pub fn cmd_extract(
    archive: &Path,
    reader_options: ReaderOptions,
    options: &ExtractOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut prompt = PasswordPrompt::new(reader_options.password.clone());
    let zip = open_zip(archive, reader_options)?;
    let (written, skipped) = extract_archive(&zip, &mut prompt, options)?;

    println!(
        "Extracted {written} entries to {}{}",
        options.output.display(),
        if skipped > 0 {
            format!(" ({skipped} existing skipped)")
        } else {
            String::new()
        }
    );
    Ok(())
}

/// Extract the selected entries of `zip` below `options.output`.
///
/// Returns the number of entries written and skipped. Entries whose names
/// escape the output directory abort the extraction before anything is
/// written.
pub(crate) fn extract_archive<S: ReadAt>(
    zip: &ZipArchive<S>,
    prompt: &mut PasswordPrompt,
    options: &ExtractOptions,
) -> Result<(usize, usize), ZipError> {
    let selected = select_entries(zip.entries(), options.files, options.include, options.exclude);
    if selected.is_empty() && !options.files.is_empty() {
        return Err(ZipError::entry_not_found(options.files.join(", ")));
    }
    for &index in &selected {
        zip.entries()[index].validate_path()?;
    }

    fs::create_dir_all(options.output)?;
    let pb = create_progress_bar(selected.len() as u64, options.progress && !options.verbose);
    let mut written = 0;
    let mut skipped = 0;
    let mut directories = Vec::new();

    for index in selected {
        let entry = &zip.entries()[index];
        let target = options.output.join(entry.sanitized_name());
        pb.set_message(entry.name.clone());

        let outcome = if entry.is_dir() {
            fs::create_dir_all(&target)?;
            directories.push((target, entry));
            Outcome::Written
        } else {
            extract_file(zip, index, &target, prompt, options.overwrite)?
        };
        match outcome {
            Outcome::Written => {
                written += 1;
                if options.verbose {
                    println!("  {}", entry.name);
                }
            }
            Outcome::Skipped => {
                skipped += 1;
                if options.verbose {
                    println!("  {} (exists, skipped)", entry.name);
                }
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    // Directory times last: writing their children touches them.
    for (path, entry) in directories {
        restore_metadata(&path, entry);
    }
    Ok((written, skipped))
}

fn extract_file<S: ReadAt>(
    zip: &ZipArchive<S>,
    index: usize,
    target: &Path,
    prompt: &mut PasswordPrompt,
    overwrite: bool,
) -> Result<Outcome, ZipError> {
    let entry = &zip.entries()[index];
    if target.exists() && !overwrite {
        debug!(path = %target.display(), "target exists");
        return Ok(Outcome::Skipped);
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut reader = open_entry(zip, index, prompt)?;
    let copied = File::create(target).and_then(|file| {
        let mut out = BufWriter::new(file);
        io::copy(&mut reader, &mut out)?;
        out.flush()
    });
    if let Err(err) = copied {
        remove_partial(target);
        return Err(ZipError::from(err));
    }

    restore_metadata(target, entry);
    Ok(Outcome::Written)
}

fn remove_partial(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        warn!(path = %path.display(), %err, "could not remove partial file");
    }
}

/// Best effort: a failure to set times or permissions is only logged.
fn restore_metadata(path: &Path, entry: &Entry) {
    let mtime = FileTime::from_system_time(entry.modified);
    if let Err(err) = filetime::set_file_mtime(path, mtime) {
        warn!(path = %path.display(), %err, "could not restore modification time");
    }

    #[cfg(unix)]
    if let Some(mode) = entry.unix_mode {
        use std::os::unix::fs::PermissionsExt;
        let permissions = fs::Permissions::from_mode(mode & 0o7777);
        if let Err(err) = fs::set_permissions(path, permissions) {
            warn!(path = %path.display(), %err, "could not restore permissions");
        }
    }
}

/// Default output directory: the archive name without its extension.
pub fn default_output(archive: &Path) -> PathBuf {
    archive
        .file_stem()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}
