//! Convert command implementation.
//!
//! Re-encodes every entry of an archive with new compression and encryption
//! settings. Entries are streamed from the input, so nothing is held in
//! memory beyond the decoder buffers.

use crate::utils::PasswordPrompt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::warn;
use zipvault_archive::zip::open_zip;
use zipvault_archive::{FormatHandle, ZipStreamReader, ZipWriter, copy_archive};
use zipvault_core::config::{ReaderOptions, WriterOptions};
use zipvault_core::error::ZipError;

pub fn cmd_convert(
    input: &Path,
    output: &Path,
    mut reader_options: ReaderOptions,
    writer_options: WriterOptions,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if fs::canonicalize(input)? == fs::canonicalize(output).unwrap_or_default() {
        return Err("input and output must be different files".into());
    }

    // The stream reader cannot stop to ask, so settle the password first.
    let listing = open_zip(input, reader_options.clone())?;
    if reader_options.password.is_none() {
        if let Some(entry) = listing.entries().iter().find(|e| e.is_encrypted()) {
            let mut prompt = PasswordPrompt::new(None);
            let err = ZipError::password_required(&entry.name);
            if !prompt.retry(&err, &entry.name)? {
                return Err(err.into());
            }
            reader_options.password = prompt.password();
        }
    }

    let format =
        FormatHandle::for_extension(&output.to_string_lossy()).unwrap_or(FormatHandle::Zip);
    println!(
        "Converting {} ({} entries) to {} ({format}, {}{})",
        input.display(),
        listing.len(),
        output.display(),
        format!("{:?}", writer_options.compression).to_lowercase(),
        if writer_options.encrypt {
            format!(", {}", writer_options.encryption)
        } else {
            String::new()
        }
    );

    let copied = convert_file(input, output, reader_options, writer_options);
    match copied {
        Ok(count) => {
            if verbose {
                for entry in listing.entries() {
                    println!("  {}", entry.name);
                }
            }
            println!("Converted {count} entries");
            Ok(())
        }
        Err(err) => {
            if let Err(remove) = fs::remove_file(output) {
                warn!(path = %output.display(), %remove, "could not remove incomplete output");
            }
            Err(err.into())
        }
    }
}

fn convert_file(
    input: &Path,
    output: &Path,
    reader_options: ReaderOptions,
    writer_options: WriterOptions,
) -> Result<usize, ZipError> {
    let input = BufReader::new(File::open(input)?);
    let mut reader = ZipStreamReader::with_options(input, reader_options);
    let out = BufWriter::new(File::create(output)?);
    let mut writer = ZipWriter::seekable_with_options(out, writer_options)?;
    let count = copy_archive(&mut reader, &mut writer)?;
    writer.close()?;
    Ok(count)
}
