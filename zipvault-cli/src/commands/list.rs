//! List command implementation.

use crate::utils::{print_entries, select_entries, unix_time};
use serde::Serialize;
use std::path::Path;
use zipvault_archive::FormatHandle;
use zipvault_archive::zip::open_zip;
use zipvault_core::config::ReaderOptions;
use zipvault_core::entry::Entry;

/// JSON serializable entry data for archive listings.
#[derive(Debug, Serialize)]
struct EntryJson<'a> {
    name: &'a str,
    is_dir: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    compressed_size: Option<u64>,
    method: &'static str,
    encryption: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    crc: Option<u32>,
    mtime: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<&'a str>,
}

impl<'a> EntryJson<'a> {
    fn from_entry(entry: &'a Entry) -> Self {
        Self {
            name: &entry.name,
            is_dir: entry.is_dir(),
            size: entry.size(),
            compressed_size: entry.compressed_size,
            method: entry.method().name(),
            encryption: entry.encryption.name(),
            crc: entry.crc32(),
            mtime: unix_time(entry.modified),
            mode: entry.unix_mode,
            comment: entry.comment.as_deref(),
        }
    }
}

/// JSON output for archive listing.
#[derive(Debug, Serialize)]
struct ArchiveListJson<'a> {
    archive: String,
    format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<&'a str>,
    entries: Vec<EntryJson<'a>>,
}

/// Options for listing archive contents.
pub struct ListOptions<'a> {
    pub verbose: bool,
    pub json: bool,
    pub include: &'a [String],
    pub exclude: &'a [String],
}

pub fn cmd_list(
    archive: &Path,
    reader_options: ReaderOptions,
    options: &ListOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let zip = open_zip(archive, reader_options)?;
    let format = FormatHandle::for_extension(&archive.to_string_lossy()).unwrap_or(FormatHandle::Zip);
    let selected: Vec<&Entry> = select_entries(zip.entries(), &[], options.include, options.exclude)
        .into_iter()
        .map(|index| &zip.entries()[index])
        .collect();

    if options.json {
        let output = ArchiveListJson {
            archive: archive.display().to_string(),
            format: format.name().to_string(),
            comment: Some(zip.comment()).filter(|c| !c.is_empty()),
            entries: selected.iter().map(|entry| EntryJson::from_entry(entry)).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Archive: {} ({})", archive.display(), format);
    if !zip.comment().is_empty() {
        println!("Comment: {}", zip.comment());
    }
    println!();
    print_entries(&selected, options.verbose);
    Ok(())
}
