//! Detect command implementation.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use zipvault_archive::FormatHandle;
use zipvault_archive::zip::open_zip;
use zipvault_core::config::ReaderOptions;

pub fn cmd_detect(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = BufReader::new(File::open(file)?);
    let (format, magic) = FormatHandle::detect(&mut reader)?;
    let by_name = FormatHandle::for_extension(&file.to_string_lossy());

    println!("File: {}", file.display());
    println!("Magic bytes: {:02X?}", magic);
    let Some(format) = format else {
        println!("Format: not a ZIP container");
        return Ok(());
    };

    // The signature only says ZIP; the extension tells a JAR apart.
    let format = by_name.unwrap_or(format);
    println!("Format: {format}");
    println!("Extension: .{}", format.extension());
    println!("MIME type: {}", format.mime_type());

    match open_zip(file, ReaderOptions::default()) {
        Ok(zip) => {
            let encrypted = zip.entries().iter().filter(|e| e.is_encrypted()).count();
            println!("Entries: {} ({encrypted} encrypted)", zip.len());
        }
        Err(err) => println!("Central directory: unreadable ({err})"),
    }
    Ok(())
}
