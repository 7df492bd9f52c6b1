//! Utility functions for the CLI.

use glob::Pattern;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::io::IsTerminal;
use std::path::Path;
use std::time::SystemTime;
use tracing::debug;
use zipvault_archive::zip::record::DosDateTime;
use zipvault_archive::{ZipArchive, ZipFileReader};
use zipvault_core::config::{Password, ReaderOptions, WriterOptions};
use zipvault_core::entry::Entry;
use zipvault_core::error::{Result as ZipResult, ZipError};
use zipvault_core::source::ReadAt;

/// How many times a rejected password is asked for again.
const MAX_PASSWORD_PROMPTS: usize = 3;

/// Reader and writer defaults, from a JSON file or the environment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Options used to open archives.
    pub reader: ReaderOptions,
    /// Options used to write archives.
    pub writer: WriterOptions,
}

impl Settings {
    /// Load settings from `path` when given, otherwise from the
    /// `ZIPVAULT_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                let settings = serde_json::from_str(&text)
                    .map_err(|e| format!("invalid config file {}: {e}", path.display()))?;
                debug!(path = %path.display(), "loaded settings");
                Ok(settings)
            }
            None => Ok(Self {
                reader: ReaderOptions::from_env(),
                writer: WriterOptions::from_env()?,
            }),
        }
    }
}

/// Supplies passwords for encrypted entries, asking on the terminal when the
/// known one is missing or rejected.
pub struct PasswordPrompt {
    password: Option<Password>,
    interactive: bool,
    prompts: usize,
}

impl PasswordPrompt {
    /// Start with `password`. Prompting is only enabled on a terminal.
    pub fn new(password: Option<Password>) -> Self {
        Self {
            password,
            interactive: std::io::stdin().is_terminal(),
            prompts: 0,
        }
    }

    /// Never prompt.
    #[cfg(test)]
    pub fn non_interactive(password: Option<Password>) -> Self {
        Self {
            password,
            interactive: false,
            prompts: 0,
        }
    }

    /// The password to try next.
    pub fn current(&self) -> Option<&[u8]> {
        self.password.as_ref().map(Password::as_bytes)
    }

    /// The password as an owned value.
    pub fn password(&self) -> Option<Password> {
        self.password.clone()
    }

    /// Ask for a password after `err`.
    ///
    /// Returns `false` when `err` is not a password problem or no prompt is
    /// possible, in which case the caller reports `err`.
    pub fn retry(&mut self, err: &ZipError, name: &str) -> ZipResult<bool> {
        if !err.is_password_error() || !self.interactive || self.prompts >= MAX_PASSWORD_PROMPTS {
            return Ok(false);
        }
        if matches!(err, ZipError::WrongPassword { .. }) {
            eprintln!("Wrong password for {name}");
        }
        self.prompts += 1;
        let input = dialoguer::Password::new()
            .with_prompt(format!("Password for {name}"))
            .allow_empty_password(true)
            .interact()
            .map_err(|e| ZipError::invalid_state(format!("password prompt failed: {e}")))?;
        self.password = Some(Password::from(input));
        Ok(true)
    }

    /// Make sure a password is known before writing encrypted entries.
    pub fn require_new(&mut self) -> ZipResult<Password> {
        if let Some(password) = &self.password {
            return Ok(password.clone());
        }
        if !self.interactive {
            return Err(ZipError::invalid_config(
                "encryption requested without a password",
            ));
        }
        let input = dialoguer::Password::new()
            .with_prompt("Archive password")
            .with_confirmation("Repeat password", "Passwords do not match")
            .interact()
            .map_err(|e| ZipError::invalid_state(format!("password prompt failed: {e}")))?;
        let password = Password::from(input);
        self.password = Some(password.clone());
        Ok(password)
    }
}

/// Open the entry at `index`, prompting for a password when needed.
pub fn open_entry<'a, S: ReadAt>(
    archive: &'a ZipArchive<S>,
    index: usize,
    prompt: &mut PasswordPrompt,
) -> ZipResult<ZipFileReader<'a, S>> {
    let name = archive
        .entries()
        .get(index)
        .map(|entry| entry.name.clone())
        .unwrap_or_default();
    loop {
        match archive.extract_index(index, prompt.current()) {
            Err(err) if prompt.retry(&err, &name)? => continue,
            other => return other,
        }
    }
}

/// Create a progress bar with standard styling.
pub fn create_progress_bar(len: u64, enable: bool) -> ProgressBar {
    if !enable {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(len);
    if let Ok(style) =
        ProgressStyle::default_bar().template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("█▓▒░ "));
    }
    pb
}

/// Check if an entry name passes the filters.
///
/// Excludes win over includes; without includes everything not excluded
/// passes. Invalid patterns never match.
pub fn matches_filters(name: &str, include: &[String], exclude: &[String]) -> bool {
    let matches = |pattern: &String| Pattern::new(pattern).is_ok_and(|p| p.matches(name));
    if exclude.iter().any(matches) {
        return false;
    }
    include.is_empty() || include.iter().any(matches)
}

/// Indices of the entries selected by explicit names and glob filters.
///
/// An explicit name also selects everything below it when it is a directory.
pub fn select_entries(
    entries: &[Entry],
    names: &[String],
    include: &[String],
    exclude: &[String],
) -> Vec<usize> {
    entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| {
            names.is_empty()
                || names.iter().any(|name| {
                    let dir = format!("{}/", name.trim_end_matches('/'));
                    entry.name == *name || entry.name.starts_with(&dir)
                })
        })
        .filter(|(_, entry)| matches_filters(&entry.name, include, exclude))
        .map(|(index, _)| index)
        .collect()
}

/// Format a timestamp as `YYYY-MM-DD HH:MM` (UTC, DOS range).
pub fn format_time(time: SystemTime) -> String {
    let dos = DosDateTime::from_system_time(time);
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}",
        (dos.date >> 9) + 1980,
        (dos.date >> 5) & 0x0F,
        dos.date & 0x1F,
        dos.time >> 11,
        (dos.time >> 5) & 0x3F
    )
}

/// Seconds since the Unix epoch, negative before it.
pub fn unix_time(time: SystemTime) -> i64 {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(after) => after.as_secs() as i64,
        Err(before) => -(before.duration().as_secs() as i64),
    }
}

fn size_text(size: Option<u64>) -> String {
    size.map_or_else(|| "?".to_string(), |s| s.to_string())
}

/// Print entries, as a table when `verbose`.
pub fn print_entries(entries: &[&Entry], verbose: bool) {
    if !verbose {
        for entry in entries {
            println!("{}", entry.name);
        }
        return;
    }

    println!(
        "{:>10} {:>10} {:>6} {:>8} {:>9} {:>16}  Name",
        "Size", "Compressed", "Ratio", "Method", "Cipher", "Modified",
    );
    println!("{}", "-".repeat(78));

    let mut total_size = 0u64;
    let mut total_compressed = 0u64;
    for entry in entries {
        let ratio = match entry.size() {
            Some(size) if size > 0 => format!("{:.1}%", entry.space_savings()),
            _ => "-".to_string(),
        };
        let type_prefix = if entry.is_dir() { "d " } else { "  " };
        println!(
            "{:>10} {:>10} {:>6} {:>8} {:>9} {:>16}  {}{}",
            size_text(entry.size()),
            size_text(entry.compressed_size),
            ratio,
            entry.method().name(),
            entry.encryption.name(),
            format_time(entry.modified),
            type_prefix,
            entry.name
        );
        total_size += entry.size().unwrap_or(0);
        total_compressed += entry.compressed_size.unwrap_or(0);
    }

    println!("{}", "-".repeat(78));
    let total_ratio = if total_size > 0 {
        (1.0 - total_compressed as f64 / total_size as f64) * 100.0
    } else {
        0.0
    };
    println!(
        "{:>10} {:>10} {:>5.1}%  {} entries",
        total_size,
        total_compressed,
        total_ratio,
        entries.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_matches_filters() {
        let include = vec!["*.txt".to_string()];
        let exclude = vec!["secret*".to_string()];
        assert!(matches_filters("notes.txt", &include, &[]));
        assert!(!matches_filters("image.png", &include, &[]));
        assert!(!matches_filters("secret.txt", &include, &exclude));
        assert!(matches_filters("anything", &[], &[]));
        assert!(!matches_filters("a", &["[".to_string()], &[]));
    }

    #[test]
    fn test_select_entries_by_name_and_directory() {
        let entries = vec![
            Entry::directory("docs"),
            Entry::file("docs/a.txt"),
            Entry::file("docs2/b.txt"),
            Entry::file("c.bin"),
        ];
        assert_eq!(select_entries(&entries, &[], &[], &[]), [0, 1, 2, 3]);
        assert_eq!(select_entries(&entries, &["docs".to_string()], &[], &[]), [0, 1]);
        assert_eq!(
            select_entries(&entries, &[], &["*.txt".to_string()], &[]),
            [1, 2]
        );
    }

    #[test]
    fn test_format_time() {
        let time = UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        assert_eq!(format_time(time), "2020-09-13 12:26");
        assert_eq!(unix_time(time), 1_600_000_000);
    }

    #[test]
    fn test_settings_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zipvault.json");
        std::fs::write(
            &path,
            r#"{"reader": {"password": "in"}, "writer": {"compression": "best", "encrypt": true, "encryption": "aes128", "password": "out"}}"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.reader.password, Some(Password::from("in")));
        assert!(settings.writer.encrypt);
        assert_eq!(
            settings.writer.encryption,
            zipvault_core::entry::EncryptionMethod::Aes128
        );
    }

    #[test]
    fn test_non_interactive_prompt_declines() {
        let mut prompt = PasswordPrompt::non_interactive(None);
        let err = ZipError::password_required("a");
        assert!(!prompt.retry(&err, "a").unwrap());
        assert!(prompt.require_new().is_err());
    }
}
