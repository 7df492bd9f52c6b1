//! Format dispatch and entry-copy helpers.
//!
//! [`FormatHandle`] maps format names, file extensions and magic bytes to the
//! ZIP readers and writer. It is pure name mapping and holds no state. The
//! JAR family shares the ZIP container and only differs by extension.

use std::io::{self, Read};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;
use zipvault_core::config::{ReaderOptions, WriterOptions};
use zipvault_core::entry::Entry;
use zipvault_core::error::Result;
use zipvault_core::source::ReadAt;

use crate::zip::{ArchiveSink, StreamSink, ZipArchive, ZipStreamReader, ZipWriter};

/// Archive formats backed by the ZIP container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatHandle {
    /// ZIP archive (.zip).
    Zip,
    /// Java archive (.jar, .war, .ear).
    Jar,
}

impl FormatHandle {
    /// All known formats.
    pub const ALL: [Self; 2] = [Self::Zip, Self::Jar];

    /// Look up a format by its name, ignoring case.
    pub fn for_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|format| format.name().eq_ignore_ascii_case(name.trim()))
    }

    /// Look up a format by the extension of a file name.
    pub fn for_extension(file_name: &str) -> Option<Self> {
        let (_, extension) = file_name.rsplit_once('.')?;
        Self::ALL.into_iter().find(|format| {
            format
                .extensions()
                .iter()
                .any(|known| known.eq_ignore_ascii_case(extension))
        })
    }

    /// Check if a file name carries a known archive extension.
    pub fn is_archive_file_name(file_name: &str) -> bool {
        Self::for_extension(file_name).is_some()
    }

    /// Check if leading bytes carry a ZIP signature: a local file header, an
    /// empty archive's end record, or a spanning marker.
    pub fn matches(signature: &[u8]) -> bool {
        matches!(
            signature,
            [b'P', b'K', 3, 4, ..] | [b'P', b'K', 5, 6, ..] | [b'P', b'K', 7, 8, ..]
        )
    }

    /// Detect a ZIP container from a reader. Returns the bytes consumed.
    pub fn detect<R: Read>(reader: &mut R) -> Result<(Option<Self>, Vec<u8>)> {
        let mut magic = Vec::with_capacity(4);
        reader.by_ref().take(4).read_to_end(&mut magic)?;
        let format = Self::matches(&magic).then_some(Self::Zip);
        Ok((format, magic))
    }

    /// Short format name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::Jar => "jar",
        }
    }

    /// File extensions, primary first.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Zip => &["zip"],
            Self::Jar => &["jar", "war", "ear"],
        }
    }

    /// The primary file extension.
    pub fn extension(self) -> &'static str {
        self.extensions()[0]
    }

    /// Get the MIME type.
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Zip => "application/zip",
            Self::Jar => "application/java-archive",
        }
    }

    /// File name of an archive made from `base_name`.
    ///
    /// `notes.txt` becomes `notes.txt.zip`; a name that already ends with the
    /// extension is returned unchanged.
    pub fn archive_file_name(self, base_name: &str) -> String {
        if Self::for_extension(base_name) == Some(self) {
            return base_name.to_string();
        }
        format!("{base_name}.{}", self.extension())
    }

    /// Strip this format's extension from an archive file name.
    pub fn original_file_name(self, archive_name: &str) -> String {
        match archive_name.rsplit_once('.') {
            Some((base, extension))
                if !base.is_empty()
                    && self
                        .extensions()
                        .iter()
                        .any(|known| known.eq_ignore_ascii_case(extension)) =>
            {
                base.to_string()
            }
            _ => archive_name.to_string(),
        }
    }

    /// Sequential reader over `reader`.
    pub fn stream_reader<R: Read>(self, reader: R, options: ReaderOptions) -> ZipStreamReader<R> {
        ZipStreamReader::with_options(reader, options)
    }

    /// Random-access reader over `source`.
    pub fn archive_reader<S: ReadAt>(
        self,
        source: S,
        options: ReaderOptions,
    ) -> Result<ZipArchive<S>> {
        ZipArchive::open(source, options)
    }

    /// Writer over a non-seekable sink.
    pub fn writer<W: io::Write>(self, writer: W, options: WriterOptions) -> ZipWriter<StreamSink<W>> {
        ZipWriter::with_options(writer, options)
    }
}

impl std::fmt::Display for FormatHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Zip => write!(f, "ZIP"),
            Self::Jar => write!(f, "JAR"),
        }
    }
}

/// Write a file entry from `data`.
///
/// A trailing `/` is stripped from the name; a missing modification time
/// becomes the Unix epoch.
pub fn write_entry<S: ArchiveSink, R: Read + ?Sized>(
    writer: &mut ZipWriter<S>,
    name: &str,
    modified: Option<SystemTime>,
    data: &mut R,
) -> Result<Entry> {
    let name = name.trim_end_matches('/');
    let entry = Entry::file(name).with_modified(modified.unwrap_or(UNIX_EPOCH));
    writer.begin_entry(entry)?;
    io::copy(data, writer)?;
    writer.end_entry()
}

/// Write a directory entry. A trailing `/` is appended when missing; a
/// missing modification time becomes the current time.
pub fn write_directory_entry<S: ArchiveSink>(
    writer: &mut ZipWriter<S>,
    name: &str,
    modified: Option<SystemTime>,
) -> Result<Entry> {
    let entry = Entry::directory(name).with_modified(modified.unwrap_or_else(SystemTime::now));
    writer.begin_entry(entry)?;
    writer.end_entry()
}

/// Copy one entry into `writer`.
///
/// Directories produce a header only; files have their payload copied from
/// `data` and are re-encoded with the writer's options. Name, time, mode and
/// comment are kept.
pub fn copy_entry<S: ArchiveSink, R: Read + ?Sized>(
    entry: &Entry,
    data: &mut R,
    writer: &mut ZipWriter<S>,
) -> Result<Entry> {
    let mut target = if entry.is_dir() {
        Entry::directory(entry.name.as_str())
    } else {
        Entry::file(entry.name.trim_end_matches('/'))
    }
    .with_modified(entry.modified);
    target.unix_mode = entry.unix_mode;
    target.comment = entry.comment.clone();

    writer.begin_entry(target)?;
    if entry.is_file() {
        io::copy(data, writer)?;
    }
    writer.end_entry()
}

/// Copy every remaining entry of a stream into `writer`.
///
/// Returns the number of entries copied. Each source entry is verified as it
/// is consumed, so a corrupt entry aborts the copy.
pub fn copy_archive<R: Read, S: ArchiveSink>(
    reader: &mut ZipStreamReader<R>,
    writer: &mut ZipWriter<S>,
) -> Result<usize> {
    let mut copied = 0;
    while let Some(entry) = reader.next_entry()? {
        copy_entry(&entry, reader, writer)?;
        copied += 1;
    }
    debug!(copied, "archive copied");
    Ok(copied)
}
