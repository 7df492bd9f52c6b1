//! ZIP record layouts.
//!
//! Bit-exact readers and writers for the fixed records of the container:
//! local file header, data descriptor, central directory header and the end of
//! central directory record (plain and Zip64). Extra fields understood here are
//! Zip64 (`0x0001`), extended timestamp (`0x5455`) and WinZip AES (`0x9901`).

use std::io::{Read, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use zipvault_core::entry::FLAG_DATA_DESCRIPTOR;
use zipvault_core::error::{Result, ZipError};
use zipvault_core::source::ReadAt;

use super::aes::{AES_EXTRA_FIELD_ID, AesExtraField};

/// ZIP local file header signature.
pub const LOCAL_FILE_HEADER_SIG: u32 = 0x04034B50;

/// ZIP central directory header signature.
pub const CENTRAL_DIR_HEADER_SIG: u32 = 0x02014B50;

/// ZIP end of central directory signature.
pub const END_OF_CENTRAL_DIR_SIG: u32 = 0x06054B50;

/// ZIP64 end of central directory signature.
pub const ZIP64_END_OF_CENTRAL_DIR_SIG: u32 = 0x06064B50;

/// ZIP64 end of central directory locator signature.
pub const ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIG: u32 = 0x07064B50;

/// Data descriptor signature (optional, PK\x07\x08).
pub const DATA_DESCRIPTOR_SIG: u32 = 0x08074B50;

/// ZIP64 extra field header ID.
pub const ZIP64_EXTRA_FIELD_ID: u16 = 0x0001;

/// Extended timestamp extra field header ID.
pub const EXTENDED_TIMESTAMP_ID: u16 = 0x5455;

/// NTFS times extra field header ID.
pub const NTFS_TIMES_ID: u16 = 0x000A;

/// Seconds between 1601-01-01 (the FILETIME epoch) and the Unix epoch.
const FILETIME_UNIX_OFFSET: i64 = 11_644_473_600;

/// FILETIME ticks per second.
const FILETIME_TICKS: u64 = 10_000_000;

/// Marker value for Zip64 (0xFFFFFFFF for 32-bit fields).
pub const ZIP64_MARKER_32: u32 = 0xFFFF_FFFF;

/// Marker value for Zip64 (0xFFFF for 16-bit fields).
pub const ZIP64_MARKER_16: u16 = 0xFFFF;

/// Fixed part of a local file header.
pub const LOCAL_FILE_HEADER_LEN: usize = 30;

/// Fixed part of a central directory header.
pub const CENTRAL_DIR_HEADER_LEN: usize = 46;

/// Fixed part of the end of central directory record.
pub const END_OF_CENTRAL_DIR_LEN: usize = 22;

/// Zip64 end of central directory record without its extensible data.
pub const ZIP64_END_OF_CENTRAL_DIR_LEN: usize = 56;

/// Zip64 end of central directory locator.
pub const ZIP64_LOCATOR_LEN: usize = 20;

/// Longest archive comment the EOCD length field can describe.
pub const MAX_COMMENT_LEN: usize = 65535;

/// Version made by: Unix, APPNOTE 6.3.
pub const VERSION_MADE_BY: u16 = 0x033F;

/// Version needed to extract, by feature.
pub mod version {
    /// Stored entries.
    pub const DEFAULT: u16 = 10;
    /// DEFLATE, directories and traditional encryption.
    pub const DEFLATE: u16 = 20;
    /// Zip64 extensions.
    pub const ZIP64: u16 = 45;
    /// WinZip AES.
    pub const AES: u16 = 51;
}

pub(crate) fn le_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

pub(crate) fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

pub(crate) fn le_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

fn len_u16(len: usize, what: &str) -> Result<u16> {
    u16::try_from(len).map_err(|_| ZipError::invalid_state(format!("{what} longer than 65535 bytes")))
}

fn clamp_u32(value: u64) -> u32 {
    if value >= u64::from(ZIP64_MARKER_32) {
        ZIP64_MARKER_32
    } else {
        value as u32
    }
}

/// Decode an entry name or comment. Invalid UTF-8 is replaced.
pub fn decode_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// MS-DOS packed date and time, 2-second resolution, years 1980 to 2107.
///
/// Times are treated as UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    /// Packed time: hour << 11 | minute << 5 | second / 2.
    pub time: u16,
    /// Packed date: (year - 1980) << 9 | month << 5 | day.
    pub date: u16,
}

impl DosDateTime {
    /// 1980-01-01 00:00:00, the earliest representable instant.
    pub const MIN: Self = Self {
        time: 0,
        date: (1 << 5) | 1,
    };

    /// 2107-12-31 23:59:58, the latest representable instant.
    pub const MAX: Self = Self {
        time: (23 << 11) | (59 << 5) | 29,
        date: (127 << 9) | (12 << 5) | 31,
    };

    /// Convert a timestamp, clamping to the representable range.
    pub fn from_system_time(time: SystemTime) -> Self {
        let secs = match time.duration_since(UNIX_EPOCH) {
            Ok(after) => i64::try_from(after.as_secs()).unwrap_or(i64::MAX),
            Err(_) => return Self::MIN,
        };
        let days = secs.div_euclid(86_400);
        let of_day = secs.rem_euclid(86_400);
        let (year, month, day) = civil_from_days(days);
        if year < 1980 {
            return Self::MIN;
        }
        if year > 2107 {
            return Self::MAX;
        }

        let hour = (of_day / 3600) as u16;
        let minute = ((of_day % 3600) / 60) as u16;
        let second = (of_day % 60) as u16;
        Self {
            time: (hour << 11) | (minute << 5) | (second / 2),
            date: (((year - 1980) as u16) << 9) | ((month as u16) << 5) | day as u16,
        }
    }

    /// Convert back to a timestamp. Out-of-range fields are clamped.
    pub fn to_system_time(self) -> SystemTime {
        let year = i64::from(self.date >> 9) + 1980;
        let month = u32::from((self.date >> 5) & 0x0F).clamp(1, 12);
        let day = u32::from(self.date & 0x1F).max(1);
        let hour = i64::from(self.time >> 11);
        let minute = i64::from((self.time >> 5) & 0x3F);
        let second = i64::from(self.time & 0x1F) * 2;

        let secs = days_from_civil(year, month, day) * 86_400 + hour * 3600 + minute * 60 + second;
        UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64)
    }
}

/// Days since 1970-01-01 of a proleptic Gregorian date.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = (if year >= 0 { year } else { year - 399 }) / 400;
    let year_of_era = year - era * 400;
    let month = i64::from(month);
    let shifted_month = if month > 2 { month - 3 } else { month + 9 };
    let day_of_year = (153 * shifted_month + 2) / 5 + i64::from(day) - 1;
    let day_of_era = year_of_era * 365 + year_of_era / 4 - year_of_era / 100 + day_of_year;
    era * 146_097 + day_of_era - 719_468
}

/// Proleptic Gregorian date of a day count since 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let days = days + 719_468;
    let era = (if days >= 0 { days } else { days - 146_096 }) / 146_097;
    let day_of_era = days - era * 146_097;
    let year_of_era =
        (day_of_era - day_of_era / 1460 + day_of_era / 36_524 - day_of_era / 146_096) / 365;
    let day_of_year = day_of_era - (365 * year_of_era + year_of_era / 4 - year_of_era / 100);
    let shifted_month = (5 * day_of_year + 2) / 153;
    let day = (day_of_year - (153 * shifted_month + 2) / 5 + 1) as u32;
    let month = if shifted_month < 10 {
        shifted_month + 3
    } else {
        shifted_month - 9
    } as u32;
    let year = year_of_era + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

/// Whole seconds since the Unix epoch, saturating at the `i64` range.
pub fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_secs()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_secs()).map_or(i64::MIN, |s| -s),
    }
}

/// Timestamp from Unix seconds.
pub fn from_unix_seconds(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

/// Extra field records this crate interprets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraFields {
    /// Raw data of the Zip64 extended information record.
    pub zip64: Option<Vec<u8>>,
    /// WinZip AES record.
    pub aes: Option<AesExtraField>,
    /// Modification time in Unix seconds, from the extended timestamp
    /// record or else the NTFS times record.
    pub mtime: Option<i64>,
}

impl ExtraFields {
    /// Parse an extra field block.
    ///
    /// Unknown records are skipped. A record whose declared length runs past
    /// the block ends parsing.
    pub fn parse(extra: &[u8]) -> Result<Self> {
        let mut fields = Self::default();
        let mut ntfs_mtime = None;
        let mut offset = 0;
        while offset + 4 <= extra.len() {
            let header_id = le_u16(extra, offset);
            let data_size = le_u16(extra, offset + 2) as usize;
            offset += 4;
            if offset + data_size > extra.len() {
                break;
            }
            let data = &extra[offset..offset + data_size];
            match header_id {
                ZIP64_EXTRA_FIELD_ID => fields.zip64 = Some(data.to_vec()),
                AES_EXTRA_FIELD_ID => fields.aes = Some(AesExtraField::from_bytes(data)?),
                EXTENDED_TIMESTAMP_ID => {
                    if data.len() >= 5 && data[0] & 0x01 != 0 {
                        fields.mtime = Some(i64::from(le_u32(data, 1) as i32));
                    }
                }
                NTFS_TIMES_ID => ntfs_mtime = ntfs_mtime.or(parse_ntfs_mtime(data)),
                _ => {}
            }
            offset += data_size;
        }
        fields.mtime = fields.mtime.or(ntfs_mtime);
        Ok(fields)
    }

    /// Replace 32-bit fields saved as `0xFFFFFFFF` with their Zip64 values.
    ///
    /// Values appear in the record in the fixed order uncompressed size,
    /// compressed size, local header offset, and only for fields that carry the
    /// marker.
    pub fn resolve_zip64(
        &self,
        uncompressed: &mut u64,
        compressed: &mut u64,
        offset: Option<&mut u64>,
    ) -> Result<()> {
        let marker = u64::from(ZIP64_MARKER_32);
        let mut targets: Vec<&mut u64> = Vec::with_capacity(3);
        if *uncompressed == marker {
            targets.push(uncompressed);
        }
        if *compressed == marker {
            targets.push(compressed);
        }
        if let Some(offset) = offset {
            if *offset == marker {
                targets.push(offset);
            }
        }
        if targets.is_empty() {
            return Ok(());
        }

        let data = self
            .zip64
            .as_deref()
            .ok_or_else(|| ZipError::malformed("Zip64 marker without Zip64 extra field"))?;
        if data.len() < targets.len() * 8 {
            return Err(ZipError::malformed("Zip64 extra field too short"));
        }
        for (index, target) in targets.into_iter().enumerate() {
            *target = le_u64(data, index * 8);
        }
        Ok(())
    }
}

/// Encode a Zip64 extra record holding the given values, in record order.
pub fn zip64_extra(values: &[u64]) -> Vec<u8> {
    let mut extra = Vec::with_capacity(4 + values.len() * 8);
    extra.extend_from_slice(&ZIP64_EXTRA_FIELD_ID.to_le_bytes());
    extra.extend_from_slice(&((values.len() * 8) as u16).to_le_bytes());
    for value in values {
        extra.extend_from_slice(&value.to_le_bytes());
    }
    extra
}

/// Encode an extended timestamp record carrying only the modification time.
pub fn timestamp_extra(mtime: i32) -> Vec<u8> {
    let mut extra = Vec::with_capacity(9);
    extra.extend_from_slice(&EXTENDED_TIMESTAMP_ID.to_le_bytes());
    extra.extend_from_slice(&5u16.to_le_bytes());
    extra.push(0x01);
    extra.extend_from_slice(&mtime.to_le_bytes());
    extra
}

/// Modification time from the attributes of an NTFS times record.
fn parse_ntfs_mtime(data: &[u8]) -> Option<i64> {
    // Four reserved bytes, then tagged attributes; tag 1 holds mtime, atime, ctime.
    let mut offset = 4;
    while offset + 4 <= data.len() {
        let tag = le_u16(data, offset);
        let size = le_u16(data, offset + 2) as usize;
        offset += 4;
        if offset + size > data.len() {
            return None;
        }
        if tag == 0x0001 && size >= 8 {
            let secs = le_u64(data, offset) / FILETIME_TICKS;
            return Some(secs as i64 - FILETIME_UNIX_OFFSET);
        }
        offset += size;
    }
    None
}

/// Encode an NTFS times record with all three times set to `secs`.
pub fn ntfs_times_extra(secs: i64) -> Vec<u8> {
    let ticks = secs
        .saturating_add(FILETIME_UNIX_OFFSET)
        .max(0)
        .unsigned_abs()
        .saturating_mul(FILETIME_TICKS);
    let mut extra = Vec::with_capacity(36);
    extra.extend_from_slice(&NTFS_TIMES_ID.to_le_bytes());
    extra.extend_from_slice(&32u16.to_le_bytes());
    extra.extend_from_slice(&0u32.to_le_bytes());
    extra.extend_from_slice(&1u16.to_le_bytes());
    extra.extend_from_slice(&24u16.to_le_bytes());
    for _ in 0..3 {
        extra.extend_from_slice(&ticks.to_le_bytes());
    }
    extra
}

/// Encode the modification time of an entry in whole seconds.
///
/// The extended timestamp holds a signed 32-bit value (1901 to 2038); times
/// outside that range go into an NTFS times record instead.
pub fn mtime_extra(time: SystemTime) -> Vec<u8> {
    let secs = unix_seconds(time);
    match i32::try_from(secs) {
        Ok(secs) => timestamp_extra(secs),
        Err(_) => ntfs_times_extra(secs),
    }
}

/// ZIP local file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileHeader {
    /// Minimum version needed to extract.
    pub version_needed: u16,
    /// General purpose bit flag.
    pub flags: u16,
    /// Compression method field (99 for WinZip AES).
    pub method: u16,
    /// Last modification time.
    pub modified: DosDateTime,
    /// CRC-32 of uncompressed data.
    pub crc32: u32,
    /// Compressed size, Zip64 value resolved.
    pub compressed_size: u64,
    /// Uncompressed size, Zip64 value resolved.
    pub uncompressed_size: u64,
    /// Raw file name.
    pub file_name: Vec<u8>,
    /// Raw extra field.
    pub extra: Vec<u8>,
}

impl LocalFileHeader {
    /// Read a local file header including its signature.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut sig = [0u8; 4];
        reader
            .read_exact(&mut sig)
            .map_err(|e| ZipError::truncated(e, "local file header"))?;
        let signature = u32::from_le_bytes(sig);
        if signature != LOCAL_FILE_HEADER_SIG {
            return Err(ZipError::invalid_signature(
                "local file header",
                LOCAL_FILE_HEADER_SIG,
                signature,
            ));
        }
        Self::read_after_signature(reader)
    }

    /// Read the rest of a local file header whose signature was consumed.
    pub fn read_after_signature<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; LOCAL_FILE_HEADER_LEN - 4];
        reader
            .read_exact(&mut buf)
            .map_err(|e| ZipError::truncated(e, "local file header"))?;

        let name_len = le_u16(&buf, 22) as usize;
        let extra_len = le_u16(&buf, 24) as usize;
        let mut file_name = vec![0u8; name_len];
        reader
            .read_exact(&mut file_name)
            .map_err(|e| ZipError::truncated(e, "local file name"))?;
        let mut extra = vec![0u8; extra_len];
        reader
            .read_exact(&mut extra)
            .map_err(|e| ZipError::truncated(e, "local extra field"))?;

        let mut header = Self {
            version_needed: le_u16(&buf, 0),
            flags: le_u16(&buf, 2),
            method: le_u16(&buf, 4),
            modified: DosDateTime {
                time: le_u16(&buf, 6),
                date: le_u16(&buf, 8),
            },
            crc32: le_u32(&buf, 10),
            compressed_size: u64::from(le_u32(&buf, 14)),
            uncompressed_size: u64::from(le_u32(&buf, 18)),
            file_name,
            extra,
        };

        // Sizes behind a descriptor are placeholders; only resolve real ones.
        let fields = ExtraFields::parse(&header.extra)?;
        if fields.zip64.is_some() {
            fields.resolve_zip64(
                &mut header.uncompressed_size,
                &mut header.compressed_size,
                None,
            )?;
        }
        Ok(header)
    }

    /// Write the header. Sizes at or above 4 GiB are written as Zip64 markers;
    /// the caller supplies the matching Zip64 record in `extra`.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut buf = Vec::with_capacity(self.encoded_len() as usize);
        buf.extend_from_slice(&LOCAL_FILE_HEADER_SIG.to_le_bytes());
        buf.extend_from_slice(&self.version_needed.to_le_bytes());
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf.extend_from_slice(&self.method.to_le_bytes());
        buf.extend_from_slice(&self.modified.time.to_le_bytes());
        buf.extend_from_slice(&self.modified.date.to_le_bytes());
        buf.extend_from_slice(&self.crc32.to_le_bytes());
        buf.extend_from_slice(&clamp_u32(self.compressed_size).to_le_bytes());
        buf.extend_from_slice(&clamp_u32(self.uncompressed_size).to_le_bytes());
        buf.extend_from_slice(&len_u16(self.file_name.len(), "file name")?.to_le_bytes());
        buf.extend_from_slice(&len_u16(self.extra.len(), "extra field")?.to_le_bytes());
        buf.extend_from_slice(&self.file_name);
        buf.extend_from_slice(&self.extra);
        writer.write_all(&buf)?;
        Ok(())
    }

    /// Bytes occupied by the header, name and extra field.
    pub fn encoded_len(&self) -> u64 {
        (LOCAL_FILE_HEADER_LEN + self.file_name.len() + self.extra.len()) as u64
    }

    /// Decoded file name.
    pub fn name(&self) -> String {
        decode_text(&self.file_name)
    }

    /// Check if this entry has a data descriptor following the compressed data.
    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }
}

/// ZIP data descriptor (appears after compressed data when bit 3 is set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    /// CRC-32 of uncompressed data.
    pub crc32: u32,
    /// Compressed size.
    pub compressed_size: u64,
    /// Uncompressed size.
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    /// Read a data descriptor whose signature is optional.
    ///
    /// Returns the descriptor and the number of bytes consumed.
    pub fn read<R: Read>(reader: &mut R, zip64: bool) -> Result<(Self, usize)> {
        let mut word = [0u8; 4];
        reader
            .read_exact(&mut word)
            .map_err(|e| ZipError::truncated(e, "data descriptor"))?;
        let mut consumed = 4;

        let first = u32::from_le_bytes(word);
        let crc32 = if first == DATA_DESCRIPTOR_SIG {
            reader
                .read_exact(&mut word)
                .map_err(|e| ZipError::truncated(e, "data descriptor"))?;
            consumed += 4;
            u32::from_le_bytes(word)
        } else {
            first
        };

        let size_len = if zip64 { 16 } else { 8 };
        let mut sizes = [0u8; 16];
        reader
            .read_exact(&mut sizes[..size_len])
            .map_err(|e| ZipError::truncated(e, "data descriptor"))?;
        consumed += size_len;

        let (compressed_size, uncompressed_size) = if zip64 {
            (le_u64(&sizes, 0), le_u64(&sizes, 8))
        } else {
            (u64::from(le_u32(&sizes, 0)), u64::from(le_u32(&sizes, 4)))
        };

        Ok((
            Self {
                crc32,
                compressed_size,
                uncompressed_size,
            },
            consumed,
        ))
    }

    /// Parse a descriptor that starts with its signature from a byte slice.
    pub fn parse_signed(buf: &[u8], zip64: bool) -> Option<Self> {
        if buf.len() < Self::signed_len(zip64) || le_u32(buf, 0) != DATA_DESCRIPTOR_SIG {
            return None;
        }
        let (compressed_size, uncompressed_size) = if zip64 {
            (le_u64(buf, 8), le_u64(buf, 16))
        } else {
            (u64::from(le_u32(buf, 8)), u64::from(le_u32(buf, 12)))
        };
        Some(Self {
            crc32: le_u32(buf, 4),
            compressed_size,
            uncompressed_size,
        })
    }

    /// Length of a descriptor written with its signature.
    pub fn signed_len(zip64: bool) -> usize {
        if zip64 { 24 } else { 16 }
    }

    /// Write the descriptor with its signature.
    pub fn write<W: Write>(&self, writer: &mut W, zip64: bool) -> Result<()> {
        let mut buf = Vec::with_capacity(Self::signed_len(zip64));
        buf.extend_from_slice(&DATA_DESCRIPTOR_SIG.to_le_bytes());
        buf.extend_from_slice(&self.crc32.to_le_bytes());
        if zip64 {
            buf.extend_from_slice(&self.compressed_size.to_le_bytes());
            buf.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        } else {
            buf.extend_from_slice(&clamp_u32(self.compressed_size).to_le_bytes());
            buf.extend_from_slice(&clamp_u32(self.uncompressed_size).to_le_bytes());
        }
        writer.write_all(&buf)?;
        Ok(())
    }
}

/// ZIP central directory file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryHeader {
    /// Version made by.
    pub version_made_by: u16,
    /// Version needed to extract.
    pub version_needed: u16,
    /// General purpose bit flag.
    pub flags: u16,
    /// Compression method field (99 for WinZip AES).
    pub method: u16,
    /// Last modification time.
    pub modified: DosDateTime,
    /// CRC-32 of uncompressed data.
    pub crc32: u32,
    /// Compressed size (64-bit for Zip64).
    pub compressed_size: u64,
    /// Uncompressed size (64-bit for Zip64).
    pub uncompressed_size: u64,
    /// Disk number start.
    pub disk_start: u16,
    /// Internal file attributes.
    pub internal_attr: u16,
    /// External file attributes.
    pub external_attr: u32,
    /// Relative offset of local header (64-bit for Zip64).
    pub local_header_offset: u64,
    /// Raw file name.
    pub file_name: Vec<u8>,
    /// Extra field. On write the Zip64 record is generated and prepended.
    pub extra: Vec<u8>,
    /// Raw file comment.
    pub comment: Vec<u8>,
}

impl CentralDirectoryHeader {
    /// Read a central directory header including its signature.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; CENTRAL_DIR_HEADER_LEN];
        reader
            .read_exact(&mut buf)
            .map_err(|e| ZipError::truncated(e, "central directory header"))?;

        let signature = le_u32(&buf, 0);
        if signature != CENTRAL_DIR_HEADER_SIG {
            return Err(ZipError::invalid_signature(
                "central directory header",
                CENTRAL_DIR_HEADER_SIG,
                signature,
            ));
        }

        let name_len = le_u16(&buf, 28) as usize;
        let extra_len = le_u16(&buf, 30) as usize;
        let comment_len = le_u16(&buf, 32) as usize;
        let mut variable = vec![0u8; name_len + extra_len + comment_len];
        reader
            .read_exact(&mut variable)
            .map_err(|e| ZipError::truncated(e, "central directory header"))?;
        let comment = variable.split_off(name_len + extra_len);
        let extra = variable.split_off(name_len);
        let file_name = variable;

        let mut header = Self {
            version_made_by: le_u16(&buf, 4),
            version_needed: le_u16(&buf, 6),
            flags: le_u16(&buf, 8),
            method: le_u16(&buf, 10),
            modified: DosDateTime {
                time: le_u16(&buf, 12),
                date: le_u16(&buf, 14),
            },
            crc32: le_u32(&buf, 16),
            compressed_size: u64::from(le_u32(&buf, 20)),
            uncompressed_size: u64::from(le_u32(&buf, 24)),
            disk_start: le_u16(&buf, 34),
            internal_attr: le_u16(&buf, 36),
            external_attr: le_u32(&buf, 38),
            local_header_offset: u64::from(le_u32(&buf, 42)),
            file_name,
            extra,
            comment,
        };

        let fields = ExtraFields::parse(&header.extra)?;
        fields.resolve_zip64(
            &mut header.uncompressed_size,
            &mut header.compressed_size,
            Some(&mut header.local_header_offset),
        )?;
        Ok(header)
    }

    /// Check if this entry requires Zip64.
    pub fn needs_zip64(&self) -> bool {
        let marker = u64::from(ZIP64_MARKER_32);
        self.compressed_size >= marker
            || self.uncompressed_size >= marker
            || self.local_header_offset >= marker
    }

    fn build_zip64_extra(&self) -> Vec<u8> {
        let marker = u64::from(ZIP64_MARKER_32);
        let values: Vec<u64> = [
            self.uncompressed_size,
            self.compressed_size,
            self.local_header_offset,
        ]
        .into_iter()
        .filter(|value| *value >= marker)
        .collect();
        if values.is_empty() {
            Vec::new()
        } else {
            zip64_extra(&values)
        }
    }

    /// Write the header and return the number of bytes written.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<u64> {
        let zip64 = self.build_zip64_extra();
        let version_needed = if zip64.is_empty() {
            self.version_needed
        } else {
            self.version_needed.max(version::ZIP64)
        };

        let mut buf = Vec::with_capacity(
            CENTRAL_DIR_HEADER_LEN
                + self.file_name.len()
                + zip64.len()
                + self.extra.len()
                + self.comment.len(),
        );
        buf.extend_from_slice(&CENTRAL_DIR_HEADER_SIG.to_le_bytes());
        buf.extend_from_slice(&self.version_made_by.to_le_bytes());
        buf.extend_from_slice(&version_needed.to_le_bytes());
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf.extend_from_slice(&self.method.to_le_bytes());
        buf.extend_from_slice(&self.modified.time.to_le_bytes());
        buf.extend_from_slice(&self.modified.date.to_le_bytes());
        buf.extend_from_slice(&self.crc32.to_le_bytes());
        buf.extend_from_slice(&clamp_u32(self.compressed_size).to_le_bytes());
        buf.extend_from_slice(&clamp_u32(self.uncompressed_size).to_le_bytes());
        buf.extend_from_slice(&len_u16(self.file_name.len(), "file name")?.to_le_bytes());
        buf.extend_from_slice(
            &len_u16(zip64.len() + self.extra.len(), "extra field")?.to_le_bytes(),
        );
        buf.extend_from_slice(&len_u16(self.comment.len(), "file comment")?.to_le_bytes());
        buf.extend_from_slice(&self.disk_start.to_le_bytes());
        buf.extend_from_slice(&self.internal_attr.to_le_bytes());
        buf.extend_from_slice(&self.external_attr.to_le_bytes());
        buf.extend_from_slice(&clamp_u32(self.local_header_offset).to_le_bytes());
        buf.extend_from_slice(&self.file_name);
        buf.extend_from_slice(&zip64);
        buf.extend_from_slice(&self.extra);
        buf.extend_from_slice(&self.comment);
        writer.write_all(&buf)?;
        Ok(buf.len() as u64)
    }

    /// Decoded file name.
    pub fn name(&self) -> String {
        decode_text(&self.file_name)
    }
}

/// End of central directory, merged with its Zip64 counterpart when present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    /// Number of this disk.
    pub disk_number: u32,
    /// Disk where the central directory starts.
    pub cd_disk: u32,
    /// Total number of central directory records.
    pub entries: u64,
    /// Size of the central directory in bytes.
    pub cd_size: u64,
    /// Offset of the first central directory record.
    pub cd_offset: u64,
    /// Archive comment.
    pub comment: Vec<u8>,
}

/// Where the trailing records of an archive were found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryEnd {
    /// Offset of the end of central directory record.
    pub eocd_offset: u64,
    /// Offset of the first trailing record (the Zip64 EOCD if present).
    pub records_offset: u64,
}

impl EndOfCentralDirectory {
    /// Locate and parse the trailing records of an archive.
    ///
    /// The EOCD signature is searched backwards over at most the record size
    /// plus the longest possible comment. A comment may itself contain the
    /// signature, so candidates are checked from the end: the first whose
    /// central directory ends right where the trailing records start wins,
    /// preferring one whose comment ends at the end of the file. Without such
    /// a candidate the last one found is used as is.
    pub fn locate<S: ReadAt + ?Sized>(source: &S) -> Result<(Self, DirectoryEnd)> {
        let file_size = source.size()?;
        if file_size < END_OF_CENTRAL_DIR_LEN as u64 {
            return Err(ZipError::malformed("file too small to be a ZIP archive"));
        }

        let search_start = file_size.saturating_sub((MAX_COMMENT_LEN + END_OF_CENTRAL_DIR_LEN) as u64);
        let mut buf = vec![0u8; (file_size - search_start) as usize];
        source.read_exact_at(search_start, &mut buf)?;

        let eocd_sig = END_OF_CENTRAL_DIR_SIG.to_le_bytes();
        let candidates: Vec<usize> = (0..=buf.len() - END_OF_CENTRAL_DIR_LEN)
            .rev()
            .filter(|&pos| {
                buf[pos..pos + 4] == eocd_sig
                    && pos + END_OF_CENTRAL_DIR_LEN + le_u16(&buf, pos + 20) as usize <= buf.len()
            })
            .collect();
        let Some(&last) = candidates.first() else {
            return Err(ZipError::malformed("end of central directory record not found"));
        };

        let ends_at_eof =
            |pos: usize| pos + END_OF_CENTRAL_DIR_LEN + le_u16(&buf, pos + 20) as usize == buf.len();
        let ordered = candidates
            .iter()
            .filter(|&&pos| ends_at_eof(pos))
            .chain(candidates.iter().filter(|&&pos| !ends_at_eof(pos)));
        for &pos in ordered {
            if let Ok((eocd, end)) = Self::resolve(source, &buf[pos..], search_start + pos as u64) {
                if eocd.cd_offset.checked_add(eocd.cd_size) == Some(end.records_offset) {
                    return Ok((eocd, end));
                }
            }
        }
        Self::resolve(source, &buf[last..], search_start + last as u64)
    }

    /// Parse the EOCD record at `eocd_offset` and merge its Zip64 counterpart.
    fn resolve<S: ReadAt + ?Sized>(
        source: &S,
        record: &[u8],
        eocd_offset: u64,
    ) -> Result<(Self, DirectoryEnd)> {
        let mut eocd = Self::parse(record)?;
        let mut records_offset = eocd_offset;

        if eocd_offset >= ZIP64_LOCATOR_LEN as u64 {
            let mut locator = [0u8; ZIP64_LOCATOR_LEN];
            source.read_exact_at(eocd_offset - ZIP64_LOCATOR_LEN as u64, &mut locator)?;
            if le_u32(&locator, 0) == ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIG {
                let zip64_offset = le_u64(&locator, 8);
                if zip64_offset.saturating_add(ZIP64_END_OF_CENTRAL_DIR_LEN as u64)
                    > eocd_offset - ZIP64_LOCATOR_LEN as u64
                {
                    return Err(ZipError::malformed(
                        "Zip64 end of central directory offset out of range",
                    ));
                }
                let mut record = [0u8; ZIP64_END_OF_CENTRAL_DIR_LEN];
                source.read_exact_at(zip64_offset, &mut record)?;
                let signature = le_u32(&record, 0);
                if signature != ZIP64_END_OF_CENTRAL_DIR_SIG {
                    return Err(ZipError::invalid_signature(
                        "Zip64 end of central directory",
                        ZIP64_END_OF_CENTRAL_DIR_SIG,
                        signature,
                    ));
                }
                eocd.disk_number = le_u32(&record, 16);
                eocd.cd_disk = le_u32(&record, 20);
                eocd.entries = le_u64(&record, 32);
                eocd.cd_size = le_u64(&record, 40);
                eocd.cd_offset = le_u64(&record, 48);
                records_offset = zip64_offset;
            }
        }

        if eocd.disk_number != 0 || eocd.cd_disk != 0 {
            return Err(ZipError::unsupported("multi-volume archives"));
        }

        Ok((
            eocd,
            DirectoryEnd {
                eocd_offset,
                records_offset,
            },
        ))
    }

    /// Parse a plain EOCD record starting at its signature.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < END_OF_CENTRAL_DIR_LEN {
            return Err(ZipError::malformed("end of central directory too short"));
        }
        let signature = le_u32(buf, 0);
        if signature != END_OF_CENTRAL_DIR_SIG {
            return Err(ZipError::invalid_signature(
                "end of central directory",
                END_OF_CENTRAL_DIR_SIG,
                signature,
            ));
        }
        let comment_len = le_u16(buf, 20) as usize;
        let comment_end = (END_OF_CENTRAL_DIR_LEN + comment_len).min(buf.len());
        Ok(Self {
            disk_number: u32::from(le_u16(buf, 4)),
            cd_disk: u32::from(le_u16(buf, 6)),
            entries: u64::from(le_u16(buf, 10)),
            cd_size: u64::from(le_u32(buf, 12)),
            cd_offset: u64::from(le_u32(buf, 16)),
            comment: buf[END_OF_CENTRAL_DIR_LEN..comment_end].to_vec(),
        })
    }

    /// Check if the Zip64 trailing records are required.
    pub fn needs_zip64(&self) -> bool {
        self.entries >= u64::from(ZIP64_MARKER_16)
            || self.cd_size >= u64::from(ZIP64_MARKER_32)
            || self.cd_offset >= u64::from(ZIP64_MARKER_32)
    }

    /// Write the trailing records that follow the central directory.
    pub fn write<W: Write>(&self, writer: &mut W, force_zip64: bool) -> Result<()> {
        let comment_len = len_u16(self.comment.len(), "archive comment")?;
        let mut buf = Vec::with_capacity(
            ZIP64_END_OF_CENTRAL_DIR_LEN + ZIP64_LOCATOR_LEN + END_OF_CENTRAL_DIR_LEN + self.comment.len(),
        );

        if force_zip64 || self.needs_zip64() {
            let zip64_offset = self.cd_offset + self.cd_size;
            buf.extend_from_slice(&ZIP64_END_OF_CENTRAL_DIR_SIG.to_le_bytes());
            buf.extend_from_slice(&((ZIP64_END_OF_CENTRAL_DIR_LEN - 12) as u64).to_le_bytes());
            buf.extend_from_slice(&VERSION_MADE_BY.to_le_bytes());
            buf.extend_from_slice(&version::ZIP64.to_le_bytes());
            buf.extend_from_slice(&0u32.to_le_bytes());
            buf.extend_from_slice(&0u32.to_le_bytes());
            buf.extend_from_slice(&self.entries.to_le_bytes());
            buf.extend_from_slice(&self.entries.to_le_bytes());
            buf.extend_from_slice(&self.cd_size.to_le_bytes());
            buf.extend_from_slice(&self.cd_offset.to_le_bytes());

            buf.extend_from_slice(&ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIG.to_le_bytes());
            buf.extend_from_slice(&0u32.to_le_bytes());
            buf.extend_from_slice(&zip64_offset.to_le_bytes());
            buf.extend_from_slice(&1u32.to_le_bytes());
        }

        let entries_16 = if self.entries >= u64::from(ZIP64_MARKER_16) {
            ZIP64_MARKER_16
        } else {
            self.entries as u16
        };
        buf.extend_from_slice(&END_OF_CENTRAL_DIR_SIG.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&entries_16.to_le_bytes());
        buf.extend_from_slice(&entries_16.to_le_bytes());
        buf.extend_from_slice(&clamp_u32(self.cd_size).to_le_bytes());
        buf.extend_from_slice(&clamp_u32(self.cd_offset).to_le_bytes());
        buf.extend_from_slice(&comment_len.to_le_bytes());
        buf.extend_from_slice(&self.comment);
        writer.write_all(&buf)?;
        Ok(())
    }
}
