//! Wire-format records of the ZIP trailer and headers.
//!
//! All multi-byte fields are little-endian. Decoding happens over
//! in-memory buffers that were fetched as byte ranges, so the structs
//! here only ever parse from slices.

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, TimeZone, Utc};
use std::io::Cursor;

use crate::error::{Error, Result};

pub const ZIP64_HEADER_ID: u16 = 0x0001;

/// ZIP compression methods this crate understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Stored,
    Deflate,
    Unknown(u16),
}

impl Compression {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => Compression::Stored,
            8 => Compression::Deflate,
            _ => Compression::Unknown(value),
        }
    }
}

/// End of Central Directory record - 22 bytes minimum.
pub struct Eocd {
    pub disk_number: u16,
    pub cd_disk_number: u16,
    pub disk_records: u16,
    pub total_records: u16,
    pub cd_size_bytes: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl Eocd {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::InvalidZip("bad end of central directory record"));
        }
        let mut cursor = Cursor::new(&data[4..]);
        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            cd_disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_records: cursor.read_u16::<LittleEndian>()?,
            total_records: cursor.read_u16::<LittleEndian>()?,
            cd_size_bytes: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    /// Any sentinel value means the real numbers live in the ZIP64
    /// end-of-central-directory record.
    pub fn is_zip64(&self) -> bool {
        self.disk_number == 0xffff
            || self.cd_disk_number == 0xffff
            || self.disk_records == 0xffff
            || self.total_records == 0xffff
            || self.cd_size_bytes == 0xffff_ffff
            || self.cd_offset == 0xffff_ffff
    }
}

/// ZIP64 End of Central Directory record - 56 bytes minimum.
pub struct Eocd64 {
    pub record_size: u64,
    pub creator_version: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub cd_disk_number: u32,
    pub disk_records: u64,
    pub total_records: u64,
    pub cd_size_bytes: u64,
    pub cd_offset: u64,
}

impl Eocd64 {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::InvalidZip("bad zip64 end of central directory record"));
        }
        let mut cursor = Cursor::new(&data[4..]);
        Ok(Self {
            record_size: cursor.read_u64::<LittleEndian>()?,
            creator_version: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            cd_disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_records: cursor.read_u64::<LittleEndian>()?,
            total_records: cursor.read_u64::<LittleEndian>()?,
            cd_size_bytes: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// Local File Header - 30 bytes of fixed fields.
pub struct LocalHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc32: u32,
    pub compressed_size_raw: u32,
    pub uncompressed_size_raw: u32,
    pub file_name_length: u16,
    pub extra_field_length: u16,
}

impl LocalHeader {
    pub const SIGNATURE: &'static [u8] = b"PK\x03\x04";
    pub const SIZE: usize = 30;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::InvalidZip("bad local file header"));
        }
        let mut cursor = Cursor::new(&data[4..]);
        Ok(Self {
            version_needed: cursor.read_u16::<LittleEndian>()?,
            flags: cursor.read_u16::<LittleEndian>()?,
            compression_method: cursor.read_u16::<LittleEndian>()?,
            mod_time: cursor.read_u16::<LittleEndian>()?,
            mod_date: cursor.read_u16::<LittleEndian>()?,
            crc32: cursor.read_u32::<LittleEndian>()?,
            compressed_size_raw: cursor.read_u32::<LittleEndian>()?,
            uncompressed_size_raw: cursor.read_u32::<LittleEndian>()?,
            file_name_length: cursor.read_u16::<LittleEndian>()?,
            extra_field_length: cursor.read_u16::<LittleEndian>()?,
        })
    }
}

/// Central Directory File Header signature (the fixed part is parsed
/// field-by-field in the parser).
pub const CDR_SIGNATURE: &[u8] = b"PK\x01\x02";

/// Where the central directory lives, as derived from the trailer.
#[derive(Debug, Clone, Copy)]
pub struct CdLocation {
    pub offset: u64,
    pub size_bytes: u64,
    pub zip64: bool,
}

/// One decoded Central Directory Record.
#[derive(Debug, Clone)]
pub struct Cdr {
    pub file_name: String,
    pub modified: DateTime<Utc>,
    /// POSIX `st_mode` bits (file type and permissions).
    pub mode: u32,
    pub compression_method: Compression,
    pub crc32_uncompressed: u32,
    pub compressed_size_bytes: u64,
    pub uncompressed_size_bytes: u64,
    pub local_header_offset: u64,
}

impl Cdr {
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }
}

// POSIX file type bits, as agreed on by zip tools for the upper half of
// the external attributes field.
pub const S_IFMT: u32 = 0xf000;
pub const S_IFSOCK: u32 = 0xc000;
pub const S_IFLNK: u32 = 0xa000;
pub const S_IFREG: u32 = 0x8000;
pub const S_IFBLK: u32 = 0x6000;
pub const S_IFDIR: u32 = 0x4000;
pub const S_IFCHR: u32 = 0x2000;
pub const S_IFIFO: u32 = 0x1000;

const MSDOS_DIR: u32 = 0x10;
const MSDOS_READ_ONLY: u32 = 0x01;

// Creator-version high byte values.
const CREATOR_FAT: u16 = 0;
const CREATOR_UNIX: u16 = 3;
const CREATOR_NTFS: u16 = 11;
const CREATOR_VFAT: u16 = 14;
const CREATOR_MACOSX: u16 = 19;

/// Derive a POSIX mode from the CDR's creator version and external
/// attributes, with the trailing-slash directory fallback.
pub fn mode_for(creator_version: u16, external_attrs: u32, file_name: &str) -> u32 {
    let mut mode = match creator_version >> 8 {
        CREATOR_UNIX | CREATOR_MACOSX => external_attrs >> 16,
        CREATOR_FAT | CREATOR_NTFS | CREATOR_VFAT => msdos_mode(external_attrs),
        _ => 0,
    };
    if file_name.ends_with('/') {
        mode = S_IFDIR | (mode & 0o7777);
    }
    if mode & S_IFMT == 0 {
        mode |= S_IFREG;
    }
    mode
}

fn msdos_mode(attrs: u32) -> u32 {
    let mut mode = if attrs & MSDOS_DIR != 0 { S_IFDIR | 0o777 } else { S_IFREG | 0o666 };
    if attrs & MSDOS_READ_ONLY != 0 {
        mode &= !0o222;
    }
    mode
}

/// Decode an MS-DOS date/time pair (2-second resolution) as UTC.
///
/// Date bits: 0-4 day of month, 5-8 month, 9-15 years since 1980.
/// Time bits: 0-4 second/2, 5-10 minute, 11-15 hour.
pub fn msdos_time(dos_date: u16, dos_time: u16) -> DateTime<Utc> {
    let year = (dos_date >> 9) as i32 + 1980;
    let month = (dos_date >> 5 & 0xf) as u32;
    let day = (dos_date & 0x1f) as u32;
    let hour = (dos_time >> 11) as u32;
    let minute = (dos_time >> 5 & 0x3f) as u32;
    let second = (dos_time & 0x1f) as u32 * 2;
    match Utc.with_ymd_and_hms(year, month, day, hour, minute, second) {
        chrono::LocalResult::Single(t) => t,
        _ => DateTime::UNIX_EPOCH,
    }
}
