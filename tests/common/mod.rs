//! Programmatic ZIP fixtures: archives are assembled byte-by-byte so
//! the tests control exactly what's on the wire (comments, zip64
//! sentinels, duplicate names).
#![allow(dead_code)]

use std::io::Write;

use flate2::write::DeflateEncoder;
use flate2::Compression;

pub const UNIX_CREATOR_VERSION: u16 = 3 << 8 | 30;

pub struct Member {
    pub name: String,
    pub data: Vec<u8>,
    pub deflate: bool,
    pub mode: u32,
}

impl Member {
    pub fn file(name: &str, data: &[u8]) -> Self {
        Self { name: name.to_string(), data: data.to_vec(), deflate: true, mode: 0o100644 }
    }

    pub fn stored(name: &str, data: &[u8]) -> Self {
        Self { name: name.to_string(), data: data.to_vec(), deflate: false, mode: 0o100644 }
    }

    pub fn dir(name: &str) -> Self {
        let name = format!("{}/", name.trim_end_matches('/'));
        Self { name, data: Vec::new(), deflate: false, mode: 0o040755 }
    }
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

const DOS_DATE: u16 = (2024 - 1980) << 9 | 3 << 5 | 15;
const DOS_TIME: u16 = 13 << 11 | 45 << 5 | 15;

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Assemble a complete archive with an optional trailing comment.
pub fn build_archive(members: &[Member], comment: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut central = Vec::new();
    let mut count = 0u64;

    for member in members {
        let body = if member.deflate { deflate(&member.data) } else { member.data.clone() };
        let method: u16 = if member.deflate { 8 } else { 0 };
        let crc = crc32(&member.data);
        let offset = out.len() as u32;

        // local file header
        out.extend_from_slice(b"PK\x03\x04");
        push_u16(&mut out, 20);
        push_u16(&mut out, 0);
        push_u16(&mut out, method);
        push_u16(&mut out, DOS_TIME);
        push_u16(&mut out, DOS_DATE);
        push_u32(&mut out, crc);
        push_u32(&mut out, body.len() as u32);
        push_u32(&mut out, member.data.len() as u32);
        push_u16(&mut out, member.name.len() as u16);
        push_u16(&mut out, 0);
        out.extend_from_slice(member.name.as_bytes());
        out.extend_from_slice(&body);

        // central directory record
        central.extend_from_slice(b"PK\x01\x02");
        push_u16(&mut central, UNIX_CREATOR_VERSION);
        push_u16(&mut central, 20);
        push_u16(&mut central, 0);
        push_u16(&mut central, method);
        push_u16(&mut central, DOS_TIME);
        push_u16(&mut central, DOS_DATE);
        push_u32(&mut central, crc);
        push_u32(&mut central, body.len() as u32);
        push_u32(&mut central, member.data.len() as u32);
        push_u16(&mut central, member.name.len() as u16);
        push_u16(&mut central, 0);
        push_u16(&mut central, 0);
        push_u16(&mut central, 0);
        push_u16(&mut central, 0);
        push_u32(&mut central, member.mode << 16);
        push_u32(&mut central, offset);
        central.extend_from_slice(member.name.as_bytes());
        count += 1;
    }

    let cd_offset = out.len() as u32;
    let cd_size = central.len() as u32;
    out.extend_from_slice(&central);

    // Counts above the 16-bit range are clamped below the 0xffff
    // sentinel; the parser walks the directory by size, not by count.
    let eocd_count = count.min(0xfffe) as u16;
    out.extend_from_slice(b"PK\x05\x06");
    push_u16(&mut out, 0);
    push_u16(&mut out, 0);
    push_u16(&mut out, eocd_count);
    push_u16(&mut out, eocd_count);
    push_u32(&mut out, cd_size);
    push_u32(&mut out, cd_offset);
    push_u16(&mut out, comment.len() as u16);
    out.extend_from_slice(comment);
    out
}

/// A ZIP64 archive: sizes and offset are sentinels in the 32-bit CD
/// fields, real values live in the zip64 extra field, and the trailer
/// carries EOCD64 + locator + sentinel EOCD.
pub fn build_zip64_archive(name: &str, data: &[u8]) -> Vec<u8> {
    let crc = crc32(data);
    let mut out = Vec::new();

    // local file header (stored)
    out.extend_from_slice(b"PK\x03\x04");
    push_u16(&mut out, 45);
    push_u16(&mut out, 0);
    push_u16(&mut out, 0);
    push_u16(&mut out, DOS_TIME);
    push_u16(&mut out, DOS_DATE);
    push_u32(&mut out, crc);
    push_u32(&mut out, data.len() as u32);
    push_u32(&mut out, data.len() as u32);
    push_u16(&mut out, name.len() as u16);
    push_u16(&mut out, 0);
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(data);

    let cd_offset = out.len() as u64;
    let mut central = Vec::new();
    central.extend_from_slice(b"PK\x01\x02");
    push_u16(&mut central, UNIX_CREATOR_VERSION);
    push_u16(&mut central, 45);
    push_u16(&mut central, 0);
    push_u16(&mut central, 0);
    push_u16(&mut central, DOS_TIME);
    push_u16(&mut central, DOS_DATE);
    push_u32(&mut central, crc);
    push_u32(&mut central, 0xffff_ffff);
    push_u32(&mut central, 0xffff_ffff);
    push_u16(&mut central, name.len() as u16);
    push_u16(&mut central, 4 + 24); // zip64 extra field
    push_u16(&mut central, 0);
    push_u16(&mut central, 0);
    push_u16(&mut central, 0);
    push_u32(&mut central, 0o100644 << 16);
    push_u32(&mut central, 0xffff_ffff);
    central.extend_from_slice(name.as_bytes());
    push_u16(&mut central, 0x0001);
    push_u16(&mut central, 24);
    push_u64(&mut central, data.len() as u64); // uncompressed
    push_u64(&mut central, data.len() as u64); // compressed
    push_u64(&mut central, 0); // local header offset

    let cd_size = central.len() as u64;
    out.extend_from_slice(&central);

    let eocd64_offset = out.len() as u64;
    out.extend_from_slice(b"PK\x06\x06");
    push_u64(&mut out, 44);
    push_u16(&mut out, UNIX_CREATOR_VERSION);
    push_u16(&mut out, 45);
    push_u32(&mut out, 0);
    push_u32(&mut out, 0);
    push_u64(&mut out, 1);
    push_u64(&mut out, 1);
    push_u64(&mut out, cd_size);
    push_u64(&mut out, cd_offset);

    // zip64 EOCD locator
    out.extend_from_slice(b"PK\x06\x07");
    push_u32(&mut out, 0);
    push_u64(&mut out, eocd64_offset);
    push_u32(&mut out, 1);

    // EOCD with sentinels
    out.extend_from_slice(b"PK\x05\x06");
    push_u16(&mut out, 0);
    push_u16(&mut out, 0);
    push_u16(&mut out, 0xffff);
    push_u16(&mut out, 0xffff);
    push_u32(&mut out, 0xffff_ffff);
    push_u32(&mut out, 0xffff_ffff);
    push_u16(&mut out, 0);
    out
}

/// The layout mirrored by most tests: seven central-directory entries,
/// two of them explicit directories.
pub fn regular_archive() -> Vec<u8> {
    build_archive(
        &[
            Member::file("a.txt", b"hello a\n"),
            Member::file("b.txt", b"hello b\n"),
            Member::dir("foo"),
            Member::file("foo/bar.txt", b"file in a directory!\n"),
            Member::dir("empty"),
            Member::file("big.bin", &vec![7u8; 256 * 1024]),
            Member::stored("stored.txt", b"stored, not compressed\n"),
        ],
        b"",
    )
}
