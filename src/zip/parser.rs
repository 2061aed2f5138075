//! Central-directory parser and member reader.
//!
//! ZIP archives are read from the end:
//!
//! 1. fetch the last 64 KiB and scan backward for the EOCD signature
//!    (falling back to the ZIP64 EOCD when sentinel fields say so)
//! 2. fetch exactly the central directory and decode its records
//! 3. to stream one member, fetch a single range covering its local
//!    header plus compressed body, then cap and decompress
//!
//! Two range requests per member read, which is what makes remote
//! archives affordable.

use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::Instant;

use byteorder::{LittleEndian, ReadBytesExt};
use tokio::io::{AsyncReadExt, BufReader};

use crate::error::{Error, Result};
use crate::remote::{ByteStream, Fetcher};

use super::records::{
    mode_for, msdos_time, CdLocation, Cdr, Compression, Eocd, Eocd64, LocalHeader, CDR_SIGNATURE,
    ZIP64_HEADER_ID,
};

/// 64 KiB covers the EOCD plus the longest possible file comment.
const EOCD_PREFETCH_SIZE: u64 = 65536;

/// Worst-case slack for the local header's variable-length fields when
/// over-reading the member body in one request.
const LOCAL_HEADER_SLACK: u64 = 1024;

pub struct CentralDirectoryParser<F: Fetcher + ?Sized> {
    fetcher: Arc<F>,
}

impl<F: Fetcher + ?Sized> CentralDirectoryParser<F> {
    pub fn new(fetcher: Arc<F>) -> Self {
        Self { fetcher }
    }

    async fn eocd_buffer(&self) -> Result<Vec<u8>> {
        let mut reader = self.fetcher.fetch(None, Some(EOCD_PREFETCH_SIZE)).await?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    /// Locate the central directory by scanning the archive tail.
    pub async fn cd_location(&self) -> Result<CdLocation> {
        let buf = self.eocd_buffer().await?;
        if buf.len() < Eocd::SIZE {
            return Err(Error::InvalidZip("archive too small"));
        }
        let mut position = buf.len() - Eocd::SIZE;
        loop {
            if buf[position..].starts_with(Eocd::SIGNATURE) {
                let eocd = Eocd::from_bytes(&buf[position..])?;
                // A comment containing the signature bytes can produce a
                // false match; the comment length must account for the
                // rest of the buffer.
                if eocd.comment_len as usize == buf.len() - position - Eocd::SIZE {
                    if eocd.is_zip64() {
                        return zip64_location(&buf[..position]);
                    }
                    return Ok(CdLocation {
                        offset: u64::from(eocd.cd_offset),
                        size_bytes: u64::from(eocd.cd_size_bytes),
                        zip64: false,
                    });
                }
            }
            if position == 0 {
                return Err(Error::InvalidZip("end of central directory not found"));
            }
            position -= 1;
        }
    }

    /// Fetch and decode every central directory record, in CD order.
    pub async fn get_central_directory(&self) -> Result<Vec<Cdr>> {
        let loc = self.cd_location().await?;
        if loc.size_bytes == 0 {
            return Ok(Vec::new());
        }
        let fetch_start = Instant::now();
        let mut reader = self
            .fetcher
            .fetch(Some(loc.offset), Some(loc.offset + loc.size_bytes - 1))
            .await?;
        let mut buf = Vec::with_capacity(loc.size_bytes as usize);
        reader.read_to_end(&mut buf).await?;
        tracing::debug!(
            size_bytes = buf.len(),
            took_ms = fetch_start.elapsed().as_millis() as u64,
            "read central directory"
        );

        let parse_start = Instant::now();
        let mut cursor = Cursor::new(buf.as_slice());
        let mut records = Vec::new();
        while cursor.position() < loc.size_bytes {
            records.push(read_cdr(&mut cursor)?);
        }
        tracing::debug!(
            records = records.len(),
            took_ms = parse_start.elapsed().as_millis() as u64,
            "parse central directory"
        );
        Ok(records)
    }

    /// Open a decompressing reader for one record's body.
    ///
    /// A single range request covers the local header (over-read, since
    /// its variable-length fields are unknown) and the compressed body.
    /// The header's own name/extra lengths are authoritative for where
    /// the body starts; the CD's compressed size caps it — data
    /// descriptor trailers are never consulted.
    pub async fn reader_for_record(&self, record: &Cdr) -> Result<ByteStream> {
        let offset = record.local_header_offset;
        let over_read =
            LocalHeader::SIZE as u64 + record.file_name.len() as u64 + LOCAL_HEADER_SLACK;
        let total = record.compressed_size_bytes + over_read;
        let mut reader = self.fetcher.fetch(Some(offset), Some(offset + total - 1)).await?;

        let mut header_buf = [0u8; LocalHeader::SIZE];
        reader
            .read_exact(&mut header_buf)
            .await
            .map_err(|_| Error::InvalidZip("truncated local file header"))?;
        let header = LocalHeader::from_bytes(&header_buf)?;

        // Skip the local header's variable fields; these lengths may
        // differ from the central directory's.
        let skip = usize::from(header.file_name_length) + usize::from(header.extra_field_length);
        let mut discard = vec![0u8; skip];
        reader
            .read_exact(&mut discard)
            .await
            .map_err(|_| Error::InvalidZip("truncated local file header"))?;

        let body = reader.take(record.compressed_size_bytes);
        match record.compression_method {
            Compression::Stored => Ok(Box::new(body)),
            Compression::Deflate => Ok(Box::new(
                async_compression::tokio::bufread::DeflateDecoder::new(BufReader::new(body)),
            )),
            Compression::Unknown(_) => Err(Error::InvalidZip("unsupported compression method")),
        }
    }

    /// Open a streaming reader for the named member.
    ///
    /// ZIP permits duplicate names; the first match in central-directory
    /// order wins here, which is implementation-defined behavior.
    pub async fn read(&self, file_name: &str) -> Result<ByteStream> {
        let directory = self.get_central_directory().await?;
        for record in &directory {
            if record.file_name == file_name {
                return self.reader_for_record(record).await;
            }
        }
        Err(Error::FileNotFound(file_name.to_string()))
    }
}

fn zip64_location(buf: &[u8]) -> Result<CdLocation> {
    let position = rfind_signature(buf, Eocd64::SIGNATURE)
        .ok_or(Error::InvalidZip("zip64 end of central directory not found"))?;
    let eocd64 = Eocd64::from_bytes(&buf[position..])?;
    Ok(CdLocation { offset: eocd64.cd_offset, size_bytes: eocd64.cd_size_bytes, zip64: true })
}

fn rfind_signature(buf: &[u8], signature: &[u8]) -> Option<usize> {
    (0..=buf.len().checked_sub(signature.len())?)
        .rev()
        .find(|&i| &buf[i..i + signature.len()] == signature)
}

/// Values promoted out of a record's zip64 extra field.
#[derive(Default)]
struct Zip64Extra {
    uncompressed_size: Option<u64>,
    compressed_size: Option<u64>,
    local_header_offset: Option<u64>,
}

/// Scan the extra-field block for the zip64 header (id 0x0001) and pull
/// the 64-bit values for exactly the fields whose 32-bit counterparts
/// carried the sentinel.
fn parse_zip64_extra(
    extra: &[u8],
    need_uncompressed: bool,
    need_compressed: bool,
    need_offset: bool,
) -> Zip64Extra {
    let mut out = Zip64Extra::default();
    let mut i = 0usize;
    while i + 4 <= extra.len() {
        let header_id = u16::from_le_bytes([extra[i], extra[i + 1]]);
        let data_size = u16::from_le_bytes([extra[i + 2], extra[i + 3]]) as usize;
        let data_end = (i + 4 + data_size).min(extra.len());
        if header_id == ZIP64_HEADER_ID {
            let mut cursor = Cursor::new(&extra[i + 4..data_end]);
            if need_uncompressed {
                out.uncompressed_size = ReadBytesExt::read_u64::<LittleEndian>(&mut cursor).ok();
            }
            if need_compressed {
                out.compressed_size = ReadBytesExt::read_u64::<LittleEndian>(&mut cursor).ok();
            }
            if need_offset {
                out.local_header_offset = ReadBytesExt::read_u64::<LittleEndian>(&mut cursor).ok();
            }
            return out;
        }
        i = data_end;
    }
    out
}

/// Decode one Central Directory File Header at the cursor.
fn read_cdr(cursor: &mut Cursor<&[u8]>) -> Result<Cdr> {
    let mut signature = [0u8; 4];
    std::io::Read::read_exact(cursor, &mut signature)
        .map_err(|_| Error::InvalidZip("truncated central directory"))?;
    if signature != CDR_SIGNATURE {
        return Err(Error::InvalidZip("bad central directory record signature"));
    }

    let creator_version = ReadBytesExt::read_u16::<LittleEndian>(cursor)?;
    let _version_needed = ReadBytesExt::read_u16::<LittleEndian>(cursor)?;
    let _flags = ReadBytesExt::read_u16::<LittleEndian>(cursor)?;
    let compression_method = ReadBytesExt::read_u16::<LittleEndian>(cursor)?;
    let mod_time = ReadBytesExt::read_u16::<LittleEndian>(cursor)?;
    let mod_date = ReadBytesExt::read_u16::<LittleEndian>(cursor)?;
    let crc32_uncompressed = ReadBytesExt::read_u32::<LittleEndian>(cursor)?;
    let compressed_size_raw = ReadBytesExt::read_u32::<LittleEndian>(cursor)?;
    let uncompressed_size_raw = ReadBytesExt::read_u32::<LittleEndian>(cursor)?;
    let file_name_length = ReadBytesExt::read_u16::<LittleEndian>(cursor)?;
    let extra_field_length = ReadBytesExt::read_u16::<LittleEndian>(cursor)?;
    let file_comment_length = ReadBytesExt::read_u16::<LittleEndian>(cursor)?;
    let _disk_number_start = ReadBytesExt::read_u16::<LittleEndian>(cursor)?;
    let _internal_attrs = ReadBytesExt::read_u16::<LittleEndian>(cursor)?;
    let external_attrs = ReadBytesExt::read_u32::<LittleEndian>(cursor)?;
    let local_header_offset_raw = ReadBytesExt::read_u32::<LittleEndian>(cursor)?;

    let mut file_name_bytes = vec![0u8; file_name_length as usize];
    std::io::Read::read_exact(cursor, &mut file_name_bytes)
        .map_err(|_| Error::InvalidZip("truncated central directory"))?;
    let file_name = String::from_utf8_lossy(&file_name_bytes).to_string();

    let mut extra = vec![0u8; extra_field_length as usize];
    std::io::Read::read_exact(cursor, &mut extra)
        .map_err(|_| Error::InvalidZip("truncated central directory"))?;

    let mut comment = vec![0u8; file_comment_length as usize];
    std::io::Read::read_exact(cursor, &mut comment)
        .map_err(|_| Error::InvalidZip("truncated central directory"))?;

    let need_uncompressed = uncompressed_size_raw == 0xffff_ffff;
    let need_compressed = compressed_size_raw == 0xffff_ffff;
    let need_offset = local_header_offset_raw == 0xffff_ffff;
    let zip64 = parse_zip64_extra(&extra, need_uncompressed, need_compressed, need_offset);

    let uncompressed_size_bytes = if need_uncompressed {
        zip64
            .uncompressed_size
            .ok_or(Error::InvalidZip("sentinel uncompressed size without zip64 field"))?
    } else {
        u64::from(uncompressed_size_raw)
    };
    let compressed_size_bytes = if need_compressed {
        zip64
            .compressed_size
            .ok_or(Error::InvalidZip("sentinel compressed size without zip64 field"))?
    } else {
        u64::from(compressed_size_raw)
    };
    let local_header_offset = if need_offset {
        zip64
            .local_header_offset
            .ok_or(Error::InvalidZip("sentinel local header offset without zip64 field"))?
    } else {
        u64::from(local_header_offset_raw)
    };

    Ok(Cdr {
        mode: mode_for(creator_version, external_attrs, &file_name),
        modified: msdos_time(mod_date, mod_time),
        file_name,
        compression_method: Compression::from_u16(compression_method),
        crc32_uncompressed,
        compressed_size_bytes,
        uncompressed_size_bytes,
        local_header_offset,
    })
}
