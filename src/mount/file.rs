//! Open handles served to the filesystem facades.
//!
//! A handle is either a fully materialized cache file on disk or an
//! in-memory buffer (pseudo-files). Both support positional reads; any
//! mutation is rejected with [`Error::ReadOnly`].

use bytes::Bytes;

use crate::error::{Error, Result};

pub enum FileHandle {
    Disk(std::fs::File),
    Mem(Bytes),
}

impl FileHandle {
    pub fn size(&self) -> Result<u64> {
        match self {
            FileHandle::Disk(f) => Ok(f.metadata()?.len()),
            FileHandle::Mem(b) => Ok(b.len() as u64),
        }
    }

    /// Positional read; short reads happen only at end of file.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        match self {
            FileHandle::Disk(f) => {
                #[cfg(unix)]
                {
                    use std::os::unix::fs::FileExt;
                    Ok(f.read_at(buf, offset)?)
                }
                #[cfg(windows)]
                {
                    use std::os::windows::fs::FileExt;
                    Ok(f.seek_read(buf, offset)?)
                }
            }
            FileHandle::Mem(b) => {
                let len = b.len() as u64;
                if offset >= len {
                    return Ok(0);
                }
                let available = &b[offset as usize..];
                let n = available.len().min(buf.len());
                buf[..n].copy_from_slice(&available[..n]);
                Ok(n)
            }
        }
    }

    /// Read exactly `count` bytes at `offset`, or fewer at end of file.
    pub fn read_range(&self, offset: u64, count: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; count];
        let mut filled = 0usize;
        while filled < count {
            let n = self.read_at(&mut out[filled..], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        out.truncate(filled);
        Ok(out)
    }

    pub fn write_at(&self, _buf: &[u8], _offset: u64) -> Result<usize> {
        Err(Error::ReadOnly)
    }

    pub fn truncate(&self, _size: u64) -> Result<()> {
        Err(Error::ReadOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_positional_reads() {
        let h = FileHandle::Mem(Bytes::from_static(b"0123456789"));
        assert_eq!(h.read_range(0, 4).unwrap(), b"0123");
        assert_eq!(h.read_range(8, 10).unwrap(), b"89");
        assert_eq!(h.read_range(10, 4).unwrap(), b"");
        assert_eq!(h.size().unwrap(), 10);
    }

    #[test]
    fn writes_are_rejected() {
        let h = FileHandle::Mem(Bytes::from_static(b"x"));
        assert!(matches!(h.write_at(b"y", 0), Err(Error::ReadOnly)));
        assert!(matches!(h.truncate(0), Err(Error::ReadOnly)));
    }
}
