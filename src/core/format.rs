//! Purpose: Centralize on-wire constants and bounds-checked little-endian byte access.
//! Exports: format constants, `ByteReader`, `read_u32_at`, `read_u64_at`, `write_u32_at`, `write_u64_at`.
//! Role: Shared by the blob codec, the segment header, and frame handling.
//! Invariants: Every read and write is checked against the slice it is given; no helper panics.
//! Invariants: All multi-byte integers are little-endian.

use crate::core::error::{Error, ErrorKind};

pub const BLOB_MAGIC: [u8; 4] = *b"CTB1";
pub const SEGMENT_MAGIC: [u8; 4] = *b"CSHM";
pub const SEGMENT_FORMAT_VERSION: u32 = 1;
pub const ENDIANNESS_LE: u8 = 1;
pub const CATALOG_FORMAT_VERSION: u32 = 1;

/// Fixed width of every Int64/Float64 element.
pub const NUMERIC_WIDTH: usize = 8;

pub fn read_u32_at(buf: &[u8], offset: usize) -> Result<u32, Error> {
    Ok(u32::from_le_bytes(read_array::<4>(buf, offset)?))
}

pub fn read_u64_at(buf: &[u8], offset: usize) -> Result<u64, Error> {
    Ok(u64::from_le_bytes(read_array::<8>(buf, offset)?))
}

pub fn read_array<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N], Error> {
    let end = offset
        .checked_add(N)
        .ok_or_else(|| Error::corrupt("offset overflow"))?;
    let bytes = buf.get(offset..end).ok_or_else(|| {
        Error::corrupt(format!("read of {N} bytes past end of buffer")).with_offset(offset as u64)
    })?;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

pub fn write_u32_at(buf: &mut [u8], offset: usize, value: u32) -> Result<(), Error> {
    write_array(buf, offset, value.to_le_bytes())
}

pub fn write_u64_at(buf: &mut [u8], offset: usize, value: u64) -> Result<(), Error> {
    write_array(buf, offset, value.to_le_bytes())
}

// Leaves `buf` untouched when the write would not fit.
fn write_array<const N: usize>(
    buf: &mut [u8],
    offset: usize,
    bytes: [u8; N],
) -> Result<(), Error> {
    let slot = offset
        .checked_add(N)
        .and_then(|end| buf.get_mut(offset..end))
        .ok_or_else(|| {
            Error::new(ErrorKind::Internal)
                .with_message(format!("write of {N} bytes past end of buffer"))
                .with_offset(offset as u64)
        })?;
    slot.copy_from_slice(&bytes);
    Ok(())
}

/// Forward-only cursor over a byte slice.
#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        let [byte] = read_array::<1>(self.buf, self.pos)?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_u32(&mut self) -> Result<u32, Error> {
        let value = read_u32_at(self.buf, self.pos)?;
        self.pos += 4;
        Ok(value)
    }

    pub fn read_u64(&mut self) -> Result<u64, Error> {
        let value = read_u64_at(self.buf, self.pos)?;
        self.pos += 8;
        Ok(value)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], Error> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or_else(|| Error::corrupt("length overflow"))?;
        let bytes = self.buf.get(self.pos..end).ok_or_else(|| {
            Error::corrupt(format!("{len}-byte field runs past end of buffer"))
                .with_offset(self.pos as u64)
        })?;
        self.pos = end;
        Ok(bytes)
    }

    /// Reads a u32 length prefix followed by that many UTF-8 bytes.
    pub fn read_str(&mut self) -> Result<&'a str, Error> {
        let start = self.pos;
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes).map_err(|err| {
            Error::corrupt("string is not valid UTF-8")
                .with_offset(start as u64)
                .with_source(err)
        })
    }

    pub fn skip(&mut self, len: usize) -> Result<(), Error> {
        self.read_bytes(len).map(|_| ())
    }
}
