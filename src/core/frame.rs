// Frame layout: a u32 little-endian blob length followed by the blob bytes.
use crate::core::error::{Error, ErrorKind};
use crate::core::format::{read_u32_at, write_u32_at};

pub const FRAME_PREFIX_LEN: usize = 4;

/// Total frame length for a blob, or `Usage` if the blob cannot be framed.
pub fn frame_len(blob_len: usize) -> Result<usize, Error> {
    if blob_len > u32::MAX as usize {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("blob of {blob_len} bytes exceeds frame limit")));
    }
    Ok(FRAME_PREFIX_LEN + blob_len)
}

/// Writes `blob` as a frame filling `dst`, which must be exactly `frame_len` long.
pub fn write_frame(dst: &mut [u8], blob: &[u8]) -> Result<(), Error> {
    let expected = frame_len(blob.len())?;
    if dst.len() != expected {
        return Err(Error::new(ErrorKind::Internal).with_message(format!(
            "frame slot is {} bytes, expected {expected}",
            dst.len()
        )));
    }
    write_u32_at(dst, 0, blob.len() as u32)?;
    dst[FRAME_PREFIX_LEN..].copy_from_slice(blob);
    Ok(())
}

/// Blob byte range of the frame starting at `offset` within `data`.
pub fn blob_range(data: &[u8], offset: usize) -> Result<std::ops::Range<usize>, Error> {
    let len = read_u32_at(data, offset).map_err(|err| err.with_offset(offset as u64))? as usize;
    let start = offset + FRAME_PREFIX_LEN;
    let end = start
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| {
            Error::corrupt(format!("frame length {len} runs past written data"))
                .with_offset(offset as u64)
        })?;
    Ok(start..end)
}
