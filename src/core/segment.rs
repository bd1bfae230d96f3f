// Named fixed-capacity shared region: create-or-attach, header validation, mmap, and append locking.
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use memmap2::MmapMut;
use tracing::{debug, info};

use crate::core::error::{Error, ErrorKind, io_error_kind};
use crate::core::format::{
    ENDIANNESS_LE, SEGMENT_FORMAT_VERSION, SEGMENT_MAGIC, read_u32_at, read_u64_at, write_u32_at,
    write_u64_at,
};
use crate::core::frame::{self, FRAME_PREFIX_LEN};
use crate::segment_paths::{catalog_path, region_path, validate_segment_name};

pub const HEADER_SIZE: usize = 4096;
pub const DEFAULT_CAPACITY: u64 = 200_000_000;

const CAPACITY_AT: usize = 16;
const DATA_OFFSET_AT: usize = 24;
const WRITE_CURSOR_AT: usize = 32;
const FRAME_COUNT_AT: usize = 40;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SegmentHeader {
    pub capacity: u64,
    pub data_offset: u64,
    pub write_cursor: u64,
    pub frame_count: u64,
}

impl SegmentHeader {
    fn new(capacity: u64) -> Self {
        Self {
            capacity,
            data_offset: HEADER_SIZE as u64,
            write_cursor: 0,
            frame_count: 0,
        }
    }

    fn encode(&self) -> Result<[u8; HEADER_SIZE], Error> {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&SEGMENT_MAGIC);
        write_u32_at(&mut buf, 4, SEGMENT_FORMAT_VERSION)?;
        buf[8] = ENDIANNESS_LE;
        write_u64_at(&mut buf, CAPACITY_AT, self.capacity)?;
        write_u64_at(&mut buf, DATA_OFFSET_AT, self.data_offset)?;
        write_u64_at(&mut buf, WRITE_CURSOR_AT, self.write_cursor)?;
        write_u64_at(&mut buf, FRAME_COUNT_AT, self.frame_count)?;
        Ok(buf)
    }

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::corrupt("segment header too small"));
        }
        if buf[0..4] != SEGMENT_MAGIC {
            return Err(Error::corrupt("bad segment magic"));
        }
        let version = read_u32_at(buf, 4)?;
        if version != SEGMENT_FORMAT_VERSION {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("unsupported segment format version {version}"))
                .with_hint("Unlink the segment and recreate it with this version."));
        }
        if buf[8] != ENDIANNESS_LE {
            return Err(Error::corrupt("unsupported endianness"));
        }
        Ok(Self {
            capacity: read_u64_at(buf, CAPACITY_AT)?,
            data_offset: read_u64_at(buf, DATA_OFFSET_AT)?,
            write_cursor: read_u64_at(buf, WRITE_CURSOR_AT)?,
            frame_count: read_u64_at(buf, FRAME_COUNT_AT)?,
        })
    }

    fn validate(&self, actual_file_size: u64) -> Result<(), Error> {
        if self.data_offset != HEADER_SIZE as u64 {
            return Err(Error::corrupt("invalid data offset"));
        }
        let end = self.data_offset.checked_add(self.capacity);
        if self.capacity == 0 || end.is_none_or(|end| end > actual_file_size) {
            return Err(Error::corrupt("capacity exceeds region size"));
        }
        if self.write_cursor > self.capacity {
            return Err(Error::corrupt("write cursor past capacity"));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SegmentOptions {
    pub capacity: u64,
}

impl SegmentOptions {
    pub fn new(capacity: u64) -> Self {
        Self { capacity }
    }
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

pub struct Segment {
    name: String,
    dir: PathBuf,
    path: PathBuf,
    file: File,
    mmap: MmapMut,
    capacity: u64,
    created: bool,
}

impl Segment {
    /// Attaches to `name` in `dir`, creating it with `options` if no process has yet.
    pub fn create_or_attach(
        dir: impl AsRef<Path>,
        name: &str,
        options: SegmentOptions,
    ) -> Result<Self, Error> {
        validate_segment_name(name)?;
        let dir = dir.as_ref();
        if let Some(segment) = Self::create(dir, name, options)? {
            return Ok(segment);
        }
        Self::attach(dir, name)
    }

    /// Attaches to an existing segment; `NotFound` if none exists.
    pub fn attach(dir: impl AsRef<Path>, name: &str) -> Result<Self, Error> {
        validate_segment_name(name)?;
        let dir = dir.as_ref().to_path_buf();
        let path = region_path(&dir, name);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| Error::io(&path, err).with_message("failed to open segment"))?;

        let actual_size = file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|err| Error::io(&path, err))?;
        let header = read_header(&mut file, &path)?;
        header
            .validate(actual_size)
            .map_err(|err| err.with_path(&path))?;

        let mmap = map(&file, &path)?;
        info!(segment = name, capacity = header.capacity, used = header.write_cursor, "attached segment");
        Ok(Self {
            name: name.to_string(),
            dir,
            path,
            file,
            mmap,
            capacity: header.capacity,
            created: false,
        })
    }

    // Builds the region under a private name and publishes it with a hard link,
    // so attachers never observe a region without a header.
    fn create(dir: &Path, name: &str, options: SegmentOptions) -> Result<Option<Self>, Error> {
        let path = region_path(dir, name);
        if path.exists() {
            return Ok(None);
        }
        if options.capacity == 0 {
            return Err(Error::new(ErrorKind::Usage).with_message("capacity must be non-zero"));
        }
        let header = SegmentHeader::new(options.capacity).encode()?;
        fs::create_dir_all(dir).map_err(|err| Error::io(dir, err))?;

        let staging = dir.join(format!(".{name}.{}.staging", std::process::id()));
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&staging)
            .map_err(|err| Error::io(&staging, err))?;
        let publish = file
            .set_len(HEADER_SIZE as u64 + options.capacity)
            .and_then(|()| write_header(&mut file, &header))
            .and_then(|()| fs::hard_link(&staging, &path));
        let _ = fs::remove_file(&staging);
        match publish {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
            Err(err) => return Err(Error::io(&path, err).with_message("failed to publish segment")),
        }

        let mmap = map(&file, &path)?;
        info!(segment = name, capacity = options.capacity, path = %path.display(), "created segment");
        Ok(Some(Self {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            path,
            file,
            mmap,
            capacity: options.capacity,
            created: true,
        }))
    }

    /// Removes the region and its persisted catalog; attached mappings stay valid until dropped.
    pub fn unlink(dir: impl AsRef<Path>, name: &str) -> Result<(), Error> {
        validate_segment_name(name)?;
        let dir = dir.as_ref();
        let path = region_path(dir, name);
        fs::remove_file(&path)
            .map_err(|err| Error::io(&path, err).with_message("failed to unlink segment"))?;
        let catalog = catalog_path(dir, name);
        match fs::remove_file(&catalog) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(Error::io(&catalog, err)),
        }
        info!(segment = name, "unlinked segment");
        Ok(())
    }

    /// Unmaps this process's view; the region persists for other processes.
    pub fn close(self) -> Result<(), Error> {
        self.mmap
            .flush_async()
            .map_err(|err| Error::io(&self.path, err))?;
        debug!(segment = %self.name, "closed segment");
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when this handle created the region rather than attaching to it.
    pub fn created(&self) -> bool {
        self.created
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes of the data area occupied by frames; read live from the shared header.
    pub fn used(&self) -> u64 {
        self.header().write_cursor
    }

    pub fn remaining(&self) -> u64 {
        self.capacity.saturating_sub(self.used())
    }

    pub fn frame_count(&self) -> u64 {
        self.header().frame_count
    }

    pub fn header(&self) -> SegmentHeader {
        SegmentHeader {
            capacity: self.capacity,
            data_offset: HEADER_SIZE as u64,
            write_cursor: read_u64_at(&self.mmap, WRITE_CURSOR_AT).unwrap_or(0).min(self.capacity),
            frame_count: read_u64_at(&self.mmap, FRAME_COUNT_AT).unwrap_or(0),
        }
    }

    /// Exclusive advisory lock serializing appenders across processes; released on drop.
    pub fn append_lock(&self) -> Result<AppendLock, Error> {
        let lock_err = |err: io::Error| {
            Error::new(io_error_kind(&err))
                .with_message("failed to lock segment")
                .with_path(&self.path)
                .with_source(err)
        };
        let file = self.file.try_clone().map_err(lock_err)?;
        file.lock_exclusive().map_err(lock_err)?;
        Ok(AppendLock { file })
    }

    /// Appends `blob` as one frame at the write cursor and returns the frame offset.
    /// Fails with `OutOfMemory`, writing nothing, when the frame does not fit.
    pub fn append_frame(&mut self, blob: &[u8]) -> Result<u64, Error> {
        let len = frame::frame_len(blob.len())? as u64;
        let header = self.header();
        let offset = header.write_cursor;
        if offset + len > self.capacity {
            return Err(Error::new(ErrorKind::OutOfMemory)
                .with_message(format!(
                    "frame of {len} bytes does not fit ({} of {} bytes free)",
                    self.capacity - offset,
                    self.capacity
                ))
                .with_path(&self.path)
                .with_offset(offset));
        }

        let start = HEADER_SIZE + offset as usize;
        let slot = self
            .mmap
            .get_mut(start..start + len as usize)
            .ok_or_else(|| Error::corrupt("frame slot past end of mapping").with_offset(offset))?;
        frame::write_frame(slot, blob)?;
        write_u64_at(&mut self.mmap, WRITE_CURSOR_AT, offset + len)?;
        write_u64_at(&mut self.mmap, FRAME_COUNT_AT, header.frame_count + 1)?;
        debug!(segment = %self.name, offset, len, "appended frame");
        Ok(offset)
    }

    /// Blob bytes of the frame at `offset`, aliasing the shared mapping.
    pub fn frame(&self, offset: u64) -> Result<&[u8], Error> {
        let range = self.blob_range(offset)?;
        Ok(&self.mmap[range])
    }

    pub fn frame_mut(&mut self, offset: u64) -> Result<&mut [u8], Error> {
        let range = self.blob_range(offset)?;
        Ok(&mut self.mmap[range])
    }

    pub fn frames(&self) -> FrameIter<'_> {
        FrameIter {
            data: self.data(),
            pos: 0,
            failed: false,
        }
    }

    pub fn flush_frame(&self, offset: u64) -> Result<(), Error> {
        let range = self.blob_range(offset)?;
        let start = range.start - FRAME_PREFIX_LEN;
        self.mmap
            .flush_range(start, range.end - start)
            .and_then(|()| self.mmap.flush_range(0, HEADER_SIZE))
            .map_err(|err| Error::io(&self.path, err))
    }

    fn data(&self) -> &[u8] {
        &self.mmap[HEADER_SIZE..HEADER_SIZE + self.used() as usize]
    }

    fn blob_range(&self, offset: u64) -> Result<std::ops::Range<usize>, Error> {
        let used = self.used();
        if offset >= used {
            return Err(Error::corrupt(format!("frame offset past write cursor ({used})"))
                .with_offset(offset)
                .with_path(&self.path));
        }
        let range = frame::blob_range(self.data(), offset as usize)
            .map_err(|err| err.with_path(&self.path))?;
        Ok(HEADER_SIZE + range.start..HEADER_SIZE + range.end)
    }
}

#[derive(Debug, Eq, PartialEq)]
pub struct FrameRef<'a> {
    pub offset: u64,
    pub blob: &'a [u8],
}

/// Walks frames from the start of the data area to the write cursor.
pub struct FrameIter<'a> {
    data: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = Result<FrameRef<'a>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.data.len() {
            return None;
        }
        match frame::blob_range(self.data, self.pos) {
            Ok(range) => {
                let offset = self.pos as u64;
                self.pos = range.end;
                Some(Ok(FrameRef {
                    offset,
                    blob: &self.data[range],
                }))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

pub struct AppendLock {
    file: File,
}

impl Drop for AppendLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn map(file: &File, path: &Path) -> Result<MmapMut, Error> {
    // SAFETY: the region is shared with other processes by design; all
    // structured reads are bounds-checked against the mapping length.
    unsafe { MmapMut::map_mut(file).map_err(|err| Error::io(path, err).with_message("failed to map segment")) }
}

fn read_header(file: &mut File, path: &Path) -> Result<SegmentHeader, Error> {
    let mut buf = [0u8; HEADER_SIZE];
    file.seek(SeekFrom::Start(0))
        .map_err(|err| Error::io(path, err))?;
    file.read_exact(&mut buf).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Error::corrupt("segment shorter than header").with_path(path)
        } else {
            Error::io(path, err)
        }
    })?;
    SegmentHeader::decode(&buf).map_err(|err| err.with_path(path))
}

fn write_header(file: &mut File, header: &[u8]) -> Result<(), io::Error> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(header)?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::{HEADER_SIZE, Segment, SegmentHeader, SegmentOptions};
    use crate::core::error::ErrorKind;
    use crate::core::frame::FRAME_PREFIX_LEN;
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};

    #[test]
    fn first_caller_creates_later_callers_attach() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = Segment::create_or_attach(dir.path(), "seg", SegmentOptions::new(1024))
            .expect("create");
        assert!(first.created());
        assert_eq!(first.capacity(), 1024);

        let second = Segment::create_or_attach(dir.path(), "seg", SegmentOptions::new(99))
            .expect("attach");
        assert!(!second.created());
        assert_eq!(second.capacity(), 1024);
        assert_eq!(second.used(), 0);
    }

    #[test]
    fn appends_are_visible_through_other_handles() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer =
            Segment::create_or_attach(dir.path(), "seg", SegmentOptions::new(1024)).unwrap();
        let reader = Segment::attach(dir.path(), "seg").unwrap();

        let a = writer.append_frame(b"first").unwrap();
        let b = writer.append_frame(b"second").unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, (FRAME_PREFIX_LEN + 5) as u64);
        assert_eq!(reader.used(), (2 * FRAME_PREFIX_LEN + 11) as u64);
        assert_eq!(reader.frame_count(), 2);
        assert_eq!(reader.frame(b).unwrap(), b"second");

        writer.frame_mut(a).unwrap()[0] = b'F';
        assert_eq!(reader.frame(a).unwrap(), b"First");

        let frames = reader.frames().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].offset, b);
    }

    #[test]
    fn full_segment_rejects_append_without_writing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut segment =
            Segment::create_or_attach(dir.path(), "seg", SegmentOptions::new(16)).unwrap();
        segment.append_frame(&[1u8; 8]).unwrap();
        let used = segment.used();

        let err = segment.append_frame(&[2u8; 8]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);
        assert_eq!(segment.used(), used);
        assert_eq!(segment.frame_count(), 1);

        // exact fit still succeeds
        segment.append_frame(&[3u8; 0]).unwrap();
        assert_eq!(segment.used(), 16);
        assert_eq!(segment.remaining(), 0);
    }

    #[test]
    fn offsets_past_cursor_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let segment =
            Segment::create_or_attach(dir.path(), "seg", SegmentOptions::new(64)).unwrap();
        assert_eq!(segment.frame(0).unwrap_err().kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn attach_missing_is_not_found_and_unlink_removes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = Segment::attach(dir.path(), "nope").err().expect("missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let segment = Segment::create_or_attach(dir.path(), "seg", SegmentOptions::new(64)).unwrap();
        segment.close().unwrap();
        Segment::unlink(dir.path(), "seg").unwrap();
        assert_eq!(
            Segment::attach(dir.path(), "seg").err().map(|err| err.kind()),
            Some(ErrorKind::NotFound)
        );
        assert_eq!(
            Segment::unlink(dir.path(), "seg").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn corrupt_header_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("seg.colshm");
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .read(true)
            .open(&path)
            .expect("create");
        file.set_len((HEADER_SIZE + 64) as u64).expect("len");
        file.seek(SeekFrom::Start(0)).expect("seek");
        file.write_all(b"NOPE").expect("write");
        file.flush().expect("flush");

        let err = Segment::create_or_attach(dir.path(), "seg", SegmentOptions::new(64))
            .err()
            .expect("corrupt");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn oversized_capacity_in_header_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("seg.colshm");
        let header = SegmentHeader {
            capacity: u64::MAX - 100,
            ..SegmentHeader::new(1)
        }
        .encode()
        .expect("encode");
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&path)
            .expect("create");
        file.set_len((HEADER_SIZE + 64) as u64).expect("len");
        file.write_all(&header).expect("write");
        file.flush().expect("flush");

        let err = Segment::attach(dir.path(), "seg").err().expect("corrupt");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn attach_keeps_existing_capacity_even_when_zero_requested() {
        let dir = tempfile::tempdir().expect("tempdir");
        Segment::create_or_attach(dir.path(), "seg", SegmentOptions::new(4096)).expect("create");
        let attached = Segment::create_or_attach(dir.path(), "seg", SegmentOptions::new(0))
            .expect("attach");
        assert!(!attached.created());
        assert_eq!(attached.capacity(), 4096);
    }

    #[test]
    fn zero_capacity_is_usage_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = Segment::create_or_attach(dir.path(), "seg", SegmentOptions::new(0))
            .err()
            .expect("zero");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
