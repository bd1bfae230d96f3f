//! Purpose: Durable name -> frame directory over one segment.
//! Exports: `Catalog`, `CatalogEntry`, `CatalogOptions`, `Durability`.
//! Role: Write path (`add`) and zero-copy read path (`get`, `get_mut`) for named tables.
//! Invariants: Entries are append-only; a name is written once and never overwritten.
//! Invariants: Appends hold the segment's append lock and re-read the persisted catalog first.
//! Invariants: The persisted file is replaced atomically (write temp, fsync, rename).

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

use crate::core::encode::encode;
use crate::core::error::{Error, ErrorKind};
use crate::core::format::CATALOG_FORMAT_VERSION;
use crate::core::segment::Segment;
use crate::core::table::Table;
use crate::segment_paths::catalog_path;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum Durability {
    /// Persist the catalog file only.
    #[default]
    Fast,
    /// Also flush the appended frame and segment header.
    Flush,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CatalogOptions {
    pub durability: Durability,
}

impl CatalogOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    /// Frame start within the segment's data area.
    pub offset: u64,
    /// Blob length, excluding the frame prefix.
    pub len: u64,
    pub created: String,
}

#[derive(Serialize, Deserialize)]
struct CatalogFile {
    version: u32,
    segment: String,
    entries: Vec<CatalogEntry>,
}

pub struct Catalog {
    segment: Segment,
    path: PathBuf,
    options: CatalogOptions,
    entries: BTreeMap<String, CatalogEntry>,
}

impl Catalog {
    /// Loads the persisted mapping for `segment`; a missing file is an empty catalog.
    pub fn open(segment: Segment, options: CatalogOptions) -> Result<Self, Error> {
        let path = catalog_path(segment.dir(), segment.name());
        let mut catalog = Self {
            segment,
            path,
            options,
            entries: BTreeMap::new(),
        };
        catalog.refresh()?;
        debug!(
            segment = catalog.segment.name(),
            entries = catalog.entries.len(),
            "opened catalog"
        );
        Ok(catalog)
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_segment(self) -> Segment {
        self.segment
    }

    pub fn close(self) -> Result<(), Error> {
        self.segment.close()
    }

    /// Replaces the in-memory mapping with the persisted one.
    pub fn refresh(&mut self) -> Result<(), Error> {
        self.entries = load(&self.path, self.segment.name())?
            .into_iter()
            .map(|entry| (entry.name.clone(), entry))
            .collect();
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Entries in segment order.
    pub fn entries(&self) -> Vec<&CatalogEntry> {
        let mut entries = self.entries.values().collect::<Vec<_>>();
        entries.sort_by_key(|entry| entry.offset);
        entries
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries().into_iter().map(|entry| entry.name.as_str()).collect()
    }

    /// Encodes and appends `table` under `name`. Returns `false`, changing nothing,
    /// when `name` already exists.
    pub fn add(&mut self, name: &str, table: &Table) -> Result<bool, Error> {
        if name.is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("table name must be non-empty"));
        }
        let _lock = self.segment.append_lock()?;
        self.refresh()?;
        if self.entries.contains_key(name) {
            warn!(segment = self.segment.name(), table = name, "table already exists; add ignored");
            return Ok(false);
        }

        let blob = encode(table)?;
        let offset = self.segment.append_frame(&blob)?;
        if self.options.durability == Durability::Flush {
            self.segment.flush_frame(offset)?;
        }

        let entry = CatalogEntry {
            name: name.to_string(),
            offset,
            len: blob.len() as u64,
            created: now_rfc3339(),
        };
        self.entries.insert(name.to_string(), entry);
        if let Err(err) = self.persist() {
            self.entries.remove(name);
            return Err(err);
        }
        debug!(segment = self.segment.name(), table = name, offset, len = blob.len(), "added table");
        Ok(true)
    }

    /// Looks up `name`, re-reading the persisted catalog once if it is not known locally.
    pub fn entry(&mut self, name: &str) -> Result<CatalogEntry, Error> {
        if !self.entries.contains_key(name) {
            self.refresh()?;
        }
        self.entries.get(name).cloned().ok_or_else(|| not_found(name))
    }

    /// Blob bytes for `name`, aliasing the live segment mapping.
    pub fn get(&self, name: &str) -> Result<&[u8], Error> {
        let entry = self.entries.get(name).ok_or_else(|| not_found(name))?;
        let blob = self.segment.frame(entry.offset)?;
        check_len(entry, blob.len())?;
        Ok(blob)
    }

    /// Mutable blob bytes for `name`; writes are visible to every attached process.
    pub fn get_mut(&mut self, name: &str) -> Result<&mut [u8], Error> {
        let entry = self.entries.get(name).ok_or_else(|| not_found(name))?;
        let blob = self.segment.frame_mut(entry.offset)?;
        check_len(entry, blob.len())?;
        Ok(blob)
    }

    fn persist(&self) -> Result<(), Error> {
        let file = CatalogFile {
            version: CATALOG_FORMAT_VERSION,
            segment: self.segment.name().to_string(),
            entries: self.entries().into_iter().cloned().collect(),
        };
        let json = serde_json::to_vec_pretty(&file).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode catalog")
                .with_source(err)
        })?;
        write_atomic(&self.path, &json)?;
        debug!(path = %self.path.display(), entries = file.entries.len(), "persisted catalog");
        Ok(())
    }
}

fn load(path: &Path, segment: &str) -> Result<Vec<CatalogEntry>, Error> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(Error::io(path, err).with_message("failed to read catalog")),
    };
    let file: CatalogFile = serde_json::from_slice(&bytes).map_err(|err| {
        Error::corrupt("catalog file is not valid JSON")
            .with_path(path)
            .with_source(err)
    })?;
    if file.version != CATALOG_FORMAT_VERSION {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("unsupported catalog version {}", file.version))
            .with_path(path));
    }
    if file.segment != segment {
        return Err(Error::corrupt(format!(
            "catalog belongs to segment {:?}",
            file.segment
        ))
        .with_path(path));
    }
    Ok(file.entries)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let mut staging = path.as_os_str().to_owned();
    staging.push(format!(".tmp-{}", std::process::id()));
    let staging = PathBuf::from(staging);
    let result = File::create(&staging)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&staging, path));
    if let Err(err) = result {
        let _ = fs::remove_file(&staging);
        return Err(Error::io(path, err).with_message("failed to persist catalog"));
    }
    sync_parent(path)
}

// The rename is only durable once the directory entry itself is on disk.
fn sync_parent(path: &Path) -> Result<(), Error> {
    let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) else {
        return Ok(());
    };
    File::open(dir)
        .and_then(|handle| handle.sync_all())
        .map_err(|err| Error::io(dir, err).with_message("failed to sync catalog directory"))
}

fn check_len(entry: &CatalogEntry, actual: usize) -> Result<(), Error> {
    if entry.len != actual as u64 {
        return Err(Error::corrupt(format!(
            "frame holds {actual} bytes, catalog expects {}",
            entry.len
        ))
        .with_offset(entry.offset));
    }
    Ok(())
}

fn not_found(name: &str) -> Error {
    Error::new(ErrorKind::NotFound).with_message(format!("no table named {name:?}"))
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
