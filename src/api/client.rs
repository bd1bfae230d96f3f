//! Purpose: Directory-scoped segment lifecycle for the API and CLI.
//! Exports: `LocalClient`, `ApiResult`.
//! Role: Resolves segment names to files and opens catalogs over them.
//! Invariants: Name resolution matches `segment_paths`; the CLI goes through this type.
#![allow(clippy::result_large_err)]

use std::path::{Path, PathBuf};

use super::tables::{CatalogApiExt, SegmentInfo};
use crate::core::catalog::{Catalog, CatalogOptions};
use crate::core::error::{Error, io_error_kind};
use crate::core::segment::{Segment, SegmentOptions};
use crate::core::validate::{ValidationReport, validate};
use crate::segment_paths::{REGION_EXTENSION, default_segment_dir};

pub type ApiResult<T> = Result<T, Error>;

#[derive(Clone, Debug)]
pub struct LocalClient {
    segment_dir: PathBuf,
    catalog_options: CatalogOptions,
}

impl LocalClient {
    pub fn new() -> Self {
        Self {
            segment_dir: default_segment_dir(),
            catalog_options: CatalogOptions::new(),
        }
    }

    pub fn with_segment_dir(mut self, segment_dir: impl Into<PathBuf>) -> Self {
        self.segment_dir = segment_dir.into();
        self
    }

    pub fn with_catalog_options(mut self, options: CatalogOptions) -> Self {
        self.catalog_options = options;
        self
    }

    pub fn segment_dir(&self) -> &Path {
        &self.segment_dir
    }

    /// Attaches to `name`, creating it with `options` when it does not exist yet.
    pub fn open(&self, name: &str, options: SegmentOptions) -> ApiResult<Catalog> {
        let segment = Segment::create_or_attach(&self.segment_dir, name, options)?;
        Catalog::open(segment, self.catalog_options)
    }

    /// Attaches to an existing segment only.
    pub fn attach(&self, name: &str) -> ApiResult<Catalog> {
        let segment = Segment::attach(&self.segment_dir, name)?;
        Catalog::open(segment, self.catalog_options)
    }

    pub fn info(&self, name: &str) -> ApiResult<SegmentInfo> {
        Ok(self.attach(name)?.info())
    }

    /// Segments present in the directory, by name.
    pub fn list_segments(&self) -> ApiResult<Vec<SegmentInfo>> {
        let read_err = |err: std::io::Error| {
            Error::new(io_error_kind(&err))
                .with_message("failed to read segment directory")
                .with_path(&self.segment_dir)
                .with_source(err)
        };
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.segment_dir).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(REGION_EXTENSION) {
                continue;
            }
            if let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        names.iter().map(|name| self.info(name)).collect()
    }

    pub fn validate(&self, name: &str) -> ApiResult<ValidationReport> {
        Ok(validate(&self.attach(name)?))
    }

    pub fn unlink(&self, name: &str) -> ApiResult<()> {
        Segment::unlink(&self.segment_dir, name)
    }
}

impl Default for LocalClient {
    fn default() -> Self {
        Self::new()
    }
}
