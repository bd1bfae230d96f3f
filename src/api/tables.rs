//! Purpose: Named-table operations over an open catalog.
//! Exports: `CatalogApiExt`, `SegmentInfo`.
//! Role: One call per user-facing operation; resolves names, then works on zero-copy views.
//! Invariants: Names unknown locally are re-resolved from the persisted catalog once.
//! Invariants: Missing tables are `NotFound`; missing or text columns in `map_numeric_column` are no-ops.
#![allow(clippy::result_large_err)]

use serde::Serialize;
use std::path::PathBuf;

use crate::core::catalog::Catalog;
use crate::core::decode::BlobView;
use crate::core::error::Error;
use crate::core::mutate::{self, MapOutcome, NumericMap};
use crate::core::query::{self, GroupSums};
use crate::core::table::Table;

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SegmentInfo {
    pub name: String,
    pub path: PathBuf,
    pub capacity: u64,
    pub used: u64,
    pub remaining: u64,
    pub frames: u64,
    pub tables: usize,
}

pub trait CatalogApiExt {
    /// Stores `table` under `name`; `false` when the name is already taken.
    fn add_table(&mut self, name: &str, table: &Table) -> Result<bool, Error>;

    /// Parsed zero-copy view of the named blob.
    fn view(&mut self, name: &str) -> Result<BlobView<'_>, Error>;

    /// First `rows` rows of every column.
    fn head(&mut self, name: &str, rows: usize) -> Result<Table, Error>;

    fn group_by_sum(&mut self, name: &str, group_col: &str, sum_col: &str)
    -> Result<GroupSums, Error>;

    /// Rewrites a numeric column of the named blob in place, visible to every attached process.
    fn map_numeric_column<M: NumericMap>(
        &mut self,
        name: &str,
        column: &str,
        f: &mut M,
    ) -> Result<MapOutcome, Error>;

    fn info(&self) -> SegmentInfo;
}

impl CatalogApiExt for Catalog {
    fn add_table(&mut self, name: &str, table: &Table) -> Result<bool, Error> {
        self.add(name, table)
    }

    fn view(&mut self, name: &str) -> Result<BlobView<'_>, Error> {
        self.entry(name)?;
        BlobView::parse(self.get(name)?)
    }

    fn head(&mut self, name: &str, rows: usize) -> Result<Table, Error> {
        let view = self.view(name)?;
        query::head(&view, rows)
    }

    fn group_by_sum(
        &mut self,
        name: &str,
        group_col: &str,
        sum_col: &str,
    ) -> Result<GroupSums, Error> {
        let view = self.view(name)?;
        query::group_by_sum(&view, group_col, sum_col)
    }

    fn map_numeric_column<M: NumericMap>(
        &mut self,
        name: &str,
        column: &str,
        f: &mut M,
    ) -> Result<MapOutcome, Error> {
        self.entry(name)?;
        mutate::map_numeric_column(self.get_mut(name)?, column, f)
    }

    fn info(&self) -> SegmentInfo {
        let segment = self.segment();
        let header = segment.header();
        SegmentInfo {
            name: segment.name().to_string(),
            path: segment.path().to_path_buf(),
            capacity: header.capacity,
            used: header.write_cursor,
            remaining: header.capacity.saturating_sub(header.write_cursor),
            frames: header.frame_count,
            tables: self.entries().len(),
        }
    }
}
