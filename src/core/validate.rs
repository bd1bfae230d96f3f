//! Purpose: Full-scan consistency check of a segment and its catalog.
//! Exports: `validate`, `ValidationReport`, `ValidationStatus`, `ValidationIssue`.
//! Role: Backs `colshm validate`; never mutates the region or the catalog.
//! Invariants: Every issue found is reported; the scan never stops at the first one
//! except when frame boundaries themselves become unreadable.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::core::catalog::Catalog;
use crate::core::decode::BlobView;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Ok,
    Corrupt,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ValidationReport {
    pub segment: String,
    pub path: PathBuf,
    pub status: ValidationStatus,
    pub frames: u64,
    pub used: u64,
    pub capacity: u64,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.status == ValidationStatus::Ok
    }
}

pub fn validate(catalog: &Catalog) -> ValidationReport {
    let segment = catalog.segment();
    let header = segment.header();
    let mut issues = Vec::new();

    // offset -> blob length for every readable frame
    let mut frames = BTreeMap::new();
    for frame in segment.frames() {
        match frame {
            Ok(frame) => {
                if let Err(err) = BlobView::parse(frame.blob) {
                    issues.push(issue("blob_corrupt", err.to_string(), None, Some(frame.offset)));
                }
                frames.insert(frame.offset, frame.blob.len() as u64);
            }
            Err(err) => {
                issues.push(issue("frame_corrupt", err.to_string(), None, err.offset()));
            }
        }
    }
    if frames.len() as u64 != header.frame_count {
        issues.push(issue(
            "frame_count_mismatch",
            format!(
                "header records {} frames, scan found {}",
                header.frame_count,
                frames.len()
            ),
            None,
            None,
        ));
    }

    for entry in catalog.entries() {
        match frames.get(&entry.offset) {
            None => issues.push(issue(
                "entry_dangling",
                "catalog entry does not point at a frame start".to_string(),
                Some(&entry.name),
                Some(entry.offset),
            )),
            Some(len) if *len != entry.len => issues.push(issue(
                "entry_length_mismatch",
                format!("frame holds {len} bytes, catalog expects {}", entry.len),
                Some(&entry.name),
                Some(entry.offset),
            )),
            Some(_) => {}
        }
    }

    ValidationReport {
        segment: segment.name().to_string(),
        path: segment.path().to_path_buf(),
        status: if issues.is_empty() {
            ValidationStatus::Ok
        } else {
            ValidationStatus::Corrupt
        },
        frames: frames.len() as u64,
        used: header.write_cursor,
        capacity: header.capacity,
        issues,
    }
}

fn issue(
    code: &'static str,
    message: String,
    name: Option<&str>,
    offset: Option<u64>,
) -> ValidationIssue {
    ValidationIssue {
        code,
        message,
        name: name.map(str::to_string),
        offset,
    }
}

#[cfg(test)]
mod tests {
    use super::{ValidationStatus, validate};
    use crate::core::catalog::{Catalog, CatalogOptions};
    use crate::core::segment::{Segment, SegmentOptions};
    use crate::core::table::{Column, Table};

    fn open(dir: &std::path::Path) -> Catalog {
        let segment =
            Segment::create_or_attach(dir, "checked", SegmentOptions::new(4096)).expect("segment");
        Catalog::open(segment, CatalogOptions::new()).expect("catalog")
    }

    #[test]
    fn fresh_and_populated_segments_are_ok() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut catalog = open(dir.path());
        assert!(validate(&catalog).is_ok());

        catalog
            .add("a", &Table::new(vec![Column::int64("x", vec![1, 2])]))
            .unwrap();
        catalog
            .add("b", &Table::new(vec![Column::text("s", ["p", "q"])]))
            .unwrap();
        let report = validate(&catalog);
        assert_eq!(report.status, ValidationStatus::Ok, "{:?}", report.issues);
        assert_eq!(report.frames, 2);
        assert_eq!(report.used, catalog.segment().used());
    }

    #[test]
    fn damaged_blob_is_reported_with_its_offset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut catalog = open(dir.path());
        catalog
            .add("a", &Table::new(vec![Column::int64("x", vec![1])]))
            .unwrap();
        catalog.get_mut("a").unwrap()[0] = b'X';

        let report = validate(&catalog);
        assert_eq!(report.status, ValidationStatus::Corrupt);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].code, "blob_corrupt");
        assert_eq!(report.issues[0].offset, Some(0));
    }

    #[test]
    fn dangling_catalog_entry_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut catalog = open(dir.path());
        catalog
            .add("a", &Table::new(vec![Column::int64("x", vec![1])]))
            .unwrap();
        let path = catalog.path().to_path_buf();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replace("\"offset\": 0", "\"offset\": 2")).unwrap();
        catalog.refresh().unwrap();

        let report = validate(&catalog);
        assert_eq!(report.status, ValidationStatus::Corrupt);
        assert_eq!(report.issues[0].code, "entry_dangling");
        assert_eq!(report.issues[0].name.as_deref(), Some("a"));
    }
}
