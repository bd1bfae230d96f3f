//! Purpose: Define the stable public Rust API boundary for colshm.
//! Exports: Core types and operations needed by the CLI and library users.
//! Role: Public, additive-only surface over the storage modules.
//! Invariants: Everything the CLI does is reachable through this module.

mod client;
mod tables;

pub use crate::core::catalog::{Catalog, CatalogEntry, CatalogOptions, Durability};
pub use crate::core::decode::{BlobView, ColumnLayout};
pub use crate::core::encode::encode;
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::mutate::{Affine, Identity, MapOutcome, Negate, NumericMap};
pub use crate::core::query::GroupSums;
pub use crate::core::segment::{DEFAULT_CAPACITY, Segment, SegmentOptions};
pub use crate::core::table::{Column, ColumnData, Dtype, Table};
pub use crate::core::validate::{ValidationIssue, ValidationReport, ValidationStatus};
pub use client::{ApiResult, LocalClient};
pub use tables::{CatalogApiExt, SegmentInfo};
