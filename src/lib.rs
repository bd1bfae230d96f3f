//! Purpose: Columnar table blobs stored in a named cross-process shared segment.
//! Exports: `api` (stable facade) and `core` (codec, segment, catalog, errors).
//! Role: Library backing the `colshm` CLI and its integration tests.
//! Invariants: Reads are zero-copy views over the mapped segment.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
pub mod segment_paths;
