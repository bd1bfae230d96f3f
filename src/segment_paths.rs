//! Purpose: Resolve the directory and file names backing a named segment.
//! Exports: `default_segment_dir`, `validate_segment_name`, `region_path`, `catalog_path`.
//! Role: Keep CLI and library naming semantics aligned from one source.
//! Invariants: Default directory is `$COLSHM_DIR`, else `/dev/shm`, else the OS temp dir.
//! Invariants: Segment names are a single path component.

use std::path::{Path, PathBuf};

use crate::core::error::{Error, ErrorKind};

pub const DIR_ENV: &str = "COLSHM_DIR";
pub const REGION_EXTENSION: &str = "colshm";
pub const CATALOG_SUFFIX: &str = "catalog.json";

pub fn default_segment_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DIR_ENV).filter(|dir| !dir.is_empty()) {
        return PathBuf::from(dir);
    }
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        return shm.to_path_buf();
    }
    std::env::temp_dir()
}

pub fn validate_segment_name(name: &str) -> Result<(), Error> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("invalid segment name {name:?}"))
            .with_hint("Segment names must be a single non-empty path component."));
    }
    Ok(())
}

pub fn region_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{REGION_EXTENSION}"))
}

pub fn catalog_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{CATALOG_SUFFIX}"))
}
