//! Classifies an archive path before cataloging.
//!
//! Two kinds are recognized:
//! - [`SourceKind::OciDirectory`]: a directory holding `oci-layout` and `index.json`.
//! - [`SourceKind::OciArchive`]: a (possibly gzipped) tar of such a directory.
//!
//! Anything else is a [`Error::Detection`].

use crate::archive::{INDEX_FILE, OCI_LAYOUT_FILE};
use crate::error::{Error, Result};
use crate::tar_extractor::{normalize_tar_path, open_archive};
use std::fmt;
use std::fs::File;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    OciDirectory,
    OciArchive,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::OciDirectory => write!(f, "oci-dir"),
            SourceKind::OciArchive => write!(f, "oci-archive"),
        }
    }
}

pub fn detect_source(path: &Path) -> Result<SourceKind> {
    let unrecognized = |reason: &str| Error::Detection {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if path.is_dir() {
        if path.join(OCI_LAYOUT_FILE).is_file() && path.join(INDEX_FILE).is_file() {
            return Ok(SourceKind::OciDirectory);
        }
        return Err(unrecognized(
            "directory is not an OCI image layout (missing oci-layout or index.json)",
        ));
    }

    if path.is_file() {
        let file = File::open(path).map_err(|e| Error::storage(path, e))?;
        let mut archive = open_archive(file).map_err(|e| unrecognized(&e.to_string()))?;
        let entries = archive
            .entries()
            .map_err(|e| unrecognized(&format!("not a tar archive: {}", e)))?;

        let (mut has_layout, mut has_index) = (false, false);
        for entry in entries {
            let entry = entry.map_err(|e| unrecognized(&format!("not a tar archive: {}", e)))?;
            let entry_path = entry
                .path()
                .map_err(|e| unrecognized(&e.to_string()))?;
            let normalized = normalize_tar_path(&entry_path);
            has_layout |= normalized == Path::new(OCI_LAYOUT_FILE);
            has_index |= normalized == Path::new(INDEX_FILE);
            if has_layout && has_index {
                return Ok(SourceKind::OciArchive);
            }
        }
        return Err(unrecognized("tar archive does not contain an OCI image layout"));
    }

    Err(unrecognized("path does not exist"))
}
