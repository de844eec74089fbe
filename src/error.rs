//! Error taxonomy for the acquisition and SBOM pipeline.
//!
//! Every stage returns [`Result`]; the orchestrator decides whether a failure
//! aborts the run (acquisition, archiving) or only the current tag (SBOM phase).

use std::path::PathBuf;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed image reference, rejected before any network call.
    #[error("invalid image reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    /// The reference could not be resolved or pulled.
    #[error("failed to resolve '{reference}': {reason}")]
    Resolution { reference: String, reason: String },

    /// Cache or archive medium could not be read or written.
    #[error("storage failure at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Archive directory content was not recognized.
    #[error("cannot detect image source at {path}: {reason}")]
    Detection { path: PathBuf, reason: String },

    /// Package extraction failed.
    #[error("cataloging failed: {0}")]
    Catalog(String),

    /// SBOM serialization failed.
    #[error("failed to encode SBOM: {0}")]
    Encoding(String),
}

impl Error {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Storage {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn resolution(reference: impl ToString, reason: impl ToString) -> Self {
        Error::Resolution {
            reference: reference.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for failures that happen before or during network resolution.
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            Error::Resolution { .. } | Error::InvalidReference { .. }
        )
    }
}
