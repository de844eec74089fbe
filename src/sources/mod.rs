//! Remote image sources.
//!
//! A [`Source`] resolves an [`ImageReference`] to a single-platform image
//! manifest and serves blobs by descriptor. The acquirer layers the local
//! cache on top of it; sources themselves never touch the disk.

pub mod naming;
pub mod registry;

pub use naming::ImageReference;
pub use registry::RegistrySource;

use crate::error::{Error, Result};
use oci_spec::image::Descriptor;
use std::fmt;
use std::str::FromStr;

/// Retrieves images from wherever they live.
pub trait Source {
    /// Returns the name of the source for log lines
    fn name(&self) -> &str;

    /// Resolves `reference` and returns the raw bytes of its image manifest.
    ///
    /// Multi-platform indexes must be resolved to a single image manifest
    /// before returning; the bytes are archived verbatim, so their sha256 is
    /// the image's manifest digest.
    fn pull_manifest(&self, reference: &ImageReference) -> Result<Vec<u8>>;

    /// Fetches one blob (config or layer) of `reference`.
    fn pull_blob(&self, reference: &ImageReference, descriptor: &Descriptor) -> Result<Vec<u8>>;
}

/// Target platform used to pick a manifest out of an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    pub variant: Option<String>,
}

impl Platform {
    /// Whether an index entry's platform satisfies this one. A missing
    /// variant on either side matches any variant.
    pub fn matches(&self, os: &str, architecture: &str, variant: Option<&str>) -> bool {
        if self.os != os || self.architecture != architecture {
            return false;
        }
        match (&self.variant, variant) {
            (Some(wanted), Some(found)) => wanted == found,
            _ => true,
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self {
            os: "linux".to_string(),
            architecture: "amd64".to_string(),
            variant: None,
        }
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        let invalid = || Error::InvalidReference {
            reference: s.to_string(),
            reason: "platform must be os/arch[/variant]".to_string(),
        };
        match parts.as_slice() {
            [os, arch] if !os.is_empty() && !arch.is_empty() => Ok(Self {
                os: os.to_string(),
                architecture: arch.to_string(),
                variant: None,
            }),
            [os, arch, variant] if !os.is_empty() && !arch.is_empty() && !variant.is_empty() => {
                Ok(Self {
                    os: os.to_string(),
                    architecture: arch.to_string(),
                    variant: Some(variant.to_string()),
                })
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variant {
            Some(variant) => write!(f, "{}/{}/{}", self.os, self.architecture, variant),
            None => write!(f, "{}/{}", self.os, self.architecture),
        }
    }
}
