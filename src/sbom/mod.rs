//! SBOM aggregate and encoders.
//!
//! [`Sbom::assemble`] joins a [`Catalog`] with a tool descriptor and a
//! description of what was scanned; [`encode`] serializes it in one of the
//! supported [`SbomFormat`]s.

mod cyclonedx;
mod json;

use crate::catalog::{Catalog, LinuxRelease, Package, Relationship};
use crate::detect::SourceKind;
use crate::error::{Error, Result};
use crate::metadata::ImageMetadata;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies the tool that produced the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SbomDescriptor {
    pub name: String,
    pub version: String,
}

impl SbomDescriptor {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// What was scanned: the tag's image, or the whole archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescription {
    /// `<repository>:<tag>` or the archive path
    pub name: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifest_digests: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ImageMetadata>,
}

impl SourceDescription {
    pub fn new(name: &str, kind: SourceKind) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            manifest_digests: Vec::new(),
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifacts {
    pub packages: Vec<Package>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linux_distribution: Option<LinuxRelease>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sbom {
    pub descriptor: SbomDescriptor,
    pub source: SourceDescription,
    pub artifacts: Artifacts,
    pub relationships: Vec<Relationship>,
}

impl Sbom {
    pub fn assemble(descriptor: SbomDescriptor, source: SourceDescription, catalog: Catalog) -> Self {
        Self {
            descriptor,
            source,
            artifacts: Artifacts {
                packages: catalog.packages,
                linux_distribution: catalog.distro,
            },
            relationships: catalog.relationships,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SbomFormat {
    /// Native JSON document
    #[default]
    Json,
    /// CycloneDX 1.5 JSON
    CyclonedxJson,
}

impl fmt::Display for SbomFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SbomFormat::Json => write!(f, "json"),
            SbomFormat::CyclonedxJson => write!(f, "cyclonedx-json"),
        }
    }
}

pub fn encode(sbom: &Sbom, format: SbomFormat) -> Result<Vec<u8>> {
    let value = match format {
        SbomFormat::Json => json::to_value(sbom),
        SbomFormat::CyclonedxJson => cyclonedx::to_value(sbom),
    }
    .map_err(|e| Error::Encoding(format!("{} encoding failed: {}", format, e)))?;

    serde_json::to_vec_pretty(&value)
        .map_err(|e| Error::Encoding(format!("{} encoding failed: {}", format, e)))
}
