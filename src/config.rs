//! Pipeline configuration.
//!
//! Defaults reproduce the stock run: four Alpine-based images, `./cache`,
//! `./images` and `./sboms`. A TOML file can override any field; unknown
//! keys are rejected.
//!
//! ```toml
//! images = ["nginx:1.24.0-alpine3.17", "httpd:alpine3.17"]
//! platform = "linux/arm64"
//! format = "cyclonedx-json"
//! scope = "image"
//! pull_attempts = 3
//! ```

use crate::sbom::SbomFormat;
use crate::sources::Platform;
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_IMAGES: &[&str] = &[
    "nginx:1.24.0-alpine3.17",
    "node:20-alpine3.17",
    "postgres:alpine3.17",
    "httpd:alpine3.17",
];

/// What each per-tag SBOM covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SbomScope {
    /// Only the tag's own image
    #[default]
    Image,
    /// Every image in the archive directory
    Archive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub images: Vec<String>,
    pub cache_dir: PathBuf,
    pub images_dir: PathBuf,
    pub sboms_dir: PathBuf,
    /// `os/arch[/variant]` picked from multi-platform indexes
    pub platform: String,
    pub format: SbomFormat,
    pub scope: SbomScope,
    pub descriptor_name: String,
    pub pull_attempts: u32,
    /// Initial retry delay, doubled after every failed attempt
    pub retry_backoff_ms: u64,
    pub insecure_registries: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            images: DEFAULT_IMAGES.iter().map(|s| s.to_string()).collect(),
            cache_dir: PathBuf::from("./cache"),
            images_dir: PathBuf::from("./images"),
            sboms_dir: PathBuf::from("./sboms"),
            platform: Platform::default().to_string(),
            format: SbomFormat::default(),
            scope: SbomScope::default(),
            descriptor_name: "layerbom".to_string(),
            pull_attempts: 1,
            retry_backoff_ms: 500,
            insecure_registries: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn platform(&self) -> Result<Platform> {
        self.platform
            .parse()
            .with_context(|| format!("Invalid platform '{}'", self.platform))
    }

    pub fn validate(&self) -> Result<()> {
        if self.images.is_empty() {
            anyhow::bail!("No images configured");
        }
        if self.descriptor_name.trim().is_empty() {
            anyhow::bail!("descriptor_name must not be empty");
        }
        self.platform()?;
        Ok(())
    }
}
