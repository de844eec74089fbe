use oci_spec::image::ImageConfiguration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Facts about an archived image that end up in the SBOM's source section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub os: String,
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    /// Number of filesystem layers recorded in the config
    pub layer_count: usize,
}

// Conversion function from oci-spec types to our internal types
pub fn from_oci_config(config: &ImageConfiguration) -> ImageMetadata {
    let labels = config
        .config()
        .as_ref()
        .and_then(|c| c.labels().clone())
        .unwrap_or_default();

    ImageMetadata {
        os: config.os().to_string(),
        architecture: config.architecture().to_string(),
        variant: config.variant().clone(),
        created: config.created().clone(),
        labels,
        layer_count: config.rootfs().diff_ids().len(),
    }
}

/// Parses raw config bytes, returning `None` for configs that are not
/// OCI/Docker image configurations (e.g. artifacts).
pub fn from_config_bytes(config: &[u8]) -> Option<ImageMetadata> {
    serde_json::from_slice::<ImageConfiguration>(config)
        .ok()
        .map(|c| from_oci_config(&c))
}
