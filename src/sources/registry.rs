use log::debug;
use oci_client::client::{ClientConfig, ClientProtocol};
use oci_client::manifest::OciDescriptor;
use oci_client::secrets::RegistryAuth;
use oci_client::{Client, Reference};
use oci_spec::image::{Descriptor, ImageIndex};
use tokio::runtime::Runtime;

use super::{ImageReference, Platform, Source};
use crate::error::{Error, Result};

const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";

const ACCEPTED_MEDIA_TYPES: &[&str] = &[OCI_MANIFEST, OCI_INDEX, DOCKER_MANIFEST, DOCKER_MANIFEST_LIST];

/// OCI Registry implementation of the Source trait
/// Pulls images anonymously from OCI-compliant registries
pub struct RegistrySource {
    client: Client,
    runtime: Runtime,
    platform: Platform,
}

impl RegistrySource {
    /// `insecure_registries` are contacted over plain HTTP.
    pub fn new(platform: Platform, insecure_registries: Vec<String>) -> Result<Self> {
        let protocol = if insecure_registries.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(insecure_registries)
        };
        let client = Client::new(ClientConfig {
            protocol,
            ..Default::default()
        });

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::resolution("<registry>", format!("failed to start runtime: {}", e)))?;

        Ok(Self {
            client,
            runtime,
            platform,
        })
    }

    fn client_reference(reference: &ImageReference) -> Result<Reference> {
        reference
            .to_string()
            .parse::<Reference>()
            .map_err(|e| Error::resolution(reference, e))
    }

    async fn pull_manifest_async(&self, reference: &ImageReference) -> Result<Vec<u8>> {
        let image_ref = Self::client_reference(reference)?;
        let (bytes, digest) = self
            .client
            .pull_manifest_raw(&image_ref, &RegistryAuth::Anonymous, ACCEPTED_MEDIA_TYPES)
            .await
            .map_err(|e| Error::resolution(reference, e))?;
        let bytes = bytes.to_vec();
        debug!("Pulled manifest {} for {}", digest, reference);

        if !is_index(&bytes) {
            return Ok(bytes);
        }

        let index: ImageIndex = serde_json::from_slice(&bytes)
            .map_err(|e| Error::resolution(reference, format!("malformed image index: {}", e)))?;
        let selected = select_platform(&index, &self.platform).ok_or_else(|| {
            Error::resolution(
                reference,
                format!("no manifest for platform {} in index", self.platform),
            )
        })?;
        debug!(
            "Resolved {} for platform {} to {}",
            reference,
            self.platform,
            selected.digest()
        );

        let pinned = Reference::with_digest(
            image_ref.registry().to_string(),
            image_ref.repository().to_string(),
            selected.digest().to_string(),
        );
        let (bytes, _) = self
            .client
            .pull_manifest_raw(&pinned, &RegistryAuth::Anonymous, ACCEPTED_MEDIA_TYPES)
            .await
            .map_err(|e| Error::resolution(reference, e))?;
        Ok(bytes.to_vec())
    }

    async fn pull_blob_async(
        &self,
        reference: &ImageReference,
        descriptor: &Descriptor,
    ) -> Result<Vec<u8>> {
        let image_ref = Self::client_reference(reference)?;
        let layer = OciDescriptor {
            media_type: descriptor.media_type().to_string(),
            digest: descriptor.digest().to_string(),
            size: descriptor.size() as i64,
            ..Default::default()
        };

        let mut data = Vec::new();
        self.client
            .pull_blob(&image_ref, &layer, &mut data)
            .await
            .map_err(|e| {
                Error::resolution(
                    reference,
                    format!("failed to pull blob {}: {}", descriptor.digest(), e),
                )
            })?;
        Ok(data)
    }
}

impl Source for RegistrySource {
    fn name(&self) -> &str {
        "registry"
    }

    fn pull_manifest(&self, reference: &ImageReference) -> Result<Vec<u8>> {
        self.runtime.block_on(self.pull_manifest_async(reference))
    }

    fn pull_blob(&self, reference: &ImageReference, descriptor: &Descriptor) -> Result<Vec<u8>> {
        self.runtime
            .block_on(self.pull_blob_async(reference, descriptor))
    }
}

fn is_index(manifest: &[u8]) -> bool {
    serde_json::from_slice::<serde_json::Value>(manifest)
        .map(|value| value.get("manifests").is_some_and(|m| m.is_array()))
        .unwrap_or(false)
}

fn select_platform<'a>(index: &'a ImageIndex, platform: &Platform) -> Option<&'a Descriptor> {
    index.manifests().iter().find(|descriptor| {
        descriptor.platform().as_ref().is_some_and(|p| {
            platform.matches(
                &p.os().to_string(),
                &p.architecture().to_string(),
                p.variant().as_deref(),
            )
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.index.v1+json",
        "manifests": [
            {
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": "sha256:1111111111111111111111111111111111111111111111111111111111111111",
                "size": 100,
                "platform": {"os": "linux", "architecture": "arm64", "variant": "v8"}
            },
            {
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": "sha256:2222222222222222222222222222222222222222222222222222222222222222",
                "size": 100,
                "platform": {"os": "linux", "architecture": "amd64"}
            }
        ]
    }"#;

    #[test]
    fn test_index_detection() {
        assert!(is_index(INDEX.as_bytes()));
        assert!(!is_index(br#"{"schemaVersion": 2, "layers": []}"#));
        assert!(!is_index(b"not json"));
    }

    #[test]
    fn test_select_platform() {
        let index: ImageIndex = serde_json::from_str(INDEX).unwrap();

        let amd64 = select_platform(&index, &Platform::default()).unwrap();
        assert!(amd64.digest().to_string().ends_with("2222"));

        let arm64 = select_platform(&index, &"linux/arm64".parse().unwrap()).unwrap();
        assert!(arm64.digest().to_string().ends_with("1111"));

        assert!(select_platform(&index, &"windows/amd64".parse().unwrap()).is_none());
    }
}
