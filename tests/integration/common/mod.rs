//! Common utilities for integration tests

use flate2::write::GzEncoder;
use flate2::Compression;
use layerbom::digest::ContentDigest;
use layerbom::error::{Error, Result};
use layerbom::sources::{ImageReference, Source};
use layerbom::{PipelineConfig, SbomFormat, SbomScope};
use oci_spec::image::Descriptor;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tar_rs as tar;

pub const ALPINE_OS_RELEASE: &str = "NAME=\"Alpine Linux\"\nID=alpine\nVERSION_ID=3.17.3\nPRETTY_NAME=\"Alpine Linux v3.17\"\nHOME_URL=\"https://alpinelinux.org/\"\n";

/// Builds a gzip-compressed layer tarball from `(path, content)` pairs.
pub fn layer_tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Renders an apk installed database for `(name, version)` pairs.
pub fn apk_db(packages: &[(&str, &str)]) -> Vec<u8> {
    packages
        .iter()
        .map(|(name, version)| format!("P:{name}\nV:{version}\nA:x86_64\nL:MIT\no:{name}\n\n"))
        .collect::<String>()
        .into_bytes()
}

/// Base layer every mock image shares: os-release plus musl and busybox.
pub fn alpine_base_layer() -> Vec<u8> {
    let db = apk_db(&[("musl", "1.2.3-r4"), ("busybox", "1.35.0-r29")]);
    layer_tar_gz(&[
        ("etc/os-release", ALPINE_OS_RELEASE.as_bytes()),
        ("lib/apk/db/installed", &db),
    ])
}

/// Layer that rewrites the apk database with one more package.
pub fn app_layer(package: &str, version: &str) -> Vec<u8> {
    let db = apk_db(&[
        ("musl", "1.2.3-r4"),
        ("busybox", "1.35.0-r29"),
        (package, version),
    ]);
    layer_tar_gz(&[("lib/apk/db/installed", &db)])
}

/// In-memory registry serving OCI image manifests and blobs.
#[derive(Default)]
pub struct MockRegistry {
    manifests: HashMap<String, Vec<u8>>,
    blobs: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
    pub manifest_pulls: Cell<usize>,
    pub blob_pulls: RefCell<Vec<String>>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `reference` with the given layers, base first.
    pub fn with_image(mut self, reference: &str, layers: Vec<Vec<u8>>) -> Self {
        let config = serde_json::json!({
            "architecture": "amd64",
            "os": "linux",
            "created": "2023-04-01T00:00:00Z",
            "config": { "Labels": { "image": reference } },
            "rootfs": { "type": "layers", "diff_ids": [] }
        });
        let config = serde_json::to_vec(&config).unwrap();
        let config_digest = ContentDigest::sha256(&config);

        let layer_descriptors: Vec<serde_json::Value> = layers
            .iter()
            .map(|layer| {
                serde_json::json!({
                    "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                    "digest": ContentDigest::sha256(layer).to_string(),
                    "size": layer.len()
                })
            })
            .collect();
        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": {
                "mediaType": "application/vnd.oci.image.config.v1+json",
                "digest": config_digest.to_string(),
                "size": config.len()
            },
            "layers": layer_descriptors
        });

        self.blobs.insert(config_digest.to_string(), config);
        for layer in layers {
            self.blobs.insert(ContentDigest::sha256(&layer).to_string(), layer);
        }
        self.manifests
            .insert(reference.to_string(), serde_json::to_vec(&manifest).unwrap());
        self
    }

    /// Makes manifest pulls of `reference` fail.
    pub fn failing(mut self, reference: &str) -> Self {
        self.failing.insert(reference.to_string());
        self
    }

    pub fn manifest_digest(&self, reference: &str) -> ContentDigest {
        ContentDigest::sha256(&self.manifests[reference])
    }
}

impl Source for MockRegistry {
    fn name(&self) -> &str {
        "mock"
    }

    fn pull_manifest(&self, reference: &ImageReference) -> Result<Vec<u8>> {
        self.manifest_pulls.set(self.manifest_pulls.get() + 1);
        let key = reference.to_string();
        if self.failing.contains(&key) {
            return Err(Error::Resolution {
                reference: key,
                reason: "manifest unknown".to_string(),
            });
        }
        self.manifests
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::Resolution {
                reference: key,
                reason: "not found".to_string(),
            })
    }

    fn pull_blob(&self, reference: &ImageReference, descriptor: &Descriptor) -> Result<Vec<u8>> {
        let digest = descriptor.digest().to_string();
        self.blob_pulls.borrow_mut().push(digest.clone());
        self.blobs.get(&digest).cloned().ok_or_else(|| Error::Resolution {
            reference: reference.to_string(),
            reason: format!("blob {digest} unknown"),
        })
    }
}

/// Pipeline configuration rooted in a scratch directory.
pub fn pipeline_config(root: &Path) -> PipelineConfig {
    PipelineConfig {
        images: Vec::new(),
        cache_dir: root.join("cache"),
        images_dir: root.join("images"),
        sboms_dir: root.join("sboms"),
        format: SbomFormat::Json,
        scope: SbomScope::Image,
        ..PipelineConfig::default()
    }
}

/// Registry with `a:1` and `b:1` sharing the Alpine base layer.
pub fn two_images_sharing_base() -> MockRegistry {
    MockRegistry::new()
        .with_image("a:1", vec![alpine_base_layer(), app_layer("nginx", "1.24.0-r1")])
        .with_image("b:1", vec![alpine_base_layer(), app_layer("httpd", "2.4.57-r0")])
}
