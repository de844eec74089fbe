//! OCI image-layout archive.
//!
//! [`OciArchiver`] persists acquired images into one shared directory:
//!
//! ```text
//! images/
//! ├── oci-layout          {"imageLayoutVersion": "1.0.0"}
//! ├── index.json          one manifest descriptor per archived reference
//! └── blobs/
//!     └── sha256/
//!         ├── <manifest>
//!         ├── <config>
//!         └── <layer>...
//! ```
//!
//! Blobs are content addressed and written only when absent, so images that
//! share layers store them once and archiving an image twice is a no-op.
//! Index entries carry the reference in `org.opencontainers.image.ref.name`.

use crate::acquirer::ImageHandle;
use crate::cache::write_atomic;
use crate::digest::ContentDigest;
use crate::error::{Error, Result};
use crate::sources::Source;
use log::{debug, trace};
use oci_spec::image::{Descriptor, Digest, ImageIndex, ImageIndexBuilder, MediaType};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const OCI_LAYOUT_FILE: &str = "oci-layout";
pub const INDEX_FILE: &str = "index.json";
pub const BLOBS_DIR: &str = "blobs";
pub const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

const OCI_LAYOUT_CONTENT: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;

pub struct OciArchiver {
    root: PathBuf,
}

impl OciArchiver {
    /// Opens the layout at `root`, creating the directory and `oci-layout`
    /// marker when missing.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let blobs = root.join(BLOBS_DIR);
        fs::create_dir_all(&blobs).map_err(|e| Error::storage(&blobs, e))?;

        let marker = root.join(OCI_LAYOUT_FILE);
        if !marker.exists() {
            write_atomic(&marker, OCI_LAYOUT_CONTENT.as_bytes())?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blob_path(&self, digest: &ContentDigest) -> PathBuf {
        self.root.join(BLOBS_DIR).join(digest.to_relative_path())
    }

    pub fn has_blob(&self, digest: &ContentDigest) -> bool {
        self.blob_path(digest).is_file()
    }

    /// Writes the image's layers, config and manifest, then registers the
    /// manifest in `index.json`.
    pub fn archive<S: Source>(&self, handle: &ImageHandle<'_, S>) -> Result<()> {
        debug!(
            "Archiving {} ({}) into {}",
            handle.reference(),
            handle.manifest_digest(),
            self.root.display()
        );

        for layer in handle.layers() {
            if self.has_blob(&layer.digest) {
                trace!("Blob {} already archived", layer.digest);
                continue;
            }
            let data = handle.layer_bytes(layer)?;
            self.write_blob(&layer.digest, &data)?;
        }
        self.write_blob(handle.config_digest(), handle.config_bytes())?;
        self.write_blob(handle.manifest_digest(), handle.manifest_bytes())?;

        self.register_manifest(
            handle.manifest_media_type(),
            handle.manifest_bytes().len() as u64,
            handle.manifest_digest(),
            &handle.reference().to_string(),
        )
    }

    /// Manifest descriptors currently listed in `index.json`.
    pub fn manifests(&self) -> Result<Vec<Descriptor>> {
        Ok(self.read_index()?.manifests().clone())
    }

    fn write_blob(&self, digest: &ContentDigest, data: &[u8]) -> Result<()> {
        let path = self.blob_path(digest);
        if path.is_file() {
            return Ok(());
        }
        write_atomic(&path, data)
    }

    fn register_manifest(
        &self,
        media_type: MediaType,
        size: u64,
        digest: &ContentDigest,
        ref_name: &str,
    ) -> Result<()> {
        let mut index = self.read_index()?;
        let mut manifests = index.manifests().clone();

        let already_listed = manifests.iter().any(|descriptor| {
            descriptor.digest().to_string() == digest.to_string()
                && ref_name_of(descriptor) == Some(ref_name)
        });
        if already_listed {
            debug!("{} already listed in index as {}", digest, ref_name);
            return Ok(());
        }

        let oci_digest: Digest = digest
            .to_string()
            .parse()
            .map_err(|e| Error::Encoding(format!("invalid manifest digest {}: {}", digest, e)))?;
        let mut descriptor = Descriptor::new(media_type, size, oci_digest);
        descriptor.set_annotations(Some(HashMap::from([(
            REF_NAME_ANNOTATION.to_string(),
            ref_name.to_string(),
        )])));
        manifests.push(descriptor);
        index.set_manifests(manifests);

        let data = serde_json::to_vec_pretty(&index)
            .map_err(|e| Error::Encoding(format!("failed to serialize index: {}", e)))?;
        write_atomic(&self.root.join(INDEX_FILE), &data)
    }

    fn read_index(&self) -> Result<ImageIndex> {
        let path = self.root.join(INDEX_FILE);
        if !path.exists() {
            return ImageIndexBuilder::default()
                .schema_version(2u32)
                .media_type(MediaType::ImageIndex)
                .manifests(Vec::<Descriptor>::new())
                .build()
                .map_err(|e| Error::Encoding(format!("failed to build empty index: {}", e)));
        }
        let data = fs::read(&path).map_err(|e| Error::storage(&path, e))?;
        serde_json::from_slice(&data).map_err(|e| Error::Detection {
            path: path.clone(),
            reason: format!("malformed index.json: {}", e),
        })
    }
}

/// The `org.opencontainers.image.ref.name` annotation of an index entry.
pub fn ref_name_of(descriptor: &Descriptor) -> Option<&str> {
    descriptor
        .annotations()
        .as_ref()
        .and_then(|annotations| annotations.get(REF_NAME_ANNOTATION))
        .map(String::as_str)
}
