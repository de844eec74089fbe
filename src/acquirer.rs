//! Image acquisition through the layer cache.
//!
//! [`ImageAcquirer::acquire`] resolves a reference against a [`Source`] and
//! returns an [`ImageHandle`]:
//! - the raw manifest bytes and their sha256 (the manifest digest),
//! - the parsed manifest and raw config,
//! - the ordered layer list, where every [`ImageHandle::layer_bytes`] read goes
//!   through [`LayerCache::get_or_fetch`].
//!
//! Layers are fetched lazily, so an image whose layers are all cached costs one
//! manifest and one config request. Manifest, config and layer pulls share one
//! retry policy.

use crate::cache::LayerCache;
use crate::digest::ContentDigest;
use crate::error::{Error, Result};
use crate::sources::{ImageReference, Source};
use log::{debug, warn};
use oci_spec::image::{Descriptor, ImageManifest, MediaType};
use std::thread;
use std::time::Duration;

/// One layer of an acquired image.
#[derive(Debug, Clone)]
pub struct LayerRef {
    pub descriptor: Descriptor,
    pub digest: ContentDigest,
}

/// An acquired image. Borrows the source and cache it was acquired with.
pub struct ImageHandle<'a, S: Source> {
    reference: ImageReference,
    manifest_bytes: Vec<u8>,
    manifest: ImageManifest,
    manifest_digest: ContentDigest,
    config_bytes: Vec<u8>,
    config_digest: ContentDigest,
    layers: Vec<LayerRef>,
    source: &'a S,
    cache: &'a LayerCache,
    retry: RetryPolicy,
}

impl<S: Source> ImageHandle<'_, S> {
    pub fn reference(&self) -> &ImageReference {
        &self.reference
    }

    pub fn manifest(&self) -> &ImageManifest {
        &self.manifest
    }

    pub fn manifest_bytes(&self) -> &[u8] {
        &self.manifest_bytes
    }

    pub fn manifest_digest(&self) -> &ContentDigest {
        &self.manifest_digest
    }

    /// Media type declared by the manifest, defaulting to the OCI manifest type.
    pub fn manifest_media_type(&self) -> MediaType {
        self.manifest
            .media_type()
            .clone()
            .unwrap_or(MediaType::ImageManifest)
    }

    pub fn config_bytes(&self) -> &[u8] {
        &self.config_bytes
    }

    pub fn config_digest(&self) -> &ContentDigest {
        &self.config_digest
    }

    /// Layers in application order (base first).
    pub fn layers(&self) -> &[LayerRef] {
        &self.layers
    }

    pub fn layer_digests(&self) -> impl Iterator<Item = &ContentDigest> {
        self.layers.iter().map(|layer| &layer.digest)
    }

    /// Reads a layer blob, from the cache when present.
    pub fn layer_bytes(&self, layer: &LayerRef) -> Result<Vec<u8>> {
        self.cache.get_or_fetch(&self.reference, &layer.digest, || {
            self.retry.run(&self.reference, "layer", || {
                self.source.pull_blob(&self.reference, &layer.descriptor)
            })
        })
    }
}

/// Attempt count and initial delay for registry pulls.
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    /// Runs `pull` until it succeeds, fails with a non-resolution error, or
    /// the attempts are used up. The delay doubles after every failure.
    fn run<T, F>(&self, reference: &ImageReference, what: &str, mut pull: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut delay = self.backoff;
        let mut attempt = 1;
        loop {
            match pull() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_resolution() && attempt < self.attempts => {
                    warn!(
                        "Pull of {} for {} failed (attempt {}/{}): {}; retrying in {:?}",
                        what, reference, attempt, self.attempts, err, delay
                    );
                    thread::sleep(delay);
                    delay *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

pub struct ImageAcquirer<S: Source> {
    source: S,
    cache: LayerCache,
    retry: RetryPolicy,
}

impl<S: Source> ImageAcquirer<S> {
    pub fn new(source: S, cache: LayerCache) -> Self {
        Self {
            source,
            cache,
            retry: RetryPolicy {
                attempts: 1,
                backoff: Duration::from_millis(500),
            },
        }
    }

    /// Retries failed manifest and blob pulls, doubling `backoff` between
    /// attempts. One attempt means no retry.
    pub fn with_retry(mut self, pull_attempts: u32, backoff: Duration) -> Self {
        self.retry = RetryPolicy {
            attempts: pull_attempts.max(1),
            backoff,
        };
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn cache(&self) -> &LayerCache {
        &self.cache
    }

    pub fn acquire(&self, reference: &ImageReference) -> Result<ImageHandle<'_, S>> {
        debug!("Acquiring {} from {} source", reference, self.source.name());

        let manifest_bytes = self
            .retry
            .run(reference, "manifest", || self.source.pull_manifest(reference))?;
        let manifest_digest = ContentDigest::sha256(&manifest_bytes);
        let manifest: ImageManifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| Error::resolution(reference, format!("malformed image manifest: {}", e)))?;

        let config_digest = parse_digest(reference, manifest.config())?;
        let config_bytes = self
            .retry
            .run(reference, "config", || self.source.pull_blob(reference, manifest.config()))?;
        if !config_digest.matches(&config_bytes) {
            return Err(Error::resolution(
                reference,
                format!("config blob does not match {}", config_digest),
            ));
        }

        let layers = manifest
            .layers()
            .iter()
            .map(|descriptor| {
                Ok(LayerRef {
                    digest: parse_digest(reference, descriptor)?,
                    descriptor: descriptor.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "Resolved {} to manifest {} with {} layers",
            reference,
            manifest_digest,
            layers.len()
        );

        Ok(ImageHandle {
            reference: reference.clone(),
            manifest_bytes,
            manifest,
            manifest_digest,
            config_bytes,
            config_digest,
            layers,
            source: &self.source,
            cache: &self.cache,
            retry: self.retry,
        })
    }
}

fn parse_digest(reference: &ImageReference, descriptor: &Descriptor) -> Result<ContentDigest> {
    descriptor
        .digest()
        .to_string()
        .parse()
        .map_err(|e| Error::resolution(reference, e))
}
