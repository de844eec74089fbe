//! Acquisition, cache and archive behaviour of a full run.

use crate::integration::common::{
    alpine_base_layer, app_layer, pipeline_config, two_images_sharing_base, MockRegistry,
};
use anyhow::Result;
use layerbom::archive::{ref_name_of, OciArchiver};
use layerbom::error::Error;
use layerbom::{ContentDigest, Notifier, Pipeline};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Sorted `(path, size)` of every blob in an image layout.
fn blob_listing(layout: &Path) -> Result<Vec<(PathBuf, u64)>> {
    let mut blobs = Vec::new();
    for algorithm in fs::read_dir(layout.join("blobs"))? {
        for blob in fs::read_dir(algorithm?.path())? {
            let blob = blob?;
            blobs.push((blob.path(), blob.metadata()?.len()));
        }
    }
    blobs.sort();
    Ok(blobs)
}

#[test]
fn test_shared_layer_is_cached_once_and_reported() -> Result<()> {
    let work = TempDir::new()?;
    let config = pipeline_config(work.path());
    let base_digest = ContentDigest::sha256(&alpine_base_layer());

    let mut pipeline = Pipeline::new(two_images_sharing_base(), &config, Notifier::new(1))?;
    let report = pipeline.run(&["a:1", "b:1"])?;

    // base + two app layers; configs and manifests are not cached
    assert_eq!(pipeline.cache().len()?, 3);
    assert!(pipeline.cache().contains(&base_digest));

    assert_eq!(report.repeated_layers.len(), 1);
    assert_eq!(report.repeated_layers[0].digest, base_digest);
    assert_eq!(report.repeated_layers[0].count, 2);

    // the shared layer is fetched from the registry once
    let base_pulls = pipeline
        .source()
        .blob_pulls
        .borrow()
        .iter()
        .filter(|digest| **digest == base_digest.to_string())
        .count();
    assert_eq!(base_pulls, 1);

    let manifests = pipeline.archiver().manifests()?;
    assert_eq!(manifests.len(), 2);
    let mut ref_names: Vec<&str> = manifests.iter().filter_map(ref_name_of).collect();
    ref_names.sort();
    assert_eq!(ref_names, vec!["a:1", "b:1"]);

    assert!(report.is_success());
    assert!(work.path().join("sboms/a-1.json").is_file());
    assert!(work.path().join("sboms/b-1.json").is_file());
    Ok(())
}

#[test]
fn test_archive_layout_is_complete() -> Result<()> {
    let work = TempDir::new()?;
    let config = pipeline_config(work.path());
    let registry = two_images_sharing_base();
    let digest_a = registry.manifest_digest("a:1");

    let mut pipeline = Pipeline::new(registry, &config, Notifier::new(1))?;
    pipeline.acquire_all(&["a:1", "b:1"])?;

    let images_dir = work.path().join("images");
    let layout: serde_json::Value =
        serde_json::from_slice(&fs::read(images_dir.join("oci-layout"))?)?;
    assert_eq!(layout["imageLayoutVersion"], "1.0.0");

    let archiver = OciArchiver::open(&images_dir)?;
    assert!(archiver.has_blob(&digest_a));
    assert!(archiver.has_blob(&ContentDigest::sha256(&alpine_base_layer())));
    assert!(archiver.has_blob(&ContentDigest::sha256(&app_layer("nginx", "1.24.0-r1"))));

    let archived = &pipeline.images()["a-1"];
    assert_eq!(archived.manifest_digest, digest_a);
    assert_eq!(archived.layer_count, 2);
    assert_eq!(archived.reference.to_string(), "a:1");
    Ok(())
}

#[test]
fn test_rerun_is_idempotent() -> Result<()> {
    let work = TempDir::new()?;
    let config = pipeline_config(work.path());

    let mut first = Pipeline::new(two_images_sharing_base(), &config, Notifier::new(1))?;
    first.run(&["a:1", "b:1"])?;
    let index_before = fs::read(work.path().join("images/index.json"))?;
    let blobs_before = blob_listing(&work.path().join("images"))?;
    // 2 manifests, 2 configs, 3 layers
    assert_eq!(blobs_before.len(), 7);

    let mut second = Pipeline::new(two_images_sharing_base(), &config, Notifier::new(1))?;
    let report = second.run(&["a:1", "b:1"])?;

    // every layer comes from the warm cache; only configs are pulled
    assert_eq!(second.source().blob_pulls.borrow().len(), 2);
    assert_eq!(second.cache().len()?, 3);
    assert_eq!(second.archiver().manifests()?.len(), 2);
    assert_eq!(fs::read(work.path().join("images/index.json"))?, index_before);
    assert_eq!(blob_listing(&work.path().join("images"))?, blobs_before);
    assert!(report.is_success());
    Ok(())
}

#[test]
fn test_failed_pull_aborts_before_any_sbom() -> Result<()> {
    let work = TempDir::new()?;
    let config = pipeline_config(work.path());
    let registry = two_images_sharing_base().failing("b:1");

    let mut pipeline = Pipeline::new(registry, &config, Notifier::new(1))?;
    let err = pipeline.run(&["a:1", "b:1"]).unwrap_err();

    assert!(err.is_resolution());
    assert!(err.to_string().contains("b:1"));
    // a:1 was already archived when b:1 failed
    assert_eq!(pipeline.archiver().manifests()?.len(), 1);
    assert!(!work.path().join("sboms").exists());
    Ok(())
}

#[test]
fn test_malformed_reference_rejected_before_any_pull() -> Result<()> {
    let work = TempDir::new()?;
    let config = pipeline_config(work.path());

    let mut pipeline = Pipeline::new(two_images_sharing_base(), &config, Notifier::new(1))?;
    let err = pipeline.run(&["a:1", "no-tag-here"]).unwrap_err();

    assert!(matches!(err, Error::InvalidReference { .. }));
    assert_eq!(pipeline.source().manifest_pulls.get(), 0);
    assert!(pipeline.images().is_empty());
    Ok(())
}

#[test]
fn test_transient_failures_are_retried() -> Result<()> {
    let work = TempDir::new()?;
    let mut config = pipeline_config(work.path());
    config.pull_attempts = 3;
    config.retry_backoff_ms = 1;

    let registry = MockRegistry::new().failing("gone:1");
    let mut pipeline = Pipeline::new(registry, &config, Notifier::new(1))?;
    assert!(pipeline.run(&["gone:1"]).is_err());
    assert_eq!(pipeline.source().manifest_pulls.get(), 3);
    Ok(())
}

#[test]
fn test_distinct_tags_keep_plain_keys() -> Result<()> {
    let work = TempDir::new()?;
    let config = pipeline_config(work.path());
    let registry = MockRegistry::new()
        .with_image("nginx:1.24.0-alpine3.17", vec![alpine_base_layer()])
        .with_image("httpd:alpine3.17-2", vec![alpine_base_layer()]);

    let mut pipeline = Pipeline::new(registry, &config, Notifier::new(1))?;
    pipeline.run(&["nginx:1.24.0-alpine3.17", "httpd:alpine3.17-2"])?;

    assert!(work.path().join("sboms/1.24.0-alpine3.17.json").is_file());
    assert!(work.path().join("sboms/alpine3.17-2.json").is_file());
    Ok(())
}

#[test]
fn test_clashing_keys_still_give_every_image_an_sbom() -> Result<()> {
    let work = TempDir::new()?;
    let config = pipeline_config(work.path());
    let registry = two_images_sharing_base()
        .with_image("x:a-1", vec![alpine_base_layer(), app_layer("redis", "7.0.11-r0")]);

    let mut pipeline = Pipeline::new(registry, &config, Notifier::new(1))?;
    let report = pipeline.run(&["x:a-1", "a:1", "b:1"])?;

    assert_eq!(pipeline.images().len(), 3);
    assert_eq!(report.written().count(), 3);
    assert!(report.is_success());
    assert_eq!(pipeline.images()["a-1"].reference.to_string(), "x:a-1");
    assert_eq!(pipeline.images()["a-1-2"].reference.to_string(), "a:1");
    for key in ["a-1", "a-1-2", "b-1"] {
        assert!(work.path().join(format!("sboms/{key}.json")).is_file());
    }
    Ok(())
}

#[test]
fn test_sanitized_repositories_do_not_share_a_key() -> Result<()> {
    let work = TempDir::new()?;
    let config = pipeline_config(work.path());
    let registry = MockRegistry::new()
        .with_image("a/b:1", vec![alpine_base_layer()])
        .with_image("a-b:1", vec![alpine_base_layer()]);

    let mut pipeline = Pipeline::new(registry, &config, Notifier::new(1))?;
    let report = pipeline.run(&["a/b:1", "a-b:1"])?;

    assert_eq!(report.written().count(), 2);
    assert!(work.path().join("sboms/a-b-1.json").is_file());
    assert!(work.path().join("sboms/a-b-1-2.json").is_file());
    Ok(())
}
