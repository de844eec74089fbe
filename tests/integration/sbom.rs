//! SBOM phase: per-tag scoping, formats and failure isolation.

use crate::integration::common::{pipeline_config, two_images_sharing_base};
use anyhow::Result;
use layerbom::catalog::{BoundSource, Catalog, Cataloger, DefaultCataloger, SourceScope};
use layerbom::detect::{detect_source, SourceKind};
use layerbom::error::Error;
use layerbom::{ContentDigest, Notifier, Pipeline, SbomFormat, SbomScope};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn read_json(path: &Path) -> Result<Value> {
    Ok(serde_json::from_slice(&fs::read(path)?)?)
}

fn package_names(document: &Value) -> Vec<String> {
    let mut names: Vec<String> = document["artifacts"]["packages"]
        .as_array()
        .map(|packages| {
            packages
                .iter()
                .filter_map(|p| p["name"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[test]
fn test_each_tag_gets_its_own_packages() -> Result<()> {
    let work = TempDir::new()?;
    let config = pipeline_config(work.path());
    let registry = two_images_sharing_base();
    let digest_a = registry.manifest_digest("a:1");

    let mut pipeline = Pipeline::new(registry, &config, Notifier::new(1))?;
    pipeline.run(&["a:1", "b:1"])?;

    let a = read_json(&work.path().join("sboms/a-1.json"))?;
    assert_eq!(package_names(&a), vec!["busybox", "musl", "nginx"]);
    assert_eq!(a["source"]["name"], "a:1");
    assert_eq!(a["source"]["kind"], "oci-dir");
    assert_eq!(a["source"]["manifestDigests"][0], digest_a.to_string());
    assert_eq!(a["source"]["metadata"]["architecture"], "amd64");
    assert_eq!(a["artifacts"]["linuxDistribution"]["id"], "alpine");
    assert_eq!(a["descriptor"]["name"], "layerbom");

    let musl = a["artifacts"]["packages"]
        .as_array()
        .and_then(|packages| packages.iter().find(|p| p["name"] == "musl"))
        .cloned()
        .unwrap();
    assert_eq!(musl["type"], "apk");
    assert!(musl["purl"]
        .as_str()
        .unwrap()
        .starts_with("pkg:apk/alpine/musl@1.2.3-r4"));
    assert_eq!(musl["locations"][0]["path"], "/lib/apk/db/installed");

    let b = read_json(&work.path().join("sboms/b-1.json"))?;
    assert_eq!(package_names(&b), vec!["busybox", "httpd", "musl"]);
    Ok(())
}

#[test]
fn test_archive_scope_covers_every_image() -> Result<()> {
    let work = TempDir::new()?;
    let mut config = pipeline_config(work.path());
    config.scope = SbomScope::Archive;

    let mut pipeline = Pipeline::new(two_images_sharing_base(), &config, Notifier::new(1))?;
    pipeline.run(&["a:1", "b:1"])?;

    for key in ["a-1", "b-1"] {
        let document = read_json(&work.path().join(format!("sboms/{key}.json")))?;
        assert_eq!(
            package_names(&document),
            vec!["busybox", "httpd", "musl", "nginx"]
        );
        assert_eq!(
            document["source"]["manifestDigests"]
                .as_array()
                .map(Vec::len),
            Some(2)
        );
    }
    Ok(())
}

#[test]
fn test_cyclonedx_output() -> Result<()> {
    let work = TempDir::new()?;
    let mut config = pipeline_config(work.path());
    config.format = SbomFormat::CyclonedxJson;

    let mut pipeline = Pipeline::new(two_images_sharing_base(), &config, Notifier::new(1))?;
    pipeline.run(&["a:1", "b:1"])?;

    let document = read_json(&work.path().join("sboms/a-1.json"))?;
    assert_eq!(document["bomFormat"], "CycloneDX");
    assert_eq!(document["metadata"]["component"]["name"], "a:1");
    assert_eq!(document["components"].as_array().map(Vec::len), Some(3));
    Ok(())
}

/// Fails for one manifest digest, delegates otherwise.
struct FailingFor(ContentDigest);

impl Cataloger for FailingFor {
    fn catalog(&self, source: &BoundSource) -> layerbom::Result<Catalog> {
        if source.images().iter().any(|image| image.manifest_digest == self.0) {
            return Err(Error::Catalog("corrupt package database".to_string()));
        }
        DefaultCataloger::new().catalog(source)
    }
}

#[test]
fn test_sbom_failure_is_isolated_to_its_tag() -> Result<()> {
    let work = TempDir::new()?;
    let config = pipeline_config(work.path());
    let registry = two_images_sharing_base();
    let digest_a = registry.manifest_digest("a:1");

    let mut pipeline =
        Pipeline::new(registry, &config, Notifier::new(1))?.with_cataloger(FailingFor(digest_a));
    let report = pipeline.run(&["a:1", "b:1"])?;

    assert!(!report.is_success());
    let failed: Vec<&str> = report.failures().map(|(key, _)| key).collect();
    assert_eq!(failed, vec!["a-1"]);
    assert_eq!(report.written().count(), 1);

    assert!(!work.path().join("sboms/a-1.json").exists());
    assert!(work.path().join("sboms/b-1.json").is_file());
    Ok(())
}

#[test]
fn test_layout_tarball_is_unpacked_and_cataloged() -> Result<()> {
    let work = TempDir::new()?;
    let config = pipeline_config(work.path());
    let registry = two_images_sharing_base();
    let digest_b = registry.manifest_digest("b:1");

    let mut pipeline = Pipeline::new(registry, &config, Notifier::new(1))?;
    pipeline.acquire_all(&["a:1", "b:1"])?;

    let tarball = work.path().join("images.tar");
    let mut builder = tar_rs::Builder::new(fs::File::create(&tarball)?);
    builder.append_dir_all(".", work.path().join("images"))?;
    builder.finish()?;

    assert_eq!(detect_source(&tarball)?, SourceKind::OciArchive);
    let source = BoundSource::bind(
        SourceKind::OciArchive,
        &tarball,
        &SourceScope::Image(digest_b.clone()),
    )?;
    assert_eq!(source.images().len(), 1);
    assert_eq!(source.images()[0].manifest_digest, digest_b);
    assert_eq!(source.images()[0].ref_name.as_deref(), Some("b:1"));

    let catalog = DefaultCataloger::new().catalog(&source)?;
    let mut names: Vec<&str> = catalog.packages.iter().map(|p| p.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["busybox", "httpd", "musl"]);
    assert_eq!(catalog.distro.map(|d| d.id), Some("alpine".to_string()));
    Ok(())
}
