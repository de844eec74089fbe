//! End-to-end "image list → cache → OCI layout → SBOMs" orchestrator.
//!
//! This module provides [`Pipeline`], which owns all run state:
//! - the [`ImageAcquirer`] (source + layer cache),
//! - the [`OciArchiver`] for the shared archive directory,
//! - the [`DigestTracker`] of layer repetitions,
//! - the SBOM key → [`ArchivedImage`] map built during acquisition.
//!
//! A run has two phases. Acquisition parses every reference up front, then
//! pulls and archives images one at a time; any failure aborts the run before
//! a single SBOM is written. The SBOM phase then handles each key
//! independently: a failing key is recorded in the [`RunReport`] and the
//! remaining keys still get their documents.

use crate::acquirer::ImageAcquirer;
use crate::archive::OciArchiver;
use crate::cache::{write_atomic, LayerCache};
use crate::catalog::{BoundSource, Cataloger, DefaultCataloger, SourceScope};
use crate::config::{PipelineConfig, SbomScope};
use crate::detect::detect_source;
use crate::digest::ContentDigest;
use crate::digest_tracker::{DigestTracker, RepeatedLayer};
use crate::error::{Error, Result};
use crate::notifier::Notifier;
use crate::sbom::{encode, Sbom, SbomDescriptor, SbomFormat, SourceDescription};
use crate::sources::naming::{parse_all, sbom_keys};
use crate::sources::{ImageReference, Source};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// An image that made it into the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedImage {
    pub reference: ImageReference,
    pub manifest_digest: ContentDigest,
    pub layer_count: usize,
}

/// Result of the SBOM phase for one key.
#[derive(Debug)]
pub struct SbomOutcome {
    pub key: String,
    pub result: Result<PathBuf>,
}

#[derive(Debug)]
pub struct RunReport {
    pub repeated_layers: Vec<RepeatedLayer>,
    pub sboms: Vec<SbomOutcome>,
}

impl RunReport {
    pub fn written(&self) -> impl Iterator<Item = &Path> {
        self.sboms
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().ok().map(PathBuf::as_path))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.sboms
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().err().map(|e| (outcome.key.as_str(), e)))
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

struct SbomSettings {
    sboms_dir: PathBuf,
    format: SbomFormat,
    scope: SbomScope,
    descriptor_name: String,
}

pub struct Pipeline<S: Source, C: Cataloger = DefaultCataloger> {
    acquirer: ImageAcquirer<S>,
    archiver: OciArchiver,
    cataloger: C,
    tracker: DigestTracker,
    images: BTreeMap<String, ArchivedImage>,
    settings: SbomSettings,
    notifier: Notifier,
}

impl<S: Source> Pipeline<S> {
    /// Opens the cache and archive directories named in `config`.
    pub fn new(source: S, config: &PipelineConfig, notifier: Notifier) -> Result<Self> {
        let cache = LayerCache::open(&config.cache_dir)?;
        let archiver = OciArchiver::open(&config.images_dir)?;
        let acquirer = ImageAcquirer::new(source, cache).with_retry(
            config.pull_attempts,
            Duration::from_millis(config.retry_backoff_ms),
        );

        Ok(Self {
            acquirer,
            archiver,
            cataloger: DefaultCataloger::new(),
            tracker: DigestTracker::new(),
            images: BTreeMap::new(),
            settings: SbomSettings {
                sboms_dir: config.sboms_dir.clone(),
                format: config.format,
                scope: config.scope,
                descriptor_name: config.descriptor_name.clone(),
            },
            notifier,
        })
    }
}

impl<S: Source, C: Cataloger> Pipeline<S, C> {
    /// Swaps the package cataloger.
    pub fn with_cataloger<C2: Cataloger>(self, cataloger: C2) -> Pipeline<S, C2> {
        Pipeline {
            acquirer: self.acquirer,
            archiver: self.archiver,
            cataloger,
            tracker: self.tracker,
            images: self.images,
            settings: self.settings,
            notifier: self.notifier,
        }
    }

    pub fn tracker(&self) -> &DigestTracker {
        &self.tracker
    }

    /// SBOM key → archived image.
    pub fn images(&self) -> &BTreeMap<String, ArchivedImage> {
        &self.images
    }

    pub fn cache(&self) -> &LayerCache {
        self.acquirer.cache()
    }

    pub fn archiver(&self) -> &OciArchiver {
        &self.archiver
    }

    pub fn source(&self) -> &S {
        self.acquirer.source()
    }

    /// Runs both phases. `Err` means acquisition failed and no SBOM was
    /// written; per-key SBOM failures are in the report.
    pub fn run<R: AsRef<str>>(&mut self, references: &[R]) -> Result<RunReport> {
        if let Err(err) = self.acquire_all(references) {
            self.notifier.finish();
            return Err(err);
        }
        let repeated_layers = self.report_repeated_layers();
        let sboms = self.generate_sboms();
        self.notifier.finish();
        Ok(RunReport {
            repeated_layers,
            sboms,
        })
    }

    /// Pulls, caches, counts and archives every reference in order.
    pub fn acquire_all<R: AsRef<str>>(&mut self, references: &[R]) -> Result<()> {
        let references = parse_all(references)?;
        let keys = sbom_keys(&references);

        let progress = self
            .notifier
            .create_progress_bar(references.len() as u64, "Pulling images");
        let mut result = Ok(());
        for (i, (key, reference)) in keys.into_iter().zip(&references).enumerate() {
            result = self.acquire_one(key, reference);
            if result.is_err() {
                break;
            }
            if let Some(bar) = &progress {
                bar.inc(1);
            }
            self.notifier
                .progress(i as u64 + 1, references.len() as u64, "Images archived");
        }
        if let Some(bar) = progress {
            bar.finish_and_clear();
        }
        result
    }

    fn acquire_one(&mut self, key: String, reference: &ImageReference) -> Result<()> {
        self.notifier.info(&format!(
            "Pulling {} from {} source...",
            reference,
            self.acquirer.source().name()
        ));
        let handle = self.acquirer.acquire(reference)?;

        self.tracker.observe_all(handle.layer_digests());

        self.notifier.info(&format!(
            "Archiving {} ({} layers)...",
            reference,
            handle.layers().len()
        ));
        self.archiver.archive(&handle)?;
        self.notifier.debug(&format!(
            "Archived {} as {}",
            reference,
            handle.manifest_digest()
        ));

        self.images.insert(
            key,
            ArchivedImage {
                reference: reference.clone(),
                manifest_digest: handle.manifest_digest().clone(),
                layer_count: handle.layers().len(),
            },
        );
        Ok(())
    }

    /// Logs and returns the layers shared by more than one image.
    pub fn report_repeated_layers(&self) -> Vec<RepeatedLayer> {
        let repeated = self.tracker.report();
        for layer in &repeated {
            self.notifier.report(&format!(
                "Layer \"{}\" is repeated {} times",
                layer.digest, layer.count
            ));
        }
        repeated
    }

    /// Writes one SBOM per archived key; failures do not stop other keys.
    pub fn generate_sboms(&self) -> Vec<SbomOutcome> {
        self.images
            .iter()
            .map(|(key, image)| {
                let result = self.generate_sbom(key, image);
                if let Err(err) = &result {
                    self.notifier
                        .warn(&format!("SBOM for {} failed: {}", key, err));
                }
                SbomOutcome {
                    key: key.clone(),
                    result,
                }
            })
            .collect()
    }

    /// Detect → bind → catalog → assemble → encode → persist.
    pub fn generate_sbom(&self, key: &str, image: &ArchivedImage) -> Result<PathBuf> {
        let archive_root = self.archiver.root();
        self.notifier
            .info(&format!("Cataloging {}...", image.reference));

        let kind = detect_source(archive_root)?;
        self.notifier.report(&format!(
            "Detected source \"{}\" for \"{}\"",
            kind,
            archive_root.display()
        ));

        let scope = match self.settings.scope {
            SbomScope::Image => SourceScope::Image(image.manifest_digest.clone()),
            SbomScope::Archive => SourceScope::Archive,
        };
        let source = BoundSource::bind(kind, archive_root, &scope)?;
        let catalog = self.cataloger.catalog(&source)?;
        if catalog.packages.is_empty() {
            self.notifier
                .warn(&format!("No packages found for {}", image.reference));
        }

        let mut description = match self.settings.scope {
            SbomScope::Image => SourceDescription::new(&image.reference.to_string(), kind),
            SbomScope::Archive => {
                SourceDescription::new(&archive_root.display().to_string(), kind)
            }
        };
        description.manifest_digests = source
            .images()
            .iter()
            .map(|bound| bound.manifest_digest.to_string())
            .collect();
        if let [only] = source.images() {
            description.metadata = only.metadata.clone();
        }

        let sbom = Sbom::assemble(
            SbomDescriptor::named(&self.settings.descriptor_name),
            description,
            catalog,
        );
        let data = encode(&sbom, self.settings.format)?;

        let sboms_dir = &self.settings.sboms_dir;
        fs::create_dir_all(sboms_dir).map_err(|e| Error::storage(sboms_dir, e))?;
        let path = sboms_dir.join(format!("{}.json", key));
        write_atomic(&path, &data)?;

        self.notifier
            .report(&format!("Wrote \"{}\"", path.display()));
        Ok(path)
    }
}
