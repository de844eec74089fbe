//! Package cataloging for archived images.
//!
//! [`BoundSource::bind`] turns a detected archive into the set of images to
//! inspect (one image, or every image in the layout). [`DefaultCataloger`]
//! squashes each image's layers and reads:
//! - `etc/os-release` (falling back to `usr/lib/os-release`) for the distro,
//! - the Alpine apk database,
//! - the dpkg status database and `status.d` entries.
//!
//! Packages get a package URL and a stable id derived from it; dependencies
//! are resolved through package names and `provides` into `dependency-of`
//! relationships.

pub mod apk;
pub mod dpkg;
pub mod os_release;
pub mod rootfs;

pub use os_release::LinuxRelease;

use crate::archive::{ref_name_of, BLOBS_DIR, INDEX_FILE};
use crate::detect::SourceKind;
use crate::digest::ContentDigest;
use crate::error::{Error, Result};
use crate::metadata::{self, ImageMetadata};
use crate::tar_extractor;
use log::debug;
use oci_spec::image::{ImageIndex, ImageManifest};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Fields read from a package database entry, before distro-specific
/// identifiers are attached.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    pub architecture: Option<String>,
    pub licenses: Vec<String>,
    pub origin: Option<String>,
    pub maintainer: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub depends: Vec<String>,
    pub provides: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    Apk,
    Deb,
}

impl PackageType {
    fn default_namespace(&self) -> &'static str {
        match self {
            PackageType::Apk => "alpine",
            PackageType::Deb => "debian",
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageType::Apk => write!(f, "apk"),
            PackageType::Deb => write!(f, "deb"),
        }
    }
}

/// Where a package was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub path: String,
    pub layer_digest: String,
    pub image_digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub kind: PackageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub licenses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintainer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub purl: String,
    pub locations: Vec<Location>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipKind {
    /// `parent` is a dependency of `child`
    DependencyOf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub parent: String,
    pub child: String,
    #[serde(rename = "type")]
    pub kind: RelationshipKind,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub packages: Vec<Package>,
    pub relationships: Vec<Relationship>,
    pub distro: Option<LinuxRelease>,
}

/// Which images of the archive a bound source covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceScope {
    /// Only the image with this manifest digest
    Image(ContentDigest),
    /// Every image listed in `index.json`
    Archive,
}

/// One image selected from the layout.
#[derive(Debug, Clone)]
pub struct BoundImage {
    pub manifest_digest: ContentDigest,
    pub ref_name: Option<String>,
    pub manifest: ImageManifest,
    pub metadata: Option<ImageMetadata>,
}

/// A detected archive, ready for cataloging.
pub struct BoundSource {
    kind: SourceKind,
    path: PathBuf,
    layout_root: PathBuf,
    images: Vec<BoundImage>,
    _unpacked: Option<TempDir>,
}

impl BoundSource {
    pub fn bind(kind: SourceKind, path: &Path, scope: &SourceScope) -> Result<Self> {
        let (layout_root, unpacked) = match kind {
            SourceKind::OciDirectory => (path.to_path_buf(), None),
            SourceKind::OciArchive => {
                let temp_dir = TempDir::new().map_err(|e| Error::storage(path, e))?;
                tar_extractor::extract_tar(path, temp_dir.path())
                    .map_err(|e| Error::storage(path, e))?;
                (temp_dir.path().to_path_buf(), Some(temp_dir))
            }
        };

        let images = select_images(&layout_root, scope)?;
        debug!(
            "Bound {} source at {} with {} image(s)",
            kind,
            path.display(),
            images.len()
        );

        Ok(Self {
            kind,
            path: path.to_path_buf(),
            layout_root,
            images,
            _unpacked: unpacked,
        })
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding `index.json` and `blobs/` (a temp dir for archives).
    pub fn layout_root(&self) -> &Path {
        &self.layout_root
    }

    pub fn images(&self) -> &[BoundImage] {
        &self.images
    }
}

fn select_images(layout_root: &Path, scope: &SourceScope) -> Result<Vec<BoundImage>> {
    let index_path = layout_root.join(INDEX_FILE);
    let data = fs::read(&index_path).map_err(|e| Error::storage(&index_path, e))?;
    let index: ImageIndex = serde_json::from_slice(&data).map_err(|e| Error::Detection {
        path: index_path.clone(),
        reason: format!("malformed index.json: {}", e),
    })?;

    let mut images = Vec::new();
    for descriptor in index.manifests() {
        let digest: ContentDigest = match descriptor.digest().to_string().parse() {
            Ok(digest) => digest,
            Err(e) => return Err(Error::Catalog(format!("bad index entry: {}", e))),
        };
        if let SourceScope::Image(wanted) = scope {
            if &digest != wanted {
                continue;
            }
        }
        if images.iter().any(|image: &BoundImage| image.manifest_digest == digest) {
            continue;
        }

        let manifest_path = layout_root.join(BLOBS_DIR).join(digest.to_relative_path());
        let manifest_bytes = fs::read(&manifest_path).map_err(|e| Error::storage(&manifest_path, e))?;
        let manifest: ImageManifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| Error::Catalog(format!("manifest {} is not an image manifest: {}", digest, e)))?;

        let metadata = manifest
            .config()
            .digest()
            .to_string()
            .parse::<ContentDigest>()
            .ok()
            .and_then(|config| fs::read(layout_root.join(BLOBS_DIR).join(config.to_relative_path())).ok())
            .and_then(|config| metadata::from_config_bytes(&config));

        images.push(BoundImage {
            manifest_digest: digest,
            ref_name: ref_name_of(descriptor).map(str::to_string),
            manifest,
            metadata,
        });
    }

    if let SourceScope::Image(wanted) = scope {
        if images.is_empty() {
            return Err(Error::Detection {
                path: layout_root.to_path_buf(),
                reason: format!("manifest {} is not listed in index.json", wanted),
            });
        }
    }
    Ok(images)
}

/// Extracts packages from a bound source.
pub trait Cataloger {
    fn catalog(&self, source: &BoundSource) -> Result<Catalog>;
}

#[derive(Debug, Clone, Default)]
pub struct DefaultCataloger;

const OS_RELEASE_PATHS: [&str; 2] = ["etc/os-release", "usr/lib/os-release"];

impl DefaultCataloger {
    pub fn new() -> Self {
        Self
    }

    fn is_wanted(path: &Path) -> bool {
        OS_RELEASE_PATHS.iter().any(|p| path == Path::new(p))
            || path == Path::new(apk::DB_PATH)
            || dpkg::is_status_file(path)
    }

    fn catalog_image(&self, layout_root: &Path, image: &BoundImage) -> Result<Catalog> {
        let files = rootfs::squash(layout_root, &image.manifest, Self::is_wanted)?;

        let distro = OS_RELEASE_PATHS
            .iter()
            .find_map(|p| files.get(Path::new(p)))
            .and_then(|file| os_release::parse(&String::from_utf8_lossy(&file.data)));

        let mut found: Vec<(PackageRecord, PackageType, Location)> = Vec::new();
        for (path, file) in &files {
            let content = String::from_utf8_lossy(&file.data);
            let (kind, records) = if path == Path::new(apk::DB_PATH) {
                (PackageType::Apk, apk::parse_installed(&content))
            } else if dpkg::is_status_file(path) {
                (PackageType::Deb, dpkg::parse_status(&content))
            } else {
                continue;
            };
            debug!(
                "Found {} {} package(s) in {} of {}",
                records.len(),
                kind,
                path.display(),
                image.manifest_digest.short()
            );
            let location = Location {
                path: format!("/{}", path.display()),
                layer_digest: file.layer.to_string(),
                image_digest: image.manifest_digest.to_string(),
            };
            found.extend(records.into_iter().map(|r| (r, kind, location.clone())));
        }

        let packages: Vec<Package> = found
            .iter()
            .map(|(record, kind, location)| to_package(record, *kind, distro.as_ref(), location.clone()))
            .collect();
        let relationships = resolve_relationships(&found, &packages);

        Ok(Catalog {
            packages,
            relationships,
            distro,
        })
    }
}

impl Cataloger for DefaultCataloger {
    fn catalog(&self, source: &BoundSource) -> Result<Catalog> {
        let mut packages: BTreeMap<String, Package> = BTreeMap::new();
        let mut relationships: Vec<Relationship> = Vec::new();
        let mut distro = None;

        for image in source.images() {
            let catalog = self.catalog_image(source.layout_root(), image)?;
            for package in catalog.packages {
                match packages.get_mut(&package.id) {
                    Some(existing) => {
                        for location in package.locations {
                            if !existing.locations.contains(&location) {
                                existing.locations.push(location);
                            }
                        }
                    }
                    None => {
                        packages.insert(package.id.clone(), package);
                    }
                }
            }
            for relationship in catalog.relationships {
                if !relationships.contains(&relationship) {
                    relationships.push(relationship);
                }
            }
            if distro.is_none() {
                distro = catalog.distro;
            }
        }

        let mut packages: Vec<Package> = packages.into_values().collect();
        packages.sort_by(|a, b| (&a.name, &a.version, &a.id).cmp(&(&b.name, &b.version, &b.id)));

        Ok(Catalog {
            packages,
            relationships,
            distro,
        })
    }
}

fn to_package(
    record: &PackageRecord,
    kind: PackageType,
    distro: Option<&LinuxRelease>,
    location: Location,
) -> Package {
    let purl = package_url(record, kind, distro);
    let id = ContentDigest::sha256(purl.as_bytes()).hex()[..16].to_string();
    Package {
        id,
        name: record.name.clone(),
        version: record.version.clone(),
        kind,
        architecture: record.architecture.clone(),
        licenses: record.licenses.clone(),
        origin: record.origin.clone(),
        maintainer: record.maintainer.clone(),
        description: record.description.clone(),
        url: record.url.clone(),
        purl,
        locations: vec![location],
    }
}

/// `pkg:<type>/<distro>/<name>@<version>?arch=..&distro=..&upstream=..`
pub fn package_url(record: &PackageRecord, kind: PackageType, distro: Option<&LinuxRelease>) -> String {
    let namespace = distro
        .map(|d| d.id.as_str())
        .unwrap_or_else(|| kind.default_namespace());
    let mut purl = format!(
        "pkg:{}/{}/{}",
        kind,
        purl_escape(namespace),
        purl_escape(&record.name)
    );
    if !record.version.is_empty() {
        purl.push('@');
        purl.push_str(&purl_escape(&record.version));
    }

    let mut qualifiers = Vec::new();
    if let Some(arch) = &record.architecture {
        qualifiers.push(format!("arch={}", purl_escape(arch)));
    }
    if let Some(distro) = distro {
        qualifiers.push(format!("distro={}", purl_escape(&distro.distro_qualifier())));
    }
    if let Some(origin) = record.origin.as_ref().filter(|o| **o != record.name) {
        qualifiers.push(format!("upstream={}", purl_escape(origin)));
    }
    if !qualifiers.is_empty() {
        purl.push('?');
        purl.push_str(&qualifiers.join("&"));
    }
    purl
}

fn purl_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'-' | b'_' | b'~') {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("%{:02X}", byte));
        }
    }
    escaped
}

fn resolve_relationships(
    found: &[(PackageRecord, PackageType, Location)],
    packages: &[Package],
) -> Vec<Relationship> {
    let mut providers: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, (record, _, _)) in found.iter().enumerate() {
        providers.entry(record.name.as_str()).or_default().push(i);
        for provided in &record.provides {
            providers.entry(provided.as_str()).or_default().push(i);
        }
    }

    let mut relationships = Vec::new();
    for (dependent, (record, _, _)) in found.iter().enumerate() {
        for dependency in &record.depends {
            let Some(candidates) = providers.get(dependency.as_str()) else {
                continue;
            };
            for &provider in candidates {
                if provider == dependent {
                    continue;
                }
                let relationship = Relationship {
                    parent: packages[provider].id.clone(),
                    child: packages[dependent].id.clone(),
                    kind: RelationshipKind::DependencyOf,
                };
                if !relationships.contains(&relationship) {
                    relationships.push(relationship);
                }
            }
        }
    }
    relationships
}
