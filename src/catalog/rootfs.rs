//! Squashes an image's layers into the handful of files the cataloger reads.
//!
//! Layers are applied base first. Within each layer, whiteouts hide entries
//! from lower layers only, and any non-regular entry (e.g. a symlink) at a
//! tracked path shadows the lower file.

use crate::digest::ContentDigest;
use crate::error::{Error, Result};
use crate::tar_extractor::{normalize_tar_path, open_archive, whiteout, Whiteout};
use log::trace;
use oci_spec::image::ImageManifest;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar_rs as tar;

#[derive(Debug, Clone)]
pub struct CapturedFile {
    pub data: Vec<u8>,
    /// Layer that last wrote the file
    pub layer: ContentDigest,
}

pub type CapturedFiles = BTreeMap<PathBuf, CapturedFile>;

/// Reads every layer of `manifest` from the layout at `layout_root`, keeping
/// the final content of paths accepted by `wanted`.
pub fn squash<F>(layout_root: &Path, manifest: &ImageManifest, wanted: F) -> Result<CapturedFiles>
where
    F: Fn(&Path) -> bool,
{
    let mut files = CapturedFiles::new();

    for descriptor in manifest.layers() {
        let digest: ContentDigest = descriptor
            .digest()
            .to_string()
            .parse()
            .map_err(|e| Error::Catalog(format!("{}", e)))?;
        let blob = layout_root.join("blobs").join(digest.to_relative_path());
        let file = File::open(&blob)
            .map_err(|e| Error::Catalog(format!("layer {} unreadable: {}", digest, e)))?;

        let upper = read_layer(file, &digest, &mut files, &wanted)
            .map_err(|e| Error::Catalog(format!("layer {} is corrupt: {}", digest, e)))?;
        files.extend(upper);
    }

    Ok(files)
}

fn read_layer<F>(
    file: File,
    digest: &ContentDigest,
    lower: &mut CapturedFiles,
    wanted: &F,
) -> std::io::Result<CapturedFiles>
where
    F: Fn(&Path) -> bool,
{
    let mut upper = CapturedFiles::new();
    let mut archive = open_archive(file)?;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let rel_path = normalize_tar_path(&entry.path()?);

        match whiteout(&rel_path) {
            Some(Whiteout::Remove(path)) => {
                trace!("Whiteout {} in {}", path.display(), digest.short());
                remove_under(lower, &path, true);
                continue;
            }
            Some(Whiteout::Opaque(dir)) => {
                trace!("Opaque {} in {}", dir.display(), digest.short());
                remove_under(lower, &dir, false);
                continue;
            }
            None => {}
        }

        if !wanted(&rel_path) {
            continue;
        }
        if entry.header().entry_type() != tar::EntryType::Regular {
            lower.remove(&rel_path);
            upper.remove(&rel_path);
            continue;
        }

        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        upper.insert(
            rel_path,
            CapturedFile {
                data,
                layer: digest.clone(),
            },
        );
    }

    Ok(upper)
}

/// Drops `path`'s descendants, and `path` itself when `inclusive`.
fn remove_under(files: &mut CapturedFiles, path: &Path, inclusive: bool) {
    files.retain(|candidate, _| {
        let hit = candidate.starts_with(path) && (inclusive || candidate != path);
        !hit
    });
}
