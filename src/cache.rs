//! Content-addressable layer cache.
//!
//! Layer blobs are stored under `<root>/<algorithm>/<hex>`:
//!
//! ```text
//! cache/
//! └── sha256/
//!     ├── 0a1b2c...   (layer tarball)
//!     └── 9f8e7d...
//! ```
//!
//! A digest determines its content, so entries are never invalidated: a hit is
//! served straight from disk and a miss is fetched, verified against the
//! digest, and written atomically (temp file in the cache root, then rename).
//! The directory outlives the process, so later runs skip unchanged layers.

use crate::digest::ContentDigest;
use crate::error::{Error, Result};
use log::{debug, trace};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct LayerCache {
    root: PathBuf,
}

impl LayerCache {
    /// Opens (creating if needed) a cache rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| Error::storage(&root, e))?;
        debug!("Layer cache at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, digest: &ContentDigest) -> PathBuf {
        self.root.join(digest.to_relative_path())
    }

    pub fn contains(&self, digest: &ContentDigest) -> bool {
        self.path_for(digest).is_file()
    }

    /// Returns the cached bytes for `digest`, calling `fetch` only on a miss.
    ///
    /// Fetched bytes that do not hash to `digest` are rejected with a
    /// resolution error naming `reference` and are never stored.
    pub fn get_or_fetch<F>(
        &self,
        reference: impl fmt::Display,
        digest: &ContentDigest,
        fetch: F,
    ) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        let path = self.path_for(digest);
        if path.is_file() {
            trace!("Cache hit for {}", digest);
            return fs::read(&path).map_err(|e| Error::storage(&path, e));
        }

        debug!("Cache miss for {}, fetching", digest);
        let data = fetch()?;
        if !digest.matches(&data) {
            return Err(Error::resolution(
                reference,
                format!(
                    "blob {} hashes to {} instead",
                    digest,
                    ContentDigest::sha256(&data)
                ),
            ));
        }
        self.store(&path, &data)?;
        Ok(data)
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> Result<usize> {
        let mut count = 0;
        for algorithm in fs::read_dir(&self.root).map_err(|e| Error::storage(&self.root, e))? {
            let algorithm = algorithm.map_err(|e| Error::storage(&self.root, e))?;
            if !algorithm.path().is_dir() {
                continue;
            }
            for blob in fs::read_dir(algorithm.path()).map_err(|e| Error::storage(algorithm.path(), e))? {
                let blob = blob.map_err(|e| Error::storage(algorithm.path(), e))?;
                if blob.path().is_file() {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn store(&self, path: &Path, data: &[u8]) -> Result<()> {
        write_atomic(path, data)
    }
}

/// Writes `data` to `path` through a sibling temp file and a rename, so readers
/// never observe a partially written blob.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| Error::storage(parent, e))?;

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| Error::storage(parent, e))?;
    temp.write_all(data).map_err(|e| Error::storage(temp.path(), e))?;
    temp.persist(path).map_err(|e| Error::storage(path, e.error))?;
    Ok(())
}
