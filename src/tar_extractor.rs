use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tar_rs as tar;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Normalizes a path from a tar archive to be safe for extraction
/// Removes any attempts to escape the root directory
pub fn normalize_tar_path(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();

    for comp in p.components() {
        match comp {
            Component::CurDir => { /* skip "." */ }
            Component::ParentDir => {
                // Don't allow escaping the root
                out.pop();
            }
            Component::Normal(c) => out.push(c),
            // Ignore absolute paths and Windows prefixes
            Component::RootDir | Component::Prefix(_) => { /* ignore */ }
        }
    }

    out
}

/// Overlay markers found in image layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Whiteout {
    /// `.wh.<name>`: the sibling `<name>` was deleted
    Remove(PathBuf),
    /// `.wh..wh..opq`: everything previously under this directory is hidden
    Opaque(PathBuf),
}

/// Classifies a normalized entry path as a whiteout marker, if it is one.
pub fn whiteout(rel_path: &Path) -> Option<Whiteout> {
    let file_name = rel_path.file_name()?.to_str()?;
    let parent = rel_path.parent().map(Path::to_path_buf).unwrap_or_default();
    if file_name == ".wh..wh..opq" {
        Some(Whiteout::Opaque(parent))
    } else {
        file_name
            .strip_prefix(".wh.")
            .map(|deleted| Whiteout::Remove(parent.join(deleted)))
    }
}

/// Opens a tar stream over `reader`, transparently un-gzipping it.
/// zstd layers are rejected.
pub fn open_archive<R: Read + 'static>(reader: R) -> io::Result<tar::Archive<Box<dyn Read>>> {
    let mut buf_reader = BufReader::new(reader);
    let magic = {
        use std::io::BufRead;
        buf_reader.fill_buf()?.iter().take(4).copied().collect::<Vec<u8>>()
    };

    if magic.starts_with(&ZSTD_MAGIC) {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "zstd-compressed layers are not supported",
        ));
    }

    let stream: Box<dyn Read> = if magic.starts_with(&GZIP_MAGIC) {
        Box::new(GzDecoder::new(buf_reader))
    } else {
        Box::new(buf_reader)
    };
    Ok(tar::Archive::new(stream))
}

/// Extracts a tar archive (plain or gzipped) of regular files and directories
/// into `extract_dir`. Links and special files are skipped.
pub fn extract_tar(tar_path: &Path, extract_dir: &Path) -> io::Result<()> {
    let file = File::open(tar_path)?;
    let mut archive = open_archive(file)?;

    for entry_result in archive.entries()? {
        let mut entry = entry_result?;
        let rel_path = normalize_tar_path(&entry.path()?);
        if rel_path.as_os_str().is_empty() {
            continue;
        }
        let dest = extract_dir.join(&rel_path);

        match entry.header().entry_type() {
            tar::EntryType::Directory => {
                fs::create_dir_all(&dest)?;
            }
            tar::EntryType::Regular => {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut out_file = File::create(&dest)?;
                io::copy(&mut entry, &mut out_file)?;
            }
            other => {
                log::debug!("Skipping {:?} entry {}", other, rel_path.display());
            }
        }
    }

    Ok(())
}
