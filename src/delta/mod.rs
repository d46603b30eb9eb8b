// src/delta/mod.rs

//! File-level deltas between two root filesystems
//!
//! A delta is computed from two snapshots: the builder image rootfs and the
//! step image rootfs. Every regular file and symlink under the destination
//! is compared against the source by size (a symlink's size is the length of
//! its target):
//!
//! - missing in source: addition
//! - present with a different size: change
//! - present with the same size: ignored
//!
//! Files present only in the source are deletions. Directories and other
//! special files (sockets, fifos, devices) are never listed. Inputs ending in `.tar` are unpacked into a temporary rootfs
//! first; those temporaries are removed when the computation returns.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;
use walkdir::WalkDir;

/// A file path relative to a rootfs (with leading slash) and its size
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DiffEntry {
    pub path: String,
    pub size: u64,
}

/// Additions, changes and deletions between two rootfs snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDiff {
    pub additions: Vec<DiffEntry>,
    pub changes: Vec<DiffEntry>,
    pub deletions: Vec<DiffEntry>,
}

impl ImageDiff {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.changes.is_empty() && self.deletions.is_empty()
    }

    /// Entries whose content must be carried into an artifact
    pub fn payload(&self) -> impl Iterator<Item = &DiffEntry> {
        self.additions.iter().chain(self.changes.iter())
    }
}

/// A rootfs to diff: either a directory used in place or an unpacked tarball
struct Rootfs {
    path: PathBuf,
    _scratch: Option<TempDir>,
}

impl Rootfs {
    fn open(input: &Path) -> Result<Self> {
        let is_tar = input
            .extension()
            .map(|ext| ext == "tar")
            .unwrap_or(false);
        if !is_tar {
            if !input.is_dir() {
                return Err(Error::IoError(format!(
                    "rootfs {} is not a directory",
                    input.display()
                )));
            }
            return Ok(Self {
                path: input.to_path_buf(),
                _scratch: None,
            });
        }

        let scratch = TempDir::new()?;
        debug!("Unpacking {} for delta computation", input.display());
        let mut archive = tar::Archive::new(File::open(input)?);
        archive.set_preserve_permissions(false);
        archive.unpack(scratch.path())?;
        Ok(Self {
            path: scratch.path().to_path_buf(),
            _scratch: Some(scratch),
        })
    }
}

/// Index every regular file and symlink of a rootfs by its rooted path
fn index_files(root: &Path) -> Result<BTreeMap<String, u64>> {
    let mut files = BTreeMap::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        let file_type = entry.file_type();
        if !file_type.is_file() && !file_type.is_symlink() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| Error::IoError(e.to_string()))?;
        let size = entry.metadata()?.len();
        files.insert(rooted(relative), size);
    }
    Ok(files)
}

/// Render a relative path as `/a/b/c`
pub fn rooted(relative: &Path) -> String {
    let mut out = String::new();
    for component in relative.components() {
        out.push('/');
        out.push_str(&component.as_os_str().to_string_lossy());
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Compute the delta between `src` and `dst`
pub fn compute_delta(src: &Path, dst: &Path) -> Result<ImageDiff> {
    let src = Rootfs::open(src)?;
    let dst = Rootfs::open(dst)?;

    let before = index_files(&src.path)?;
    let after = index_files(&dst.path)?;

    let mut diff = ImageDiff::default();
    for (path, &size) in &after {
        match before.get(path) {
            None => diff.additions.push(DiffEntry {
                path: path.clone(),
                size,
            }),
            Some(&old) if old != size => diff.changes.push(DiffEntry {
                path: path.clone(),
                size,
            }),
            Some(_) => {}
        }
    }
    for (path, &size) in &before {
        if !after.contains_key(path) {
            diff.deletions.push(DiffEntry {
                path: path.clone(),
                size,
            });
        }
    }

    debug!(
        "Delta: {} additions, {} changes, {} deletions",
        diff.additions.len(),
        diff.changes.len(),
        diff.deletions.len()
    );
    Ok(diff)
}
