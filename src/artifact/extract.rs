// src/artifact/extract.rs

//! Building artifacts out of rootfs deltas
//!
//! The payload of a delta (additions and changes) is filtered, copied into a
//! staging tree by a pool of copy workers, and compressed.

use super::PackageArtifact;
use crate::delta::{ImageDiff, rooted};
use crate::error::{Error, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use tempfile::TempDir;
use tracing::debug;
use walkdir::WalkDir;

/// Which delta paths end up in an artifact
#[derive(Debug, Clone, Default)]
pub struct DeltaFilter {
    includes: Vec<Regex>,
    excludes: Vec<Regex>,
    package_dir: Option<String>,
}

impl DeltaFilter {
    /// Compile include/exclude patterns
    pub fn new(includes: &[String], excludes: &[String]) -> Result<Self> {
        let compile = |patterns: &[String]| {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(p)
                        .map_err(|e| Error::ParseError(format!("invalid pattern '{}': {}", p, e)))
                })
                .collect::<Result<Vec<_>>>()
        };
        Ok(Self {
            includes: compile(includes)?,
            excludes: compile(excludes)?,
            package_dir: None,
        })
    }

    /// Only keep paths under `dir`, re-rooted at it
    pub fn with_package_dir(mut self, dir: &str) -> Self {
        let trimmed = dir.trim_matches('/');
        self.package_dir = if trimmed.is_empty() {
            None
        } else {
            Some(format!("/{}", trimmed))
        };
        self
    }

    /// Whether a rooted path is selected
    ///
    /// With includes, a path must match one of them. Any exclude match drops
    /// the path, even if it was included.
    pub fn accepts(&self, path: &str) -> bool {
        if !self.includes.is_empty() && !self.includes.iter().any(|r| r.is_match(path)) {
            return false;
        }
        !self.excludes.iter().any(|r| r.is_match(path))
    }

    /// Destination of a rooted path inside the artifact, if kept
    fn destination(&self, path: &str) -> Option<String> {
        match &self.package_dir {
            None => Some(path.to_string()),
            Some(dir) => path
                .strip_prefix(dir.as_str())
                .filter(|rest| rest.starts_with('/'))
                .map(str::to_string),
        }
    }
}

struct CopyJob {
    src: PathBuf,
    dst: PathBuf,
}

fn copy_entry(job: &CopyJob) -> Result<()> {
    if let Some(parent) = job.dst.parent() {
        fs::create_dir_all(parent)?;
    }
    let meta = fs::symlink_metadata(&job.src)
        .map_err(|e| Error::IoError(format!("{}: {}", job.src.display(), e)))?;
    if meta.file_type().is_symlink() {
        let link = fs::read_link(&job.src)?;
        std::os::unix::fs::symlink(link, &job.dst)?;
    } else {
        fs::copy(&job.src, &job.dst)
            .map_err(|e| Error::IoError(format!("copy {}: {}", job.src.display(), e)))?;
        fs::set_permissions(&job.dst, meta.permissions())?;
    }
    Ok(())
}

/// Copy jobs through a pool of `workers` threads, returning the first error
fn run_copies(jobs: Vec<CopyJob>, workers: usize) -> Result<()> {
    let (tx, rx) = flume::unbounded::<CopyJob>();
    let (err_tx, err_rx) = flume::unbounded::<Error>();
    for job in jobs {
        // Receiver is alive until the scope below ends
        let _ = tx.send(job);
    }
    drop(tx);

    thread::scope(|scope| {
        for _ in 0..workers.max(1) {
            let rx = rx.clone();
            let err_tx = err_tx.clone();
            scope.spawn(move || {
                for job in rx.iter() {
                    if let Err(e) = copy_entry(&job) {
                        let _ = err_tx.send(e);
                        return;
                    }
                }
            });
        }
    });
    drop(err_tx);

    match err_rx.try_recv() {
        Ok(e) => Err(e),
        Err(_) => Ok(()),
    }
}

/// Package the delta payload found in `rootfs` into `artifact`
pub fn extract_from_delta(
    rootfs: &Path,
    diff: &ImageDiff,
    filter: &DeltaFilter,
    artifact: &mut PackageArtifact,
    concurrency: usize,
) -> Result<()> {
    let staging = TempDir::new()?;
    let jobs: Vec<CopyJob> = diff
        .payload()
        .filter(|entry| filter.accepts(&entry.path))
        .filter_map(|entry| {
            filter.destination(&entry.path).map(|dst| CopyJob {
                src: rootfs.join(entry.path.trim_start_matches('/')),
                dst: staging.path().join(dst.trim_start_matches('/')),
            })
        })
        .collect();

    debug!(
        "Extracting {} of {} delta entries from {}",
        jobs.len(),
        diff.additions.len() + diff.changes.len(),
        rootfs.display()
    );
    run_copies(jobs, concurrency)?;
    artifact.compress(staging.path(), concurrency)
}

/// Package a whole rootfs (or its package dir) into `artifact`
pub fn package_rootfs(
    rootfs: &Path,
    filter: &DeltaFilter,
    artifact: &mut PackageArtifact,
    concurrency: usize,
) -> Result<()> {
    let staging = TempDir::new()?;
    let mut jobs = Vec::new();
    for entry in WalkDir::new(rootfs).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(rootfs)
            .map_err(|e| Error::IoError(e.to_string()))?;
        let path = rooted(relative);
        if !filter.accepts(&path) {
            continue;
        }
        if let Some(dst) = filter.destination(&path) {
            jobs.push(CopyJob {
                src: entry.path().to_path_buf(),
                dst: staging.path().join(dst.trim_start_matches('/')),
            });
        }
    }

    run_copies(jobs, concurrency)?;
    artifact.compress(staging.path(), concurrency)
}
