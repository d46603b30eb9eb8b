// src/backend/mod.rs

//! Container image backends
//!
//! The compiler never runs build steps itself. It drives an
//! [`ImageBackend`], which builds images from generated Dockerfiles, moves
//! them between the local store and registries, and exposes their root
//! filesystems for delta computation.
//!
//! [`Backend`] is the process-based implementation, shelling out to either
//! `docker` or `img`.

use crate::delta::{self, ImageDiff};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;
use tracing::{debug, info};

/// Lines of stderr kept in a [`Error::BackendFailure`]
const STDERR_TAIL_LINES: usize = 20;

/// Everything needed to build one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuildOptions {
    /// Full reference, `repository:tag`
    pub image_name: String,
    /// Dockerfile content
    pub dockerfile: String,
    /// Build context directory
    pub context: PathBuf,
}

/// Capabilities the compiler needs from a container runtime
pub trait ImageBackend: Send + Sync {
    fn build_image(&self, opts: &ImageBuildOptions) -> Result<()>;

    /// Save an image as a tarball at `dest`
    fn export_image(&self, image: &str, dest: &Path) -> Result<()>;

    fn remove_image(&self, image: &str) -> Result<()>;

    /// Pull an image from its registry
    fn download_image(&self, image: &str) -> Result<()>;

    fn push(&self, image: &str) -> Result<()>;

    /// Whether the registry has the image
    fn image_available(&self, image: &str) -> bool;

    /// Whether the local store has the image
    fn image_exists(&self, image: &str) -> bool;

    /// Write the flattened root filesystem of an image into `dest`
    fn extract_rootfs(&self, image: &str, dest: &Path, keep_perms: bool) -> Result<()>;

    /// File-level delta between two images
    fn changes(&self, from: &str, to: &str) -> Result<ImageDiff> {
        let before = TempDir::new()?;
        let after = TempDir::new()?;
        self.extract_rootfs(from, before.path(), false)?;
        self.extract_rootfs(to, after.path(), false)?;
        delta::compute_delta(before.path(), after.path())
    }
}

/// Which container runtime binary to drive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    #[default]
    Docker,
    Img,
}

impl std::str::FromStr for BackendType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "docker" => Ok(Self::Docker),
            "img" => Ok(Self::Img),
            other => Err(Error::ParseError(format!("unknown backend '{}'", other))),
        }
    }
}

/// Process-based backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Docker { args: Vec<String> },
    Img { args: Vec<String> },
}

impl Backend {
    pub fn new(kind: BackendType, args: Vec<String>) -> Self {
        match kind {
            BackendType::Docker => Backend::Docker { args },
            BackendType::Img => Backend::Img { args },
        }
    }

    fn program(&self) -> &'static str {
        match self {
            Backend::Docker { .. } => "docker",
            Backend::Img { .. } => "img",
        }
    }

    fn extra_args(&self) -> &[String] {
        match self {
            Backend::Docker { args } | Backend::Img { args } => args,
        }
    }

    /// Run the runtime binary, returning stdout
    fn run(&self, args: &[&str]) -> Result<String> {
        let command = format!("{} {}", self.program(), args.join(" "));
        debug!("Running {}", command);

        let output = Command::new(self.program())
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::BackendFailure {
                command: command.clone(),
                stderr: format!("failed to spawn: {}", e),
            })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(Error::BackendFailure {
            command,
            stderr: tail(&stderr, STDERR_TAIL_LINES),
        })
    }

    /// Run and only report whether the command succeeded
    fn probe(&self, args: &[&str]) -> bool {
        Command::new(self.program())
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

/// Last `lines` lines of `text`
fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

impl ImageBackend for Backend {
    fn build_image(&self, opts: &ImageBuildOptions) -> Result<()> {
        let scratch = TempDir::new()?;
        let dockerfile = scratch.path().join("Dockerfile");
        fs::write(&dockerfile, &opts.dockerfile)?;
        let dockerfile = dockerfile.to_string_lossy().into_owned();
        let context = opts.context.to_string_lossy().into_owned();

        let mut args: Vec<&str> = vec![
            "build",
            "-f",
            dockerfile.as_str(),
            "-t",
            opts.image_name.as_str(),
        ];
        args.extend(self.extra_args().iter().map(String::as_str));
        args.push(context.as_str());

        info!("Building image {}", opts.image_name);
        self.run(&args).map(|_| ())
    }

    fn export_image(&self, image: &str, dest: &Path) -> Result<()> {
        let dest = dest.to_string_lossy().into_owned();
        self.run(&["save", "-o", dest.as_str(), image]).map(|_| ())
    }

    fn remove_image(&self, image: &str) -> Result<()> {
        match self {
            Backend::Docker { .. } => self.run(&["rmi", "-f", image]),
            Backend::Img { .. } => self.run(&["rm", image]),
        }
        .map(|_| ())
    }

    fn download_image(&self, image: &str) -> Result<()> {
        info!("Pulling image {}", image);
        self.run(&["pull", image]).map(|_| ())
    }

    fn push(&self, image: &str) -> Result<()> {
        info!("Pushing image {}", image);
        self.run(&["push", image]).map(|_| ())
    }

    fn image_available(&self, image: &str) -> bool {
        match self {
            Backend::Docker { .. } => self.probe(&["manifest", "inspect", image]),
            // img has no remote inspection, a pull is the only probe
            Backend::Img { .. } => self.probe(&["pull", image]),
        }
    }

    fn image_exists(&self, image: &str) -> bool {
        match self {
            Backend::Docker { .. } => self.probe(&["image", "inspect", image]),
            Backend::Img { .. } => self
                .run(&["ls"])
                .map(|out| out.lines().any(|l| l.split_whitespace().next() == Some(image)))
                .unwrap_or(false),
        }
    }

    fn extract_rootfs(&self, image: &str, dest: &Path, keep_perms: bool) -> Result<()> {
        fs::create_dir_all(dest)?;
        match self {
            Backend::Img { .. } => {
                let dest = dest.to_string_lossy().into_owned();
                self.run(&["unpack", "-o", dest.as_str(), image]).map(|_| ())
            }
            Backend::Docker { .. } => {
                // Scratch images have no CMD; create needs one but never runs it
                let container = self.run(&["create", image, "true"])?.trim().to_string();
                let scratch = TempDir::new()?;
                let tarball = scratch.path().join("rootfs.tar");
                let tar_arg = tarball.to_string_lossy().into_owned();

                let exported = self.run(&["export", "-o", tar_arg.as_str(), container.as_str()]);
                // The container is removed whether or not the export worked
                let removed = self.run(&["rm", container.as_str()]);
                exported?;
                removed?;

                let mut archive = tar::Archive::new(File::open(&tarball)?);
                archive.set_preserve_permissions(keep_perms);
                archive.unpack(dest)?;
                Ok(())
            }
        }
    }
}
