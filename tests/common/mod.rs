// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use kiln::backend::{ImageBackend, ImageBuildOptions};
use kiln::compiler::{BuildDefinition, CompilationSpec, CompilerOptions};
use kiln::{Error, Package, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use tempfile::TempDir;
use walkdir::WalkDir;

/// Image filesystem: relative path to content
pub type Rootfs = BTreeMap<String, String>;

pub fn pkg(category: &str, name: &str, version: &str) -> Package {
    Package::new(category, name, version)
}

/// Any version of `category/name`
pub fn sel(category: &str, name: &str) -> Package {
    Package::new(category, name, "")
}

pub fn spec(package: Package, image: &str, steps: &[&str]) -> CompilationSpec {
    CompilationSpec::new(
        package,
        BuildDefinition {
            image: image.to_string(),
            steps: steps.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        },
    )
}

/// Compiler options writing into a fresh temporary directory
///
/// Returns (TempDir, options) - keep the TempDir alive to prevent cleanup.
pub fn compiler_options() -> (TempDir, CompilerOptions) {
    let dir = tempfile::tempdir().unwrap();
    let options = CompilerOptions {
        output_dir: dir.path().join("build"),
        concurrency: 2,
        ..Default::default()
    };
    (dir, options)
}

pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[derive(Default)]
struct State {
    local: BTreeMap<String, Rootfs>,
    remote: BTreeMap<String, Rootfs>,
    /// Images that show up locally after a number of existence checks
    delayed: BTreeMap<String, (usize, Rootfs)>,
    calls: Vec<String>,
}

/// In-process image backend
///
/// Dockerfiles are interpreted just enough for builds to produce real
/// filesystem differences: `FROM`, `COPY . <dir>`, single-file
/// `COPY --from`, `RUN echo <text> > <path>`, `RUN rm <path>` and
/// `RUN false`, which fails the build.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<State>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_local(&self, image: &str, files: &[(&str, &str)]) {
        self.state
            .lock()
            .unwrap()
            .local
            .insert(image.to_string(), to_rootfs(files));
    }

    pub fn seed_remote(&self, image: &str, files: &[(&str, &str)]) {
        self.state
            .lock()
            .unwrap()
            .remote
            .insert(image.to_string(), to_rootfs(files));
    }

    /// Make `image` appear locally on the `checks`-th existence check
    pub fn appear_after(&self, image: &str, checks: usize) {
        self.state
            .lock()
            .unwrap()
            .delayed
            .insert(image.to_string(), (checks, Rootfs::new()));
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of recorded calls of one kind, e.g. "build"
    pub fn count(&self, kind: &str) -> usize {
        let prefix = format!("{} ", kind);
        self.calls().iter().filter(|c| c.starts_with(&prefix)).count()
    }

    pub fn has_local(&self, image: &str) -> bool {
        self.state.lock().unwrap().local.contains_key(image)
    }

    pub fn local_files(&self, image: &str) -> Option<Rootfs> {
        self.state.lock().unwrap().local.get(image).cloned()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    /// `COPY --from=<image> <file> <dest>`, one file at a time
    fn copy_from_image(&self, rootfs: &mut Rootfs, args: &str) -> Result<()> {
        let parts: Vec<&str> = args.split_whitespace().collect();
        let [image, source, dest] = parts[..] else {
            return Err(failure(args, "malformed COPY --from"));
        };
        let from = self
            .local_files(image)
            .ok_or_else(|| failure(image, "no such image"))?;
        let source = source.trim_start_matches('/');
        let content = from
            .get(source)
            .ok_or_else(|| failure(source, "no such file"))?;

        let mut dest = dest.trim_start_matches('/').to_string();
        if dest.is_empty() || dest.ends_with('/') {
            dest.push_str(source.rsplit('/').next().unwrap_or(source));
        }
        rootfs.insert(dest, content.clone());
        Ok(())
    }
}

fn to_rootfs(files: &[(&str, &str)]) -> Rootfs {
    files
        .iter()
        .map(|(path, content)| (path.trim_start_matches('/').to_string(), content.to_string()))
        .collect()
}

fn failure(command: &str, stderr: &str) -> Error {
    Error::BackendFailure {
        command: command.to_string(),
        stderr: stderr.to_string(),
    }
}

fn copy_context(rootfs: &mut Rootfs, context: &Path, dest: &str) -> Result<()> {
    let prefix = dest.trim_matches('/');
    for entry in WalkDir::new(context) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(context)
            .map_err(|e| Error::IoError(e.to_string()))?
            .to_string_lossy()
            .into_owned();
        let key = if prefix.is_empty() {
            relative
        } else {
            format!("{}/{}", prefix, relative)
        };
        rootfs.insert(key, fs::read_to_string(entry.path()).unwrap_or_default());
    }
    Ok(())
}

fn run_step(rootfs: &mut Rootfs, command: &str) -> Result<()> {
    if command == "false" {
        return Err(failure(command, "exit status 1"));
    }
    if let Some(path) = command.strip_prefix("rm ") {
        rootfs.remove(path.trim().trim_start_matches('/'));
        return Ok(());
    }
    if let Some(rest) = command.strip_prefix("echo ") {
        if let Some((text, path)) = rest.split_once(" > ") {
            rootfs.insert(
                path.trim().trim_start_matches('/').to_string(),
                format!("{}\n", text),
            );
        }
    }
    Ok(())
}

impl ImageBackend for MockBackend {
    fn build_image(&self, opts: &ImageBuildOptions) -> Result<()> {
        self.record(format!("build {}", opts.image_name));
        let mut rootfs = Rootfs::new();

        for line in opts.dockerfile.lines() {
            if let Some(base) = line.strip_prefix("FROM ") {
                if base != "scratch" {
                    rootfs = self.local_files(base).unwrap_or_default();
                }
            } else if let Some(dest) = line.strip_prefix("COPY . ") {
                copy_context(&mut rootfs, &opts.context, dest)?;
            } else if let Some(args) = line.strip_prefix("COPY --from=") {
                self.copy_from_image(&mut rootfs, args)?;
            } else if let Some(command) = line.strip_prefix("RUN ") {
                run_step(&mut rootfs, command)?;
            }
        }

        self.state
            .lock()
            .unwrap()
            .local
            .insert(opts.image_name.clone(), rootfs);
        Ok(())
    }

    fn export_image(&self, image: &str, dest: &Path) -> Result<()> {
        self.record(format!("export {}", image));
        let rootfs = self
            .local_files(image)
            .ok_or_else(|| failure(image, "no such image"))?;
        fs::write(dest, serde_yaml::to_string(&rootfs)?)?;
        Ok(())
    }

    fn remove_image(&self, image: &str) -> Result<()> {
        self.record(format!("rmi {}", image));
        self.state.lock().unwrap().local.remove(image);
        Ok(())
    }

    fn download_image(&self, image: &str) -> Result<()> {
        self.record(format!("pull {}", image));
        let mut state = self.state.lock().unwrap();
        let rootfs = state
            .remote
            .get(image)
            .cloned()
            .ok_or_else(|| failure(image, "manifest unknown"))?;
        state.local.insert(image.to_string(), rootfs);
        Ok(())
    }

    fn push(&self, image: &str) -> Result<()> {
        self.record(format!("push {}", image));
        let mut state = self.state.lock().unwrap();
        let rootfs = state
            .local
            .get(image)
            .cloned()
            .ok_or_else(|| failure(image, "no such image"))?;
        state.remote.insert(image.to_string(), rootfs);
        Ok(())
    }

    fn image_available(&self, image: &str) -> bool {
        self.state.lock().unwrap().remote.contains_key(image)
    }

    fn image_exists(&self, image: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        let arrived = match state.delayed.get_mut(image) {
            Some((remaining, _)) => {
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            }
            None => false,
        };
        if arrived {
            if let Some((_, rootfs)) = state.delayed.remove(image) {
                state.local.insert(image.to_string(), rootfs);
            }
        }
        state.local.contains_key(image)
    }

    fn extract_rootfs(&self, image: &str, dest: &Path, _keep_perms: bool) -> Result<()> {
        self.record(format!("extract {}", image));
        let rootfs = self
            .local_files(image)
            .ok_or_else(|| failure(image, "no such image"))?;
        for (path, content) in rootfs {
            let target = dest.join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(target, content)?;
        }
        Ok(())
    }
}
