// src/artifact/mod.rs

//! Package artifacts: compressed tarballs plus a metadata sidecar
//!
//! An artifact is written as `<category>-<name>-<version>.package.tar`
//! followed by the codec extension, with its SHA-256 recorded in the
//! sidecar `<category>-<name>-<version>.metadata.yaml`.
//!
//! Unpacking never overwrites a regular file whose content differs from the
//! incoming one. The incoming file lands next to it as `._cfgNNNN_<name>`
//! instead, with `NNNN` the smallest free number starting at 0001.

mod extract;

pub use extract::{DeltaFilter, extract_from_delta, package_rootfs};

use crate::backend::{ImageBackend, ImageBuildOptions};
use crate::compiler::CompilationSpec;
use crate::compression::{self, CompressionType};
use crate::error::{Error, Result};
use crate::hash::{self, Checksums};
use crate::package::Package;
use crate::solver::AssertionList;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info, warn};

/// Suffix of an uncompressed artifact
pub const ARTIFACT_SUFFIX: &str = ".package.tar";
/// Suffix of a metadata sidecar
pub const METADATA_SUFFIX: &str = ".metadata.yaml";

/// Marker created in empty images so runtimes accept them
const VIRTUAL_MARKER: &str = ".virtual";

/// `<category>-<name>-<version>`
pub fn artifact_stem(package: &Package) -> String {
    format!("{}-{}-{}", package.category, package.name, package.version)
}

/// Uncompressed artifact file name for a package
pub fn artifact_name(package: &Package) -> String {
    format!("{}{}", artifact_stem(package), ARTIFACT_SUFFIX)
}

/// A built package archive and what it was built from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageArtifact {
    pub path: PathBuf,
    #[serde(default)]
    pub compression_type: CompressionType,
    #[serde(default)]
    pub checksums: Checksums,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile_spec: Option<CompilationSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<PackageArtifact>,
    #[serde(default, skip_serializing_if = "AssertionList::is_empty")]
    pub source_assertion: AssertionList,
}

impl PackageArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let compression_type = CompressionType::from_extension(&path.to_string_lossy());
        Self {
            path,
            compression_type,
            ..Default::default()
        }
    }

    /// Artifact for `package` under `dir`, not yet written
    pub fn for_package(dir: &Path, package: &Package, compression: CompressionType) -> Self {
        let mut artifact = Self::new(dir.join(artifact_name(package)));
        artifact.compression_type = compression;
        artifact
    }

    pub fn with_spec(mut self, spec: CompilationSpec) -> Self {
        self.compile_spec = Some(spec);
        self
    }

    /// Tar `src_dir` and compress it into this artifact's path
    ///
    /// The path gains the codec extension; the intermediate tarball is
    /// removed. Checksums and the file list are refreshed.
    pub fn compress(&mut self, src_dir: &Path, concurrency: usize) -> Result<()> {
        let tar_path = self.tar_path();
        if let Some(parent) = tar_path.parent() {
            fs::create_dir_all(parent)?;
        }

        {
            let file = BufWriter::new(File::create(&tar_path)?);
            let mut builder = tar::Builder::new(file);
            builder.follow_symlinks(false);
            builder.append_dir_all(".", src_dir)?;
            io::Write::flush(&mut builder.into_inner()?)?;
        }

        if self.compression_type == CompressionType::None {
            self.path = tar_path;
        } else {
            let final_path = PathBuf::from(format!(
                "{}{}",
                tar_path.display(),
                self.compression_type.extension()
            ));
            let mut input = BufReader::new(File::open(&tar_path)?);
            let output = BufWriter::new(File::create(&final_path)?);
            let mut output = compression::compress(
                &mut input,
                output,
                self.compression_type,
                concurrency,
            )?;
            io::Write::flush(&mut output)?;
            fs::remove_file(&tar_path)?;
            self.path = final_path;
        }

        self.checksums = Checksums::generate(&self.path)?;
        self.files = self.file_list()?;
        info!(
            "Wrote artifact {} ({}, {} files)",
            self.path.display(),
            self.compression_type,
            self.files.len()
        );
        Ok(())
    }

    /// Path of the uncompressed tarball
    fn tar_path(&self) -> PathBuf {
        let raw = self.path.to_string_lossy();
        let base = raw
            .strip_suffix(self.compression_type.extension())
            .filter(|_| self.compression_type != CompressionType::None)
            .unwrap_or(raw.as_ref());
        PathBuf::from(base)
    }

    fn open(&self) -> Result<tar::Archive<Box<dyn Read + '_>>> {
        let file = BufReader::new(File::open(&self.path).map_err(|e| {
            Error::IoError(format!("Failed to open artifact {}: {}", self.path.display(), e))
        })?);
        let decoder = compression::create_decoder(file, self.compression_type)?;
        Ok(tar::Archive::new(decoder))
    }

    /// Every non-directory entry in the archive
    pub fn file_list(&self) -> Result<Vec<String>> {
        let mut archive = self.open()?;
        let mut files = Vec::new();
        for entry in archive.entries()? {
            let entry = entry?;
            if entry.header().entry_type().is_dir() {
                continue;
            }
            files.push(entry.path()?.to_string_lossy().into_owned());
        }
        Ok(files)
    }

    /// SHA-256 of the artifact file
    pub fn hash(&self) -> Result<String> {
        hash::hash_file(&self.path)
    }

    /// Compare the artifact file against its recorded checksums
    pub fn verify(&self) -> Result<()> {
        let current = Checksums::generate(&self.path)?;
        self.checksums
            .compare(&current)
            .map_err(|(expected, actual)| Error::ChecksumMismatch {
                path: self.path.display().to_string(),
                expected,
                actual,
            })
    }

    /// Unpack into `dst`, protecting differing existing files
    pub fn unpack(&self, dst: &Path, keep_perms: bool) -> Result<()> {
        fs::create_dir_all(dst)?;
        let mut archive = self.open()?;
        archive.set_preserve_permissions(keep_perms);
        archive.set_overwrite(true);

        for entry in archive.entries()? {
            let mut entry = entry?;
            let relative = entry.path()?.into_owned();
            if relative
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::RootDir))
            {
                warn!("Skipping unsafe archive entry {}", relative.display());
                continue;
            }

            let target = dst.join(&relative);
            let is_file = entry.header().entry_type().is_file();
            if is_file && target.is_file() {
                protect_existing(&mut entry, &target, keep_perms)?;
                continue;
            }
            entry.unpack_in(dst)?;
        }

        debug!("Unpacked {} into {}", self.path.display(), dst.display());
        Ok(())
    }

    /// Sidecar file name
    pub fn metadata_name(&self) -> String {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = name.split(ARTIFACT_SUFFIX).next().unwrap_or(&name).to_string();
        format!("{}{}", stem, METADATA_SUFFIX)
    }

    /// Copy safe to publish: relative path, no recipe locations
    pub fn portable(&self) -> Self {
        let mut artifact = self.clone();
        if let Some(name) = self.path.file_name() {
            artifact.path = PathBuf::from(name);
        }
        artifact.compile_spec = self.compile_spec.as_ref().map(CompilationSpec::portable);
        for assertion in artifact.source_assertion.iter_mut() {
            assertion.package.clear_path();
        }
        artifact.dependencies = self.dependencies.iter().map(Self::portable).collect();
        artifact
    }

    /// Write the metadata sidecar into `dir`, returning its path
    pub fn write_yaml(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(self.metadata_name());
        let yaml = serde_yaml::to_string(&self.portable())?;
        fs::write(&path, yaml)?;
        debug!("Wrote metadata {}", path.display());
        Ok(path)
    }

    /// Load a sidecar; the artifact path is resolved next to it
    pub fn load_yaml(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut artifact: Self = serde_yaml::from_str(&content)?;
        if artifact.path.is_relative() {
            if let Some(dir) = path.parent() {
                artifact.path = dir.join(&artifact.path);
            }
        }
        Ok(artifact)
    }

    /// Build an image holding exactly this artifact's content
    pub fn generate_final_image(
        &self,
        image_name: &str,
        backend: &dyn ImageBackend,
        keep_perms: bool,
    ) -> Result<()> {
        let rootfs = TempDir::new()?;
        self.unpack(rootfs.path(), keep_perms)?;
        build_scratch_image(rootfs.path(), image_name, backend)
    }
}

/// Build a `FROM scratch` image whose filesystem is `dir`
pub fn build_scratch_image(dir: &Path, image_name: &str, backend: &dyn ImageBackend) -> Result<()> {
    let empty = fs::read_dir(dir)?.next().is_none();
    if empty {
        File::create(dir.join(VIRTUAL_MARKER))?;
    }

    backend.build_image(&ImageBuildOptions {
        image_name: image_name.to_string(),
        dockerfile: "FROM scratch\nCOPY . /\n".to_string(),
        context: dir.to_path_buf(),
    })
}

/// Smallest free `._cfgNNNN_<name>` next to `target`
fn config_protect_path(target: &Path) -> Result<PathBuf> {
    let dir = target
        .parent()
        .ok_or_else(|| Error::IoError(format!("{} has no parent", target.display())))?;
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    for n in 1..=9999 {
        let candidate = dir.join(format!("._cfg{:04}_{}", n, name));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(Error::IoError(format!(
        "No free config protection slot for {}",
        target.display()
    )))
}

/// Land an entry beside an existing file when their contents differ
fn protect_existing<R: Read>(
    entry: &mut tar::Entry<'_, R>,
    target: &Path,
    keep_perms: bool,
) -> Result<()> {
    let dir = target
        .parent()
        .ok_or_else(|| Error::IoError(format!("{} has no parent", target.display())))?;
    let mut incoming = NamedTempFile::new_in(dir)?;
    io::copy(entry, &mut incoming)?;

    if hash::hash_file(incoming.path())? == hash::hash_file(target)? {
        return Ok(());
    }

    let protected = config_protect_path(target)?;
    if keep_perms {
        let mode = entry.header().mode()?;
        fs::set_permissions(incoming.path(), fs::Permissions::from_mode(mode))?;
    }
    incoming
        .persist(&protected)
        .map_err(|e| Error::IoError(format!("Failed to write {}: {}", protected.display(), e)))?;
    info!(
        "Protected {}, new version written to {}",
        target.display(),
        protected.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        fs::write(dir.path().join("etc/app.conf"), "setting=1\n").unwrap();
        fs::write(dir.path().join("test"), "foo\n").unwrap();
        dir
    }

    fn packed(compression: CompressionType) -> (TempDir, PackageArtifact) {
        let out = TempDir::new().unwrap();
        let src = sample_tree();
        let mut artifact =
            PackageArtifact::for_package(out.path(), &Package::new("app", "a", "1.0"), compression);
        artifact.compress(src.path(), 2).unwrap();
        (out, artifact)
    }

    #[test]
    fn test_artifact_naming() {
        let (_out, artifact) = packed(CompressionType::Gzip);
        let name = artifact.path.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name, "app-a-1.0.package.tar.gz");
        assert_eq!(artifact.metadata_name(), "app-a-1.0.metadata.yaml");
        assert!(!artifact.path.with_extension("").exists());
    }

    #[test]
    fn test_file_list_skips_directories() {
        let (_out, artifact) = packed(CompressionType::Zstd);
        let mut files = artifact.files.clone();
        files.sort();
        assert_eq!(files, vec!["etc/app.conf", "test"]);
    }

    #[test]
    fn test_verify_detects_tampering() {
        let (_out, artifact) = packed(CompressionType::None);
        artifact.verify().unwrap();
        assert_eq!(artifact.hash().unwrap(), artifact.checksums.get(hash::SHA256).unwrap());

        fs::write(&artifact.path, b"garbage").unwrap();
        assert!(matches!(
            artifact.verify(),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_config_protection_numbering() {
        let (_out, artifact) = packed(CompressionType::Gzip);
        let dst = TempDir::new().unwrap();
        fs::create_dir_all(dst.path().join("etc")).unwrap();
        fs::write(dst.path().join("etc/app.conf"), "setting=local\n").unwrap();

        artifact.unpack(dst.path(), false).unwrap();
        artifact.unpack(dst.path(), false).unwrap();

        let etc = dst.path().join("etc");
        assert_eq!(fs::read_to_string(etc.join("app.conf")).unwrap(), "setting=local\n");
        assert_eq!(
            fs::read_to_string(etc.join("._cfg0001_app.conf")).unwrap(),
            "setting=1\n"
        );
        assert!(etc.join("._cfg0002_app.conf").exists());
        // Identical files are left alone
        assert!(!dst.path().join("._cfg0001_test").exists());
    }

    #[test]
    fn test_write_and_load_yaml() {
        let (out, mut artifact) = packed(CompressionType::Gzip);
        let mut pkg = Package::new("app", "a", "1.0");
        pkg.path = Some("/home/me/recipes/a".to_string());
        artifact.compile_spec = Some(CompilationSpec::new(pkg, Default::default()));

        let meta = artifact.write_yaml(out.path()).unwrap();
        let yaml = fs::read_to_string(&meta).unwrap();
        assert!(!yaml.contains("/home/me"));

        let loaded = PackageArtifact::load_yaml(&meta).unwrap();
        assert_eq!(loaded.path, artifact.path);
        assert_eq!(loaded.checksums, artifact.checksums);
        loaded.verify().unwrap();
    }
}
