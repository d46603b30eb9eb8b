// src/compiler/spec.rs

//! Build recipes: the `build.yaml` half of a package definition
//!
//! A [`CompilationSpec`] pairs a package with its build definition. The
//! [`SpecRegistry`] indexes specs by fingerprint and produces the build-time
//! package database the compiler solves against, where `build.yaml`
//! requirements stand in for the runtime ones.

use crate::db::{MemoryDatabase, PackageDatabase};
use crate::error::{Error, Result};
use crate::hash;
use crate::package::Package;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Copy files from another image or package into the builder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyField {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<Package>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    pub source: String,
    pub destination: String,
}

/// Contents of a `build.yaml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildDefinition {
    /// Commands producing the package content (step image)
    pub steps: Vec<String>,
    /// Commands preparing the build environment (builder image)
    pub prelude: Vec<String>,
    /// Base image to build from
    pub image: String,
    /// Alternative name for `image`
    pub seed: String,
    /// Build-time requirements; replace the package's own when present
    pub requires: Vec<Package>,
    pub conflicts: Vec<Package>,
    /// `KEY=VALUE` pairs exported during both stages
    pub env: Vec<String>,
    /// URLs fetched into the build context
    pub retrieve: Vec<String>,
    /// Package the whole step rootfs instead of its delta
    pub unpack: bool,
    /// Regexes selecting which delta paths go into the artifact
    pub includes: Vec<String>,
    /// Regexes removing delta paths; wins over `includes`
    pub excludes: Vec<String>,
    /// Package only this directory of the step rootfs
    pub package_dir: String,
    pub copy: Vec<CopyField>,
    /// Packages whose artifacts are merged into the base image
    pub join: Vec<Package>,
}

/// A package together with the recipe that builds it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationSpec {
    pub package: Package,
    #[serde(flatten)]
    pub build: BuildDefinition,
}

impl CompilationSpec {
    pub fn new(package: Package, build: BuildDefinition) -> Self {
        Self { package, build }
    }

    /// Parse a `build.yaml` document for `package`
    pub fn from_build_yaml(package: Package, yaml: &str) -> Result<Self> {
        let build: BuildDefinition = serde_yaml::from_str(yaml)
            .map_err(|e| Error::ParseError(format!("{}: invalid build.yaml: {}", package, e)))?;
        Ok(Self::new(package, build))
    }

    /// Load `build.yaml` from a recipe directory
    ///
    /// The directory is recorded as the package path and used as the build
    /// context.
    pub fn load(mut package: Package, recipe_dir: &Path) -> Result<Self> {
        let yaml = fs::read_to_string(recipe_dir.join("build.yaml"))?;
        package.path = Some(recipe_dir.display().to_string());
        Self::from_build_yaml(package, &yaml)
    }

    pub fn fingerprint(&self) -> String {
        self.package.fingerprint()
    }

    /// Base image named by `image` or `seed`
    pub fn base_image(&self) -> Option<&str> {
        [&self.build.image, &self.build.seed]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(String::as_str)
    }

    /// Nothing to build: no steps, no base image and no requirements
    pub fn is_virtual(&self) -> bool {
        self.build.steps.is_empty()
            && self.base_image().is_none()
            && self.build_requires().is_empty()
            && self.build.join.is_empty()
    }

    /// Requirements used when solving the build tree
    pub fn build_requires(&self) -> &[Package] {
        if self.build.requires.is_empty() {
            &self.package.requires
        } else {
            &self.build.requires
        }
    }

    pub fn build_conflicts(&self) -> &[Package] {
        if self.build.conflicts.is_empty() {
            &self.package.conflicts
        } else {
            &self.build.conflicts
        }
    }

    /// The package as the build solver sees it
    pub fn build_package(&self) -> Package {
        let mut package = self.package.clone();
        package.requires = self.build_requires().to_vec();
        package.conflicts = self.build_conflicts().to_vec();
        package
    }

    /// Build context directory, when the recipe came from disk
    pub fn context_dir(&self) -> Option<PathBuf> {
        self.package.path.as_ref().map(PathBuf::from)
    }

    /// Stable digest of the build definition
    ///
    /// Any edit to the recipe changes it. It is mixed into every assertion
    /// hash so that recipe changes propagate to dependents.
    pub fn digest(&self) -> Result<String> {
        let encoded = serde_json::to_vec(&self.build)?;
        Ok(hash::sha256(&encoded))
    }

    /// Copy with machine-specific paths removed, for metadata sidecars
    pub fn portable(&self) -> Self {
        let mut spec = self.clone();
        spec.package.clear_path();
        spec
    }
}

/// Compilation specs indexed by fingerprint
#[derive(Debug, Clone, Default)]
pub struct SpecRegistry {
    specs: BTreeMap<String, CompilationSpec>,
    digests: BTreeMap<String, String>,
}

impl SpecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(specs: Vec<CompilationSpec>) -> Result<Self> {
        let mut registry = Self::new();
        for spec in specs {
            registry.add(spec)?;
        }
        Ok(registry)
    }

    /// Parse a YAML list of specs
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let specs: Vec<CompilationSpec> = serde_yaml::from_str(yaml)?;
        Self::from_specs(specs)
    }

    pub fn add(&mut self, spec: CompilationSpec) -> Result<()> {
        let fp = spec.fingerprint();
        if self.specs.contains_key(&fp) {
            return Err(Error::AlreadyExists(fp));
        }
        self.digests.insert(fp.clone(), spec.digest()?);
        self.specs.insert(fp, spec);
        Ok(())
    }

    pub fn get(&self, fingerprint: &str) -> Option<&CompilationSpec> {
        self.specs.get(fingerprint)
    }

    /// Look up the compilation spec for a package, failing if it has none
    pub fn spec_for(&self, package: &Package) -> Result<&CompilationSpec> {
        self.get(&package.fingerprint())
            .ok_or_else(|| Error::PackageNotFound(format!("no build spec for {}", package)))
    }

    /// Build-definition digest of a package, empty when it has no spec
    pub fn digest(&self, package: &Package) -> String {
        self.digests
            .get(&package.fingerprint())
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompilationSpec> {
        self.specs.values()
    }

    /// Package database with build-time relations
    pub fn database(&self) -> Result<MemoryDatabase> {
        let db = MemoryDatabase::new();
        for spec in self.specs.values() {
            db.create_package(&spec.build_package())?;
        }
        Ok(db)
    }
}
