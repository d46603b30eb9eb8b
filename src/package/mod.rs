// src/package/mod.rs

//! Package identity and relations
//!
//! A [`Package`] is either concrete (`version` is a plain version) or a
//! selector (`version` is a predicate such as `>=1.0`). Relations
//! (`requires`, `conflicts`, `provides`) are stored as unresolved selectors
//! and only resolved against a database when formulas are built.

pub mod formula;

use crate::db::PackageDatabase;
use crate::error::Result;
use crate::hash;
use crate::version::{self, VersionOp, VersionSelector};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

pub use formula::build_formula;

/// A package or package selector
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Package {
    pub category: String,
    pub name: String,
    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<Package>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<Package>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Package>,

    /// Recipe directory this package was loaded from, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Package {
    pub fn new(category: &str, name: &str, version: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            ..Default::default()
        }
    }

    pub fn with_requires(mut self, requires: Vec<Package>) -> Self {
        self.requires = requires;
        self
    }

    pub fn with_conflicts(mut self, conflicts: Vec<Package>) -> Self {
        self.conflicts = conflicts;
        self
    }

    pub fn with_provides(mut self, provides: Vec<Package>) -> Self {
        self.provides = provides;
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Canonical `category/name-version` identifier
    pub fn fingerprint(&self) -> String {
        format!("{}/{}-{}", self.category, self.name, self.version)
    }

    /// `category/name`, shared by every version of the package
    pub fn package_name(&self) -> String {
        format!("{}/{}", self.category, self.name)
    }

    /// Fingerprint mixed with a salt (usually the hash of the enclosing solution)
    pub fn hash_fingerprint(&self, salt: &str) -> String {
        hash::sha256(format!("{}-{}", self.fingerprint(), salt).as_bytes())
    }

    /// Parse the version field as a selector
    pub fn selector(&self) -> Result<VersionSelector> {
        VersionSelector::parse(&self.version)
    }

    /// Whether the version field is a predicate rather than a concrete version
    pub fn is_selector(&self) -> bool {
        match self.selector() {
            Ok(sel) => sel.op != VersionOp::Equal,
            Err(_) => false,
        }
    }

    pub fn has_relations(&self) -> bool {
        !self.requires.is_empty() || !self.conflicts.is_empty()
    }

    pub fn same_name(&self, other: &Package) -> bool {
        self.category == other.category && self.name == other.name
    }

    /// Selector semantics: `other` has the same name and a version this
    /// package's version admits
    pub fn matches(&self, other: &Package) -> bool {
        if !self.same_name(other) {
            return false;
        }
        self.version == other.version || version::admit(&self.version, &other.version)
    }

    /// Whether two selectors of the same name can be satisfied by a common version
    pub fn overlaps(&self, other: &Package) -> bool {
        self.matches(other) || other.matches(self)
    }

    /// Whether this package declares a `provides` entry overlapping `selector`
    pub fn provides_for(&self, selector: &Package) -> bool {
        self.provides.iter().any(|p| p.overlaps(selector))
    }

    /// All database entries of the same category/name admitted by this selector
    pub fn expand(&self, db: &dyn PackageDatabase) -> Result<Vec<Package>> {
        let mut found: Vec<Package> = db
            .find_package_versions(self)?
            .into_iter()
            .filter(|candidate| self.matches(candidate))
            .collect();
        found.sort_by(compare);
        Ok(found)
    }

    /// Drop the recipe path, which is machine specific
    pub fn clear_path(&mut self) {
        self.path = None;
        for rel in self
            .requires
            .iter_mut()
            .chain(self.conflicts.iter_mut())
            .chain(self.provides.iter_mut())
        {
            rel.path = None;
        }
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint())
    }
}

/// Order packages by name, then by version, then by fingerprint
pub fn compare(a: &Package, b: &Package) -> Ordering {
    a.package_name()
        .cmp(&b.package_name())
        .then_with(|| version::compare_versions(&a.version, &b.version))
        .then_with(|| a.fingerprint().cmp(&b.fingerprint()))
}

/// Pick the highest version out of a candidate list
pub fn best_version(candidates: &[Package]) -> Option<&Package> {
    candidates.iter().max_by(|a, b| {
        version::compare_versions(&a.version, &b.version)
            .then_with(|| b.fingerprint().cmp(&a.fingerprint()))
    })
}
