// src/db/mod.rs

//! Package databases
//!
//! Two stores implement [`PackageDatabase`]: an in-memory index used for
//! definition trees and solver scratch state, and a SQLite store used for
//! installed-package state that survives restarts. Only the primitive
//! operations are required; lookups with selector and provides semantics
//! are provided on top of them.

pub mod memory;
pub mod schema;
pub mod sqlite;

use crate::error::{Error, Result};
use crate::package::{self, Package};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

pub use memory::MemoryDatabase;
pub use sqlite::SqliteDatabase;

/// Keyed store of packages, indexed by fingerprint
pub trait PackageDatabase: Send + Sync {
    /// Store a new package; fails with `AlreadyExists` on a duplicate fingerprint
    fn create_package(&self, package: &Package) -> Result<String>;

    /// Replace the stored record with the same fingerprint
    fn update_package(&self, package: &Package) -> Result<()>;

    /// Remove a package and its file list
    fn remove_package(&self, package: &Package) -> Result<()>;

    /// Exact fingerprint lookup
    fn get_package(&self, fingerprint: &str) -> Result<Package>;

    /// Every stored version of the package's category/name
    fn find_package_versions(&self, package: &Package) -> Result<Vec<Package>>;

    /// Packages declaring a `provides` entry that overlaps `selector`
    fn find_providers(&self, selector: &Package) -> Result<Vec<Package>>;

    /// All packages, in fingerprint order
    fn world(&self) -> Result<Vec<Package>>;

    fn get_package_files(&self, package: &Package) -> Result<Vec<String>>;

    fn set_package_files(&self, package: &Package, files: &[String]) -> Result<()>;

    /// Fingerprint → file list for every package with a recorded file list
    fn all_package_files(&self) -> Result<BTreeMap<String, Vec<String>>>;

    /// Drop every package and file entry
    fn clean(&self) -> Result<()>;

    /// Exact match on (category, name, version)
    fn find_package(&self, package: &Package) -> Result<Package> {
        self.get_package(&package.fingerprint())
    }

    /// Resolve a selector
    ///
    /// Providers of the selector replace the nominal name/version match;
    /// otherwise every stored version admitted by the selector is returned.
    fn find_packages(&self, selector: &Package) -> Result<Vec<Package>> {
        let providers = self.find_providers(selector)?;
        if !providers.is_empty() {
            return Ok(providers);
        }

        let mut found: Vec<Package> = self
            .find_package_versions(selector)?
            .into_iter()
            .filter(|candidate| selector.matches(candidate))
            .collect();
        found.sort_by(package::compare);
        Ok(found)
    }

    /// Highest matching version, relaxing to the selector itself on a miss
    fn find_package_candidate(&self, selector: &Package) -> Result<Package> {
        let found = self.find_packages(selector)?;
        Ok(package::best_version(&found)
            .cloned()
            .unwrap_or_else(|| selector.clone()))
    }

    /// Transitive reverse dependencies of `package`
    fn get_revdeps(&self, package: &Package) -> Result<Vec<Package>> {
        let world = self.world()?;
        let mut result: BTreeMap<String, Package> = BTreeMap::new();
        let mut queue = VecDeque::from([package.clone()]);
        let root = package.fingerprint();

        while let Some(current) = queue.pop_front() {
            for candidate in &world {
                let fp = candidate.fingerprint();
                if fp == root || result.contains_key(&fp) {
                    continue;
                }
                let depends = candidate
                    .requires
                    .iter()
                    .any(|r| r.matches(&current) || current.provides_for(r));
                if depends {
                    result.insert(fp, candidate.clone());
                    queue.push_back(candidate.clone());
                }
            }
        }

        Ok(result.into_values().collect())
    }

    /// Packages owning a file whose path matches `pattern`
    fn find_package_by_file(&self, pattern: &str) -> Result<Vec<Package>> {
        let re = Regex::new(pattern)
            .map_err(|e| Error::ParseError(format!("Invalid file pattern '{}': {}", pattern, e)))?;

        let mut owners = BTreeSet::new();
        for (fingerprint, files) in self.all_package_files()? {
            if files.iter().any(|f| re.is_match(f)) {
                owners.insert(fingerprint);
            }
        }

        owners.iter().map(|fp| self.get_package(fp)).collect()
    }

    /// Packages carrying a label with the given key
    fn find_package_label(&self, key: &str) -> Result<Vec<Package>> {
        Ok(self
            .world()?
            .into_iter()
            .filter(|p| p.labels.contains_key(key))
            .collect())
    }

    /// Packages whose label `key` equals `value`
    fn find_packages_by_label(&self, key: &str, value: &str) -> Result<Vec<Package>> {
        Ok(self
            .world()?
            .into_iter()
            .filter(|p| p.labels.get(key).is_some_and(|v| v == value))
            .collect())
    }

    /// Copy every package (and its file list) into `other`
    fn clone_into(&self, other: &dyn PackageDatabase) -> Result<()> {
        let files = self.all_package_files()?;
        for package in self.world()? {
            match other.create_package(&package) {
                Ok(_) => {}
                Err(Error::AlreadyExists(_)) => other.update_package(&package)?,
                Err(e) => return Err(e),
            }
            if let Some(list) = files.get(&package.fingerprint()) {
                other.set_package_files(&package, list)?;
            }
        }
        Ok(())
    }

    /// Whether the database holds no rules at all (no requires, no conflicts)
    fn is_rule_free(&self) -> Result<bool> {
        Ok(self.world()?.iter().all(|p| !p.has_relations()))
    }
}
