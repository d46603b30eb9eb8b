// src/db/memory.rs

//! In-memory package index
//!
//! Writers take the single write lock; readers share the read lock and never
//! observe a partially applied write.

use super::PackageDatabase;
use crate::error::{Error, Result};
use crate::package::Package;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Index {
    /// fingerprint → package
    packages: BTreeMap<String, Package>,
    /// category/name → fingerprints
    by_name: BTreeMap<String, BTreeSet<String>>,
    /// provided category/name → provider fingerprints
    provides: BTreeMap<String, BTreeSet<String>>,
    /// fingerprint → files
    files: BTreeMap<String, Vec<String>>,
}

impl Index {
    fn insert(&mut self, package: &Package) -> String {
        let fingerprint = package.fingerprint();
        self.by_name
            .entry(package.package_name())
            .or_default()
            .insert(fingerprint.clone());
        for provided in &package.provides {
            self.provides
                .entry(provided.package_name())
                .or_default()
                .insert(fingerprint.clone());
        }
        self.packages.insert(fingerprint.clone(), package.clone());
        fingerprint
    }

    fn remove(&mut self, fingerprint: &str) -> Option<Package> {
        let package = self.packages.remove(fingerprint)?;
        if let Some(set) = self.by_name.get_mut(&package.package_name()) {
            set.remove(fingerprint);
            if set.is_empty() {
                self.by_name.remove(&package.package_name());
            }
        }
        for provided in &package.provides {
            if let Some(set) = self.provides.get_mut(&provided.package_name()) {
                set.remove(fingerprint);
                if set.is_empty() {
                    self.provides.remove(&provided.package_name());
                }
            }
        }
        Some(package)
    }
}

/// Package database held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    index: RwLock<Index>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a database from a list of packages
    pub fn from_packages(packages: &[Package]) -> Result<Self> {
        let db = Self::new();
        for p in packages {
            db.create_package(p)?;
        }
        Ok(db)
    }

    pub fn len(&self) -> usize {
        self.read().map(|i| i.packages.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Index>> {
        self.index
            .read()
            .map_err(|_| Error::DatabaseError("package index lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Index>> {
        self.index
            .write()
            .map_err(|_| Error::DatabaseError("package index lock poisoned".to_string()))
    }
}

impl PackageDatabase for MemoryDatabase {
    fn create_package(&self, package: &Package) -> Result<String> {
        let mut index = self.write()?;
        let fingerprint = package.fingerprint();
        if index.packages.contains_key(&fingerprint) {
            return Err(Error::AlreadyExists(fingerprint));
        }
        Ok(index.insert(package))
    }

    fn update_package(&self, package: &Package) -> Result<()> {
        let mut index = self.write()?;
        let fingerprint = package.fingerprint();
        if index.remove(&fingerprint).is_none() {
            return Err(Error::PackageNotFound(fingerprint));
        }
        index.insert(package);
        Ok(())
    }

    fn remove_package(&self, package: &Package) -> Result<()> {
        let mut index = self.write()?;
        let fingerprint = package.fingerprint();
        index.files.remove(&fingerprint);
        index
            .remove(&fingerprint)
            .map(|_| ())
            .ok_or(Error::PackageNotFound(fingerprint))
    }

    fn get_package(&self, fingerprint: &str) -> Result<Package> {
        self.read()?
            .packages
            .get(fingerprint)
            .cloned()
            .ok_or_else(|| Error::PackageNotFound(fingerprint.to_string()))
    }

    fn find_package_versions(&self, package: &Package) -> Result<Vec<Package>> {
        let index = self.read()?;
        Ok(index
            .by_name
            .get(&package.package_name())
            .into_iter()
            .flatten()
            .filter_map(|fp| index.packages.get(fp).cloned())
            .collect())
    }

    fn find_providers(&self, selector: &Package) -> Result<Vec<Package>> {
        let index = self.read()?;
        Ok(index
            .provides
            .get(&selector.package_name())
            .into_iter()
            .flatten()
            .filter_map(|fp| index.packages.get(fp))
            .filter(|p| p.provides_for(selector))
            .cloned()
            .collect())
    }

    fn world(&self) -> Result<Vec<Package>> {
        Ok(self.read()?.packages.values().cloned().collect())
    }

    fn get_package_files(&self, package: &Package) -> Result<Vec<String>> {
        Ok(self
            .read()?
            .files
            .get(&package.fingerprint())
            .cloned()
            .unwrap_or_default())
    }

    fn set_package_files(&self, package: &Package, files: &[String]) -> Result<()> {
        self.write()?
            .files
            .insert(package.fingerprint(), files.to_vec());
        Ok(())
    }

    fn all_package_files(&self) -> Result<BTreeMap<String, Vec<String>>> {
        Ok(self.read()?.files.clone())
    }

    fn clean(&self) -> Result<()> {
        *self.write()? = Index::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_rejects_duplicates() {
        let db = MemoryDatabase::new();
        let p = Package::new("a", "a", "1.0");
        assert_eq!(db.create_package(&p).unwrap(), "a/a-1.0");
        assert!(matches!(
            db.create_package(&p),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_update_replaces_record() {
        let db = MemoryDatabase::new();
        let p = Package::new("a", "a", "1.0");
        db.create_package(&p).unwrap();

        let updated = p.clone().with_label("k", "v");
        db.update_package(&updated).unwrap();
        assert_eq!(db.find_package(&p).unwrap(), updated);

        assert!(db.update_package(&Package::new("z", "z", "1")).is_err());
    }

    #[test]
    fn test_remove_drops_indexes() {
        let db = MemoryDatabase::new();
        let z = Package::new("a", "z", "1.0").with_provides(vec![Package::new("a", "y", "")]);
        db.create_package(&z).unwrap();
        db.set_package_files(&z, &["/bin/z".to_string()]).unwrap();

        db.remove_package(&z).unwrap();
        assert!(db.is_empty());
        assert!(db.find_providers(&Package::new("a", "y", "")).unwrap().is_empty());
        assert!(db.all_package_files().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_readers() {
        let db = MemoryDatabase::new();
        for i in 0..50 {
            db.create_package(&Package::new("c", "p", &format!("1.{}", i)))
                .unwrap();
        }

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let found = db.find_packages(&Package::new("c", "p", ">=1.25")).unwrap();
                    assert_eq!(found.len(), 25);
                });
            }
        });
    }

    #[test]
    fn test_clean() {
        let db = MemoryDatabase::from_packages(&[Package::new("a", "a", "1")]).unwrap();
        db.clean().unwrap();
        assert!(db.world().unwrap().is_empty());
    }
}
