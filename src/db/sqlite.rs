// src/db/sqlite.rs

//! Persistent package store backed by SQLite
//!
//! Every operation runs in its own transaction on a single connection
//! guarded by a mutex.

use super::{schema, PackageDatabase};
use crate::error::{Error, Result};
use crate::package::Package;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    /// Open (creating if needed) a database file and apply migrations
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        debug!("Opening package database at {}", path.display());
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory SQLite database, mostly for tests
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::DatabaseError("connection lock poisoned".to_string()))
    }

    fn insert(tx: &Transaction<'_>, package: &Package) -> Result<()> {
        let record = serde_json::to_string(package)?;
        tx.execute(
            "INSERT INTO packages (fingerprint, category, name, version, record)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                package.fingerprint(),
                package.category,
                package.name,
                package.version,
                record
            ],
        )?;
        for provided in &package.provides {
            tx.execute(
                "INSERT INTO provides (fingerprint, category, name) VALUES (?1, ?2, ?3)",
                params![package.fingerprint(), provided.category, provided.name],
            )?;
        }
        Ok(())
    }

    fn exists(tx: &Transaction<'_>, fingerprint: &str) -> Result<bool> {
        Ok(tx
            .query_row(
                "SELECT 1 FROM packages WHERE fingerprint = ?1",
                [fingerprint],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    fn query_packages(conn: &Connection, sql: &str, args: &[&str]) -> Result<Vec<Package>> {
        let mut stmt = conn.prepare(sql)?;
        let records = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), |row| {
                row.get::<_, String>(0)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        records
            .iter()
            .map(|r| serde_json::from_str(r).map_err(Error::from))
            .collect()
    }
}

impl PackageDatabase for SqliteDatabase {
    fn create_package(&self, package: &Package) -> Result<String> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let fingerprint = package.fingerprint();
        if Self::exists(&tx, &fingerprint)? {
            return Err(Error::AlreadyExists(fingerprint));
        }
        Self::insert(&tx, package)?;
        tx.commit()?;
        Ok(fingerprint)
    }

    fn update_package(&self, package: &Package) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let fingerprint = package.fingerprint();
        if !Self::exists(&tx, &fingerprint)? {
            return Err(Error::PackageNotFound(fingerprint));
        }
        tx.execute("DELETE FROM provides WHERE fingerprint = ?1", [&fingerprint])?;
        tx.execute(
            "UPDATE packages SET record = ?2 WHERE fingerprint = ?1",
            params![fingerprint, serde_json::to_string(package)?],
        )?;
        for provided in &package.provides {
            tx.execute(
                "INSERT INTO provides (fingerprint, category, name) VALUES (?1, ?2, ?3)",
                params![fingerprint, provided.category, provided.name],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn remove_package(&self, package: &Package) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let fingerprint = package.fingerprint();
        let removed = tx.execute("DELETE FROM packages WHERE fingerprint = ?1", [&fingerprint])?;
        if removed == 0 {
            return Err(Error::PackageNotFound(fingerprint));
        }
        tx.commit()?;
        Ok(())
    }

    fn get_package(&self, fingerprint: &str) -> Result<Package> {
        let conn = self.lock()?;
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM packages WHERE fingerprint = ?1",
                [fingerprint],
                |row| row.get(0),
            )
            .optional()?;
        match record {
            Some(r) => Ok(serde_json::from_str(&r)?),
            None => Err(Error::PackageNotFound(fingerprint.to_string())),
        }
    }

    fn find_package_versions(&self, package: &Package) -> Result<Vec<Package>> {
        let conn = self.lock()?;
        Self::query_packages(
            &conn,
            "SELECT record FROM packages WHERE category = ?1 AND name = ?2 ORDER BY fingerprint",
            &[package.category.as_str(), package.name.as_str()],
        )
    }

    fn find_providers(&self, selector: &Package) -> Result<Vec<Package>> {
        let conn = self.lock()?;
        let candidates = Self::query_packages(
            &conn,
            "SELECT DISTINCT p.record FROM packages p
             JOIN provides v ON v.fingerprint = p.fingerprint
             WHERE v.category = ?1 AND v.name = ?2
             ORDER BY p.fingerprint",
            &[selector.category.as_str(), selector.name.as_str()],
        )?;
        Ok(candidates
            .into_iter()
            .filter(|p| p.provides_for(selector))
            .collect())
    }

    fn world(&self) -> Result<Vec<Package>> {
        let conn = self.lock()?;
        Self::query_packages(&conn, "SELECT record FROM packages ORDER BY fingerprint", &[])
    }

    fn get_package_files(&self, package: &Package) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT path FROM files WHERE fingerprint = ?1 ORDER BY path")?;
        let files = stmt
            .query_map([package.fingerprint()], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(files)
    }

    fn set_package_files(&self, package: &Package, files: &[String]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let fingerprint = package.fingerprint();
        if !Self::exists(&tx, &fingerprint)? {
            return Err(Error::PackageNotFound(fingerprint));
        }
        tx.execute("DELETE FROM files WHERE fingerprint = ?1", [&fingerprint])?;
        {
            let mut stmt =
                tx.prepare("INSERT OR IGNORE INTO files (fingerprint, path) VALUES (?1, ?2)")?;
            for file in files {
                stmt.execute(params![fingerprint, file])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn all_package_files(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT fingerprint, path FROM files ORDER BY fingerprint, path")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (fingerprint, path) in rows {
            map.entry(fingerprint).or_default().push(path);
        }
        Ok(map)
    }

    fn clean(&self) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute_batch("DELETE FROM files; DELETE FROM provides; DELETE FROM packages;")?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_find() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let p = Package::new("app", "a", "1.0").with_requires(vec![Package::new("lib", "b", ">=1")]);
        db.create_package(&p).unwrap();

        assert_eq!(db.find_package(&p).unwrap(), p);
        assert!(matches!(db.create_package(&p), Err(Error::AlreadyExists(_))));
        assert!(matches!(
            db.get_package("app/missing-1"),
            Err(Error::PackageNotFound(_))
        ));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("packages.db");
        {
            let db = SqliteDatabase::open(&path).unwrap();
            db.create_package(&Package::new("a", "a", "1.0")).unwrap();
            db.set_package_files(&Package::new("a", "a", "1.0"), &["/etc/a.conf".to_string()])
                .unwrap();
        }

        let db = SqliteDatabase::open(&path).unwrap();
        assert_eq!(db.world().unwrap().len(), 1);
        assert_eq!(
            db.find_package_by_file(r"\.conf$").unwrap()[0].fingerprint(),
            "a/a-1.0"
        );
    }

    #[test]
    fn test_providers_and_selectors() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        for v in ["1.0", "1.1", "1.3"] {
            db.create_package(&Package::new("a", "a", v)).unwrap();
        }
        assert_eq!(
            db.find_package_candidate(&Package::new("a", "a", ">=1.0"))
                .unwrap()
                .version,
            "1.3"
        );

        let z = Package::new("a", "z", "1.0").with_provides(vec![Package::new("a", "a", "")]);
        db.create_package(&z).unwrap();
        assert_eq!(db.find_packages(&Package::new("a", "a", "")).unwrap(), vec![z]);
    }

    #[test]
    fn test_remove_cascades_files() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let p = Package::new("a", "a", "1.0");
        db.create_package(&p).unwrap();
        db.set_package_files(&p, &["/x".to_string(), "/y".to_string()])
            .unwrap();
        assert_eq!(db.get_package_files(&p).unwrap(), vec!["/x", "/y"]);

        db.remove_package(&p).unwrap();
        assert!(db.all_package_files().unwrap().is_empty());
        assert!(db.remove_package(&p).is_err());
    }

    #[test]
    fn test_clone_into_memory() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.create_package(&Package::new("a", "a", "1.0")).unwrap();
        let mem = crate::db::MemoryDatabase::new();
        db.clone_into(&mem).unwrap();
        assert_eq!(mem.world().unwrap(), db.world().unwrap());
    }
}
