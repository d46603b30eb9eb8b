// src/config.rs
//! Configuration file parsing
//!
//! TOML configuration with the following sections:
//! - [general] - Log level
//! - [database] - Persistent package store location
//! - [solver] - Formula construction and unsat recovery
//! - [compiler] - Image repositories, caching, artifact output
//!
//! `KILN_CONCURRENCY` and `KILN_PUSH_REPO` override the file.

use crate::compiler::CompilerOptions;
use crate::db::{MemoryDatabase, PackageDatabase, SqliteDatabase};
use crate::solver::SolverOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Overrides every concurrency setting
pub const ENV_CONCURRENCY: &str = "KILN_CONCURRENCY";
/// Overrides the push image repository
pub const ENV_PUSH_REPO: &str = "KILN_PUSH_REPO";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralSection,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub solver: SolverOptions,
    #[serde(default)]
    pub compiler: CompilerOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralSection {
    /// Default tracing filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Where installed packages are recorded
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file; the in-memory store is used when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn open(&self) -> crate::Result<Box<dyn PackageDatabase>> {
        match &self.path {
            Some(path) => {
                debug!("Opening package database {}", path.display());
                Ok(Box::new(SqliteDatabase::open(path)?))
            }
            None => Ok(Box::new(MemoryDatabase::new())),
        }
    }
}

impl Config {
    /// Load and validate a configuration file, then apply the environment
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus the environment
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_CONCURRENCY) {
            let concurrency: usize = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: {}", ENV_CONCURRENCY, value))?;
            self.solver.concurrency = concurrency;
            self.compiler.concurrency = concurrency;
        }
        if let Some(repo) = lookup(ENV_PUSH_REPO) {
            self.compiler.push_image_repository = repo;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.solver.concurrency == 0 {
            anyhow::bail!("solver.concurrency must be at least 1");
        }
        if self.compiler.concurrency == 0 {
            anyhow::bail!("compiler.concurrency must be at least 1");
        }

        let q = &self.solver.qlearning;
        if !(q.learning_rate > 0.0 && q.learning_rate <= 1.0) {
            anyhow::bail!(
                "solver.qlearning.learning_rate must be in (0, 1], got {}",
                q.learning_rate
            );
        }
        if !(0.0..=1.0).contains(&q.discount) {
            anyhow::bail!("solver.qlearning.discount must be in [0, 1], got {}", q.discount);
        }
        if !(0.0..=1.0).contains(&q.exploration) {
            anyhow::bail!(
                "solver.qlearning.exploration must be in [0, 1], got {}",
                q.exploration
            );
        }
        if q.max_attempts == 0 {
            anyhow::bail!("solver.qlearning.max_attempts must be at least 1");
        }

        if self.compiler.push_image_repository.trim().is_empty() {
            anyhow::bail!("compiler.push_image_repository must not be empty");
        }
        if self.compiler.only_deps && self.compiler.no_deps {
            anyhow::bail!("compiler.only_deps and compiler.no_deps are mutually exclusive");
        }
        Ok(())
    }
}
