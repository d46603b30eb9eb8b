// src/lib.rs

//! kiln: source package builds driven by a SAT solver
//!
//! Package recipes carry typed relations (requires, conflicts, provides,
//! version selectors). kiln turns them into propositional formulas, solves
//! them into an ordered build plan, hashes that plan into content-addressed
//! image tags, and drives a container backend to produce artifacts.
//!
//! # Architecture
//!
//! - `version`, `package`, `db`: version algebra, package identity, stores
//! - `solver`: formulas, SAT driving, unsat explanation and relaxation,
//!   install/uninstall/upgrade planning
//! - `compiler`: build specs, hash tree, build orchestration
//! - `delta`, `artifact`, `compression`: rootfs deltas and package archives
//! - `backend`: container runtimes behind a single trait

pub mod artifact;
pub mod backend;
pub mod compiler;
pub mod compression;
pub mod config;
pub mod db;
pub mod delta;
mod error;
pub mod hash;
pub mod package;
pub mod solver;
pub mod version;

pub use artifact::PackageArtifact;
pub use backend::{Backend, BackendType, ImageBackend};
pub use compiler::{CompilationSpec, Compiler, CompilerOptions, SpecRegistry};
pub use config::Config;
pub use db::{MemoryDatabase, PackageDatabase, SqliteDatabase};
pub use error::{Error, ErrorKind, Result};
pub use package::Package;
pub use solver::{Assertion, AssertionList, Solver, SolverOptions};
pub use version::VersionSelector;
