// src/error.rs

//! Error types shared across the solver, database and compiler

use std::fmt;
use thiserror::Error;

/// Stable classification of errors, used by the CLI to report failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidVersion,
    PackageNotFound,
    Unsatisfiable,
    ResolverExhausted,
    BackendFailure,
    ChecksumMismatch,
    DependencyCycleInDeletion,
    Database,
    Io,
    Parse,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidVersion => "invalid-version",
            ErrorKind::PackageNotFound => "package-not-found",
            ErrorKind::Unsatisfiable => "unsatisfiable",
            ErrorKind::ResolverExhausted => "resolver-exhausted",
            ErrorKind::BackendFailure => "backend-failure",
            ErrorKind::ChecksumMismatch => "checksum-mismatch",
            ErrorKind::DependencyCycleInDeletion => "dependency-cycle-in-deletion",
            ErrorKind::Database => "database",
            ErrorKind::Io => "io",
            ErrorKind::Parse => "parse",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid version '{0}'")]
    InvalidVersion(String),

    #[error("Package not found: {0}")]
    PackageNotFound(String),

    /// The solver proved the request unsatisfiable. The payload is the
    /// pretty-printed minimum unsatisfiable conjunction.
    #[error("Unsatisfiable request: {explanation}")]
    Unsatisfiable { explanation: String },

    #[error("Resolver gave up after {attempts} attempts without a solution")]
    ResolverExhausted { attempts: usize },

    #[error("Backend command '{command}' failed: {stderr}")]
    BackendFailure { command: String, stderr: String },

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Cannot remove {package}: required by {required_by}")]
    DependencyCycleInDeletion { package: String, required_by: String },

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Initialization error: {0}")]
    InitError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Solver error: {0}")]
    SolverError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Walk(#[from] walkdir::Error),
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidVersion(_) => ErrorKind::InvalidVersion,
            Error::PackageNotFound(_) => ErrorKind::PackageNotFound,
            Error::Unsatisfiable { .. } => ErrorKind::Unsatisfiable,
            Error::ResolverExhausted { .. } => ErrorKind::ResolverExhausted,
            Error::BackendFailure { .. } => ErrorKind::BackendFailure,
            Error::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            Error::DependencyCycleInDeletion { .. } => ErrorKind::DependencyCycleInDeletion,
            Error::DatabaseError(_) | Error::Sqlite(_) | Error::AlreadyExists(_) => {
                ErrorKind::Database
            }
            Error::IoError(_) | Error::Io(_) | Error::Walk(_) => ErrorKind::Io,
            Error::ParseError(_) | Error::Yaml(_) | Error::Json(_) => ErrorKind::Parse,
            Error::InvalidTransition { .. }
            | Error::Cancelled
            | Error::InitError(_)
            | Error::SolverError(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
