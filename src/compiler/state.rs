// src/compiler/state.rs

//! Per-package build progress

use crate::error::{Error, Result};
use std::fmt;
use tracing::{info, warn};

/// Where a single package build stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildState {
    Planned,
    /// Every dependency image is built, pulled or cached
    DependenciesReady,
    BuilderImageAvailable,
    StepImageAvailable,
    DeltaComputed,
    ArtifactWritten,
    Done,
    Failed,
}

impl BuildState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildState::Planned => "planned",
            BuildState::DependenciesReady => "dependencies-ready",
            BuildState::BuilderImageAvailable => "builder-image-available",
            BuildState::StepImageAvailable => "step-image-available",
            BuildState::DeltaComputed => "delta-computed",
            BuildState::ArtifactWritten => "artifact-written",
            BuildState::Done => "done",
            BuildState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildState::Done | BuildState::Failed)
    }

    /// Whether `self -> next` is a legal step
    ///
    /// Besides the linear image pipeline, a virtual package goes straight
    /// from `DependenciesReady` to `ArtifactWritten`, and a dependencies-only
    /// build finishes at `DependenciesReady`.
    pub fn can_transition(&self, next: BuildState) -> bool {
        use BuildState::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Planned, DependenciesReady)
            | (DependenciesReady, BuilderImageAvailable)
            | (DependenciesReady, ArtifactWritten)
            | (DependenciesReady, Done)
            | (BuilderImageAvailable, StepImageAvailable)
            | (StepImageAvailable, DeltaComputed)
            | (DeltaComputed, ArtifactWritten)
            | (ArtifactWritten, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// State of one package build, logging every transition
#[derive(Debug)]
pub struct BuildProgress {
    package: String,
    state: BuildState,
}

impl BuildProgress {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            state: BuildState::Planned,
        }
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn advance(&mut self, next: BuildState) -> Result<()> {
        if !self.state.can_transition(next) {
            return Err(Error::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        info!("{}: {} -> {}", self.package, self.state, next);
        self.state = next;
        Ok(())
    }

    /// Record a failure; terminal states are left untouched
    pub fn fail(&mut self, error: &Error) {
        if self.state.is_terminal() {
            return;
        }
        warn!("{}: failed in state {}: {}", self.package, self.state, error);
        self.state = BuildState::Failed;
    }
}
