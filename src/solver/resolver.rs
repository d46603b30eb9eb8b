// src/solver/resolver.rs

//! Strategies invoked when a request is unsatisfiable

use super::assertion::AssertionList;
use super::formula::{Formula, VariableMap};
use super::sat::SatProblem;
use super::Solver;
use crate::error::{Error, Result};
use crate::package::Package;
use tracing::debug;

/// Recovery strategy for an unsatisfiable install request
pub trait PackageResolver: Send + Sync {
    /// Produce assertions for `wanted`, or an error explaining why none exist
    ///
    /// `formula` is the full CNF that was just found unsatisfiable and
    /// `variables` maps its variables back to packages.
    fn resolve(
        &self,
        formula: &Formula,
        variables: &VariableMap,
        solver: &Solver<'_>,
        wanted: &[Package],
    ) -> Result<AssertionList>;
}

/// Reports the minimal unsatisfiable subset of the formula; never recovers
#[derive(Debug, Clone, Copy, Default)]
pub struct Explainer;

impl PackageResolver for Explainer {
    fn resolve(
        &self,
        formula: &Formula,
        _variables: &VariableMap,
        _solver: &Solver<'_>,
        _wanted: &[Package],
    ) -> Result<AssertionList> {
        Err(explain(formula))
    }
}

/// Build the `Unsatisfiable` error for a formula
///
/// The explanation is the conjunction of a minimal unsatisfiable subset,
/// with variables rendered as package fingerprints.
pub fn explain(formula: &Formula) -> Error {
    let problem = SatProblem::new(formula, std::iter::empty::<&String>());
    match problem.minimal_unsat_core() {
        Ok(core) if core.is_empty() => Error::SolverError(
            "asked to explain a satisfiable formula".to_string(),
        ),
        Ok(core) => {
            let conjunction: Formula = core.into_iter().collect();
            debug!("Unsatisfiable core: {}", conjunction);
            Error::Unsatisfiable {
                explanation: conjunction.to_string(),
            }
        }
        Err(e) => e,
    }
}
