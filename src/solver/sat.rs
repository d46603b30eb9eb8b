// src/solver/sat.rs

//! CDCL backend driver
//!
//! Wraps `varisat`: variables are numbered in sorted name order so identical
//! formulas always produce identical solver input. Besides plain
//! satisfiability this module provides
//! - preferred models: a subset-minimal (or maximal) set of true variables,
//!   found by assuming the preferred value everywhere and relaxing the
//!   assumptions named in each failed core
//! - minimal unsatisfiable cores: deletion-based, with one selector variable
//!   per clause

use super::formula::{Clause, Formula, Literal};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use varisat::{ExtendFormula, Lit, Solver as CdclSolver};

/// A satisfying assignment, keyed by variable name
pub type Model = BTreeMap<String, bool>;

/// Which value unconstrained variables should take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preference {
    /// As few true variables as possible
    Minimal,
    /// As few false variables as possible
    Maximal,
}

/// A formula lowered to solver literals
pub struct SatProblem {
    names: Vec<String>,
    index: BTreeMap<String, usize>,
    clauses: Vec<Vec<Lit>>,
    source: Vec<Clause>,
}

impl SatProblem {
    /// Lower `formula`; `extra` names variables with no clauses of their own
    pub fn new<'a>(formula: &Formula, extra: impl IntoIterator<Item = &'a String>) -> Self {
        let mut all: BTreeSet<String> = formula.variables();
        all.extend(extra.into_iter().cloned());

        let names: Vec<String> = all.into_iter().collect();
        let index: BTreeMap<String, usize> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();

        let mut problem = Self {
            names,
            index,
            clauses: Vec::with_capacity(formula.len()),
            source: Vec::with_capacity(formula.len()),
        };
        for clause in formula.iter() {
            let lits = clause.literals().iter().map(|l| problem.lit(l)).collect();
            problem.clauses.push(lits);
            problem.source.push(clause.clone());
        }
        problem
    }

    pub fn num_vars(&self) -> usize {
        self.names.len()
    }

    fn var_lit(&self, index: usize, positive: bool) -> Lit {
        Lit::from_dimacs(if positive {
            index as isize + 1
        } else {
            -(index as isize + 1)
        })
    }

    fn lit(&self, literal: &Literal) -> Lit {
        // Every literal's variable is indexed at construction
        let index = self.index.get(&literal.variable).copied().unwrap_or_default();
        self.var_lit(index, literal.positive)
    }

    fn solver(&self) -> CdclSolver<'static> {
        let mut solver = CdclSolver::new();
        // Mention every variable so the model covers clause-free ones too
        if !self.names.is_empty() {
            let last = self.var_lit(self.names.len() - 1, true);
            solver.add_clause(&[last, !last]);
        }
        for clause in &self.clauses {
            solver.add_clause(clause);
        }
        solver
    }

    fn decode(&self, lits: &[Lit]) -> Model {
        let mut model: Model = self.names.iter().map(|n| (n.clone(), false)).collect();
        for lit in lits {
            if let Some(name) = self.names.get(lit.var().index()) {
                model.insert(name.clone(), lit.is_positive());
            }
        }
        model
    }

    /// Plain satisfiability check
    pub fn is_satisfiable(&self) -> Result<bool> {
        let mut solver = self.solver();
        run(&mut solver)
    }

    /// Find a model preferring the given value for unconstrained variables
    ///
    /// Returns `None` when the formula is unsatisfiable.
    pub fn solve(&self, preference: Preference) -> Result<Option<Model>> {
        let mut solver = self.solver();
        if !run(&mut solver)? {
            return Ok(None);
        }

        let preferred = preference == Preference::Maximal;
        let mut assumed: BTreeSet<usize> = (0..self.names.len()).collect();

        // Relax the assumptions blamed by each failed core until satisfiable
        loop {
            let lits: Vec<Lit> = assumed.iter().map(|&i| self.var_lit(i, preferred)).collect();
            solver.assume(&lits);
            if run(&mut solver)? {
                break;
            }
            let core: Vec<usize> = solver
                .failed_core()
                .map(|c| c.iter().map(|l| l.var().index()).collect())
                .unwrap_or_default();
            if core.is_empty() {
                return Err(Error::SolverError(
                    "empty failed core on a satisfiable formula".to_string(),
                ));
            }
            for v in core {
                assumed.remove(&v);
            }
        }

        let mut model = solver
            .model()
            .ok_or_else(|| Error::SolverError("solver returned no model".to_string()))?;

        // Greedy pass: flip relaxed variables one at a time while it stays satisfiable
        let relaxed: Vec<usize> = (0..self.names.len())
            .filter(|i| !assumed.contains(i))
            .collect();
        for v in relaxed {
            let current = model
                .iter()
                .find(|l| l.var().index() == v)
                .is_some_and(|l| l.is_positive());
            if current == preferred {
                continue;
            }

            let mut lits: Vec<Lit> = model
                .iter()
                .filter(|l| l.is_positive() == preferred)
                .copied()
                .collect();
            lits.push(self.var_lit(v, preferred));
            solver.assume(&lits);
            if run(&mut solver)? {
                if let Some(m) = solver.model() {
                    model = m;
                }
            }
        }

        debug!(
            "Solved {} clauses over {} variables",
            self.clauses.len(),
            self.names.len()
        );
        Ok(Some(self.decode(&model)))
    }

    /// Deletion-based minimal unsatisfiable subset
    ///
    /// The returned clauses are unsatisfiable together and become
    /// satisfiable when any single one is removed. Returns an empty list if
    /// the formula is satisfiable.
    pub fn minimal_unsat_core(&self) -> Result<Vec<Clause>> {
        let n = self.names.len();
        let mut solver: CdclSolver<'static> = CdclSolver::new();

        // Selector s_i activates clause i: (C_i ∨ ¬s_i)
        let selector = |i: usize| self.var_lit(n + i, true);
        for (i, clause) in self.clauses.iter().enumerate() {
            let mut lits = clause.clone();
            lits.push(!selector(i));
            solver.add_clause(&lits);
        }

        let core_of = |solver: &CdclSolver<'static>| -> BTreeSet<usize> {
            solver
                .failed_core()
                .map(|c| c.iter().map(|l| l.var().index() - n).collect())
                .unwrap_or_default()
        };

        let all: Vec<Lit> = (0..self.clauses.len()).map(selector).collect();
        solver.assume(&all);
        if run(&mut solver)? {
            return Ok(Vec::new());
        }
        let mut core = core_of(&solver);
        if core.is_empty() {
            // Unsatisfiable without any clause active: cannot happen for CNF input
            core = (0..self.clauses.len()).collect();
        }

        let candidates: Vec<usize> = core.iter().copied().collect();
        for i in candidates {
            if !core.contains(&i) {
                continue;
            }
            let trial: Vec<Lit> = core.iter().filter(|&&j| j != i).map(|&j| selector(j)).collect();
            solver.assume(&trial);
            if !run(&mut solver)? {
                let refined = core_of(&solver);
                core = if refined.is_empty() {
                    core.into_iter().filter(|&j| j != i).collect()
                } else {
                    refined
                };
            }
        }

        debug!("Minimal unsatisfiable core has {} clauses", core.len());
        Ok(core.into_iter().map(|i| self.source[i].clone()).collect())
    }
}

fn run(solver: &mut CdclSolver<'static>) -> Result<bool> {
    solver
        .solve()
        .map_err(|e| Error::SolverError(format!("SAT backend failed: {}", e)))
}
