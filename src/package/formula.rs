// src/package/formula.rs

//! Encoding of package relations into CNF clauses
//!
//! For a package `P` the builder emits:
//! - `¬P ∨ Q` for each requirement, where `Q` is the best candidate
//! - `¬P ∨ ¬Q` for each package matching a conflict
//! - `¬P ∨ ¬W` for every other version `W` of the same category/name
//!
//! A requirement with no candidate is relaxed to the selector itself and
//! pinned false (`¬Q`), so the formula stays well-formed and an
//! unsatisfiable result names the missing dependency.
//!
//! Traversal is an explicit worklist keyed by fingerprint, so dependency
//! cycles and deep chains neither loop nor grow the stack.

use crate::db::PackageDatabase;
use crate::error::Result;
use crate::package::Package;
use crate::solver::formula::{Clause, Formula, Literal, VariableMap};
use std::collections::HashSet;
use tracing::debug;

/// Incremental formula builder shared across many root packages
pub struct FormulaBuilder<'a> {
    lookup: Vec<&'a dyn PackageDatabase>,
    visited: HashSet<String>,
    formula: Formula,
    variables: VariableMap,
}

impl<'a> FormulaBuilder<'a> {
    /// Build against the given databases; lookups try them in order
    pub fn new(lookup: Vec<&'a dyn PackageDatabase>) -> Self {
        Self {
            lookup,
            visited: HashSet::new(),
            formula: Formula::new(),
            variables: VariableMap::new(),
        }
    }

    /// Resolve a selector to a concrete package, reporting whether one was found
    fn resolve(&self, selector: &Package) -> Result<(Package, bool)> {
        for db in &self.lookup {
            let candidate = db.find_package_candidate(selector)?;
            if db.find_package(&candidate).is_ok() {
                return Ok((candidate, true));
            }
        }
        Ok((selector.clone(), false))
    }

    /// All concrete packages matching a selector across the lookup databases
    fn resolve_all(&self, selector: &Package) -> Result<Vec<Package>> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for db in &self.lookup {
            for p in db.find_packages(selector)? {
                if seen.insert(p.fingerprint()) {
                    found.push(p);
                }
            }
        }
        Ok(found)
    }

    fn versions_of(&self, package: &Package) -> Result<Vec<Package>> {
        for db in &self.lookup {
            if db.find_package(package).is_ok() {
                return db.find_package_versions(package);
            }
        }
        Ok(Vec::new())
    }

    /// Emit the clauses for `root` and everything it reaches
    pub fn add(&mut self, root: &Package) -> Result<()> {
        let mut stack = vec![root.clone()];

        while let Some(package) = stack.pop() {
            let var = self.variables.register(&package);
            if !self.visited.insert(var.clone()) {
                continue;
            }

            for req in &package.requires {
                let (candidate, found) = self.resolve(req)?;
                let dep = self.variables.register(&candidate);
                self.formula.add(Clause::implies(&var, &dep));
                if found {
                    stack.push(candidate);
                } else {
                    debug!("{} requires {} which has no candidate", var, req);
                    self.formula.add(Clause::unit(Literal::negative(dep.clone())));
                    self.visited.insert(dep);
                }
            }

            for conflict in &package.conflicts {
                for candidate in self.resolve_all(conflict)? {
                    let other = self.variables.register(&candidate);
                    if other == var {
                        continue;
                    }
                    self.formula.add(Clause::exclusive(&var, &other));
                    stack.push(candidate);
                }
            }

            for sibling in self.versions_of(&package)? {
                let other = self.variables.register(&sibling);
                if other != var {
                    self.formula.add(Clause::exclusive(&var, &other));
                }
            }
        }

        Ok(())
    }

    pub fn finish(self) -> (Formula, VariableMap) {
        (self.formula, self.variables)
    }
}

/// Build the formula for a single package against `def_db`, recording every
/// variable it introduces into `solver_db`
pub fn build_formula(
    package: &Package,
    def_db: &dyn PackageDatabase,
    solver_db: &mut VariableMap,
) -> Result<Formula> {
    let mut builder = FormulaBuilder::new(vec![def_db]);
    builder.add(package)?;
    let (formula, variables) = builder.finish();
    solver_db.merge(variables);
    Ok(formula)
}
