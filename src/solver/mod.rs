// src/solver/mod.rs

//! SAT-based dependency solver
//!
//! The solver composes one CNF out of
//! 1. the world formula: relations of every package in the definition database
//! 2. the installed formula: relations of every installed package
//! 3. unit clauses forcing every wanted and installed package true
//!
//! and decodes the preferred (fewest-installs) model into an
//! [`AssertionList`]. When the request is unsatisfiable the attached
//! [`PackageResolver`] decides what happens; without one the error carries
//! the minimal unsatisfiable core.

pub mod assertion;
pub mod formula;
mod planner;
pub mod qlearning;
pub mod resolver;
pub mod sat;

pub use assertion::{Assertion, AssertionHash, AssertionList};
pub use formula::{Clause, Formula, Literal, VariableMap};
pub use planner::UpgradePlan;
pub use qlearning::QLearningResolver;
pub use resolver::{explain, Explainer, PackageResolver};

use crate::db::PackageDatabase;
use crate::error::{Error, Result};
use crate::package::formula::FormulaBuilder;
use crate::package::Package;
use rayon::prelude::*;
use sat::{Preference, SatProblem};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// How the world formula is built
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolverType {
    #[default]
    SingleCoreSimple,
    ParallelSimple,
}

/// Strategy attached for unsatisfiable requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolverType {
    #[default]
    None,
    Explainer,
    QLearning,
}

/// Parameters of the Q-learning resolver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QLearningOptions {
    pub learning_rate: f64,
    pub discount: f64,
    pub max_attempts: usize,
    pub initial_observed_delta: usize,
    /// Allow the agent to pick "no action"
    pub do_noop: bool,
    /// Probability of a random action instead of the greedy one
    pub exploration: f64,
    /// Seed for action selection, so relaxations are reproducible
    pub seed: u64,
}

impl Default for QLearningOptions {
    fn default() -> Self {
        Self {
            learning_rate: 0.7,
            discount: 1.0,
            max_attempts: 9000,
            initial_observed_delta: 999_999,
            do_noop: false,
            exploration: 0.3,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    #[serde(rename = "type")]
    pub solver_type: SolverType,
    pub concurrency: usize,
    pub resolver: ResolverType,
    pub qlearning: QLearningOptions,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            solver_type: SolverType::default(),
            concurrency: default_concurrency(),
            resolver: ResolverType::default(),
            qlearning: QLearningOptions::default(),
        }
    }
}

/// Number of hardware threads, at least 1
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn resolver_for(options: &SolverOptions) -> Option<Box<dyn PackageResolver>> {
    match options.resolver {
        ResolverType::None => None,
        ResolverType::Explainer => Some(Box::new(Explainer)),
        ResolverType::QLearning => Some(Box::new(QLearningResolver::new(options.qlearning.clone()))),
    }
}

/// Dependency solver over a definition database and an installed database
pub struct Solver<'a> {
    definitions: &'a dyn PackageDatabase,
    installed: &'a dyn PackageDatabase,
    options: SolverOptions,
    resolver: Option<Box<dyn PackageResolver>>,
}

impl<'a> Solver<'a> {
    pub fn new(
        definitions: &'a dyn PackageDatabase,
        installed: &'a dyn PackageDatabase,
        options: SolverOptions,
    ) -> Self {
        let resolver = resolver_for(&options);
        Self {
            definitions,
            installed,
            options,
            resolver,
        }
    }

    /// Replace the resolver chosen by the options
    pub fn with_resolver(mut self, resolver: Box<dyn PackageResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    pub fn definitions(&self) -> &'a dyn PackageDatabase {
        self.definitions
    }

    pub fn installed(&self) -> &'a dyn PackageDatabase {
        self.installed
    }

    /// Same options, different databases, no resolver
    fn sibling<'b>(
        &self,
        definitions: &'b dyn PackageDatabase,
        installed: &'b dyn PackageDatabase,
    ) -> Solver<'b> {
        let mut options = self.options.clone();
        options.resolver = ResolverType::None;
        Solver::new(definitions, installed, options)
    }

    /// Formula over every package in the definition database
    pub fn world_formula(&self) -> Result<(Formula, VariableMap)> {
        let world = self.definitions.world()?;

        match self.options.solver_type {
            SolverType::SingleCoreSimple => {
                let mut builder = FormulaBuilder::new(vec![self.definitions]);
                for p in &world {
                    builder.add(p)?;
                }
                Ok(builder.finish())
            }
            SolverType::ParallelSimple => {
                let workers = self.options.concurrency.max(1);
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .build()
                    .map_err(|e| Error::InitError(format!("Failed to start solver pool: {}", e)))?;

                let chunk = world.len().div_ceil(workers).max(1);
                let definitions = self.definitions;
                let parts: Vec<(Formula, VariableMap)> = pool.install(|| {
                    world
                        .par_chunks(chunk)
                        .map(|packages| {
                            let mut builder = FormulaBuilder::new(vec![definitions]);
                            for p in packages {
                                builder.add(p)?;
                            }
                            Ok(builder.finish())
                        })
                        .collect::<Result<Vec<_>>>()
                })?;

                let mut formula = Formula::new();
                let mut variables = VariableMap::new();
                for (f, v) in parts {
                    formula.extend(f);
                    variables.merge(v);
                }
                Ok((formula, variables))
            }
        }
    }

    /// Resolve a requested selector to a concrete package
    fn resolve_wanted(&self, selector: &Package) -> Result<Package> {
        for db in [self.definitions, self.installed] {
            let candidate = db.find_package_candidate(selector)?;
            if db.find_package(&candidate).is_ok() {
                return Ok(candidate);
            }
        }
        Err(Error::PackageNotFound(selector.fingerprint()))
    }

    /// Compose the full request formula
    fn request_formula(
        &self,
        wanted: &[Package],
        installed: &[Package],
    ) -> Result<(Formula, VariableMap)> {
        let (mut formula, mut variables) = self.world_formula()?;

        let mut builder = FormulaBuilder::new(vec![self.definitions, self.installed]);
        for p in installed.iter().chain(wanted) {
            builder.add(p)?;
        }
        let (extra, extra_vars) = builder.finish();
        formula.extend(extra);
        variables.merge(extra_vars);

        for p in installed.iter().chain(wanted) {
            formula.add(Clause::unit(Literal::positive(p.fingerprint())));
        }

        debug!(
            "Request formula: {} clauses, {} variables",
            formula.len(),
            variables.len()
        );
        Ok((formula, variables))
    }

    fn decode(model: &sat::Model, variables: &VariableMap) -> AssertionList {
        variables
            .iter()
            .map(|(name, package)| {
                Assertion::new(package.clone(), model.get(name).copied().unwrap_or(false))
            })
            .collect()
    }

    /// Solve for installing `wanted` on top of the installed set
    pub fn install(&self, wanted: &[Package]) -> Result<AssertionList> {
        self.install_with(wanted, self.resolver.as_deref())
    }

    /// Like [`Solver::install`] with an explicit resolver
    pub fn install_with(
        &self,
        wanted: &[Package],
        resolver: Option<&dyn PackageResolver>,
    ) -> Result<AssertionList> {
        let wanted = wanted
            .iter()
            .map(|w| self.resolve_wanted(w))
            .collect::<Result<Vec<_>>>()?;
        let installed = self.installed.world()?;

        if self.definitions.is_rule_free()? && installed.iter().all(|p| !p.has_relations()) {
            debug!("Rule-free database, skipping SAT");
            let all: Vec<Package> = installed.into_iter().chain(wanted).collect();
            return Ok(AssertionList::all_true(&all));
        }

        let (formula, variables) = self.request_formula(&wanted, &installed)?;
        let problem = SatProblem::new(&formula, variables.iter().map(|(k, _)| k));

        match problem.solve(Preference::Minimal)? {
            Some(model) => {
                let assertions = Self::decode(&model, &variables);
                info!(
                    "Solved request for {} packages: {} to install",
                    wanted.len(),
                    assertions.trues().len()
                );
                Ok(assertions)
            }
            None => match resolver {
                Some(r) => r.resolve(&formula, &variables, self, &wanted),
                None => Err(explain(&formula)),
            },
        }
    }

    /// Whether `package` cannot be installed together with all of `world`
    pub fn conflicts(&self, package: &Package, world: &[Package]) -> Result<bool> {
        let mut builder = FormulaBuilder::new(vec![self.definitions, self.installed]);
        builder.add(package)?;
        for p in world {
            builder.add(p)?;
        }
        let (mut formula, variables) = builder.finish();

        let mut forced = BTreeSet::new();
        for p in world.iter().chain(std::iter::once(package)) {
            if forced.insert(p.fingerprint()) {
                formula.add(Clause::unit(Literal::positive(p.fingerprint())));
            }
        }

        let problem = SatProblem::new(&formula, variables.iter().map(|(k, _)| k));
        Ok(!problem.is_satisfiable()?)
    }

    /// Whether `package` conflicts with the installed set
    pub fn conflicts_with_installed(&self, package: &Package) -> Result<bool> {
        let installed = self.installed.world()?;
        let others: Vec<Package> = installed
            .into_iter()
            .filter(|p| p.fingerprint() != package.fingerprint())
            .collect();
        self.conflicts(package, &others)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDatabase;

    fn pkg(name: &str) -> Package {
        Package::new(name, name, "1.0")
    }

    fn sel(name: &str) -> Package {
        Package::new(name, name, "")
    }

    #[test]
    fn test_rule_free_short_circuit() {
        let defs = MemoryDatabase::from_packages(&[pkg("a"), pkg("b")]).unwrap();
        let installed = MemoryDatabase::from_packages(&[pkg("c")]).unwrap();
        let solver = Solver::new(&defs, &installed, SolverOptions::default());

        let result = solver.install(&[sel("a")]).unwrap();
        let fps: Vec<String> = result.iter().map(|a| a.fingerprint()).collect();
        assert_eq!(fps, vec!["a/a-1.0", "c/c-1.0"]);
        assert!(result.iter().all(|a| a.value));
    }

    #[test]
    fn test_unknown_wanted_package() {
        let defs = MemoryDatabase::from_packages(&[pkg("a")]).unwrap();
        let installed = MemoryDatabase::new();
        let solver = Solver::new(&defs, &installed, SolverOptions::default());
        assert!(matches!(
            solver.install(&[sel("nope")]),
            Err(Error::PackageNotFound(_))
        ));
    }

    #[test]
    fn test_parallel_matches_single_core() {
        let mut packages = Vec::new();
        for i in 0..20 {
            let mut p = Package::new("c", &format!("p{:02}", i), "1.0");
            if i > 0 {
                p.requires = vec![Package::new("c", &format!("p{:02}", i - 1), ">=1.0")];
            }
            packages.push(p);
        }
        let defs = MemoryDatabase::from_packages(&packages).unwrap();
        let installed = MemoryDatabase::new();

        let single = Solver::new(&defs, &installed, SolverOptions::default());
        let parallel = Solver::new(
            &defs,
            &installed,
            SolverOptions {
                solver_type: SolverType::ParallelSimple,
                concurrency: 4,
                ..Default::default()
            },
        );

        let wanted = [Package::new("c", "p10", "")];
        let a = single.install(&wanted).unwrap().order();
        let b = parallel.install(&wanted).unwrap().order();
        assert_eq!(a, b);
        assert_eq!(a.trues().len(), 11);
    }

    #[test]
    fn test_conflicts_queries() {
        let b = pkg("b").with_conflicts(vec![sel("c")]);
        let defs = MemoryDatabase::from_packages(&[b.clone(), pkg("c"), pkg("d")]).unwrap();
        let installed = MemoryDatabase::from_packages(&[pkg("c")]).unwrap();
        let solver = Solver::new(&defs, &installed, SolverOptions::default());

        assert!(solver.conflicts(&b, &[pkg("c")]).unwrap());
        assert!(!solver.conflicts(&pkg("d"), &[pkg("c")]).unwrap());
        assert!(solver.conflicts_with_installed(&b).unwrap());
        assert!(!solver.conflicts_with_installed(&pkg("d")).unwrap());
    }

    #[test]
    fn test_qlearning_drops_conflicting_target() {
        let b = pkg("b").with_conflicts(vec![sel("c")]);
        let a = pkg("a").with_requires(vec![sel("b")]);
        let defs = MemoryDatabase::from_packages(&[a, b, pkg("c"), pkg("d")]).unwrap();
        let installed = MemoryDatabase::new();
        let solver = Solver::new(
            &defs,
            &installed,
            SolverOptions {
                resolver: ResolverType::QLearning,
                ..Default::default()
            },
        );

        let result = solver.install(&[sel("a"), sel("c"), sel("d")]).unwrap();
        let trues: Vec<String> = result.trues().iter().map(|p| p.name.clone()).collect();
        assert!(trues.contains(&"d".to_string()));
        assert_eq!(
            trues.contains(&"a".to_string()),
            !trues.contains(&"c".to_string())
        );
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let opts: SolverOptions = toml::from_str("type = \"parallel-simple\"\nresolver = \"q-learning\"").unwrap();
        assert_eq!(opts.solver_type, SolverType::ParallelSimple);
        assert_eq!(opts.resolver, ResolverType::QLearning);
        assert_eq!(opts.qlearning.max_attempts, 9000);
        assert!(!opts.qlearning.do_noop);
    }
}
