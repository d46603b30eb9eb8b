// src/solver/planner.rs

//! Uninstall and upgrade planning on top of [`Solver::install`]

use super::formula::{Clause, Literal};
use super::sat::{Preference, SatProblem};
use super::{AssertionList, Solver};
use crate::db::{MemoryDatabase, PackageDatabase};
use crate::error::{Error, Result};
use crate::package::formula::FormulaBuilder;
use crate::package::{self, Package};
use crate::version;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Result of an upgrade computation
#[derive(Debug, Clone, Default)]
pub struct UpgradePlan {
    /// Installed packages to remove
    pub uninstall: Vec<Package>,
    /// Assertions for the new installed set
    pub install: AssertionList,
}

impl Solver<'_> {
    /// Resolve uninstall targets against the installed database
    fn installed_targets(&self, targets: &[Package]) -> Result<Vec<Package>> {
        targets
            .iter()
            .map(|t| {
                let candidate = self.installed().find_package_candidate(t)?;
                self.installed()
                    .find_package(&candidate)
                    .map_err(|_| Error::PackageNotFound(t.fingerprint()))
            })
            .collect()
    }

    /// Installed revdeps of `target` that nothing in `replacements` satisfies
    fn blocking_revdeps(
        &self,
        target: &Package,
        targets: &BTreeSet<String>,
        replacements: &[Package],
    ) -> Result<Vec<Package>> {
        let revdeps = self.installed().get_revdeps(target)?;
        Ok(revdeps
            .into_iter()
            .filter(|r| !targets.contains(&r.fingerprint()))
            .filter(|r| {
                r.requires
                    .iter()
                    .filter(|req| req.matches(target) || target.provides_for(req))
                    .any(|req| {
                        !replacements
                            .iter()
                            .any(|n| req.matches(n) || n.provides_for(req))
                    })
            })
            .collect())
    }

    /// Whether the installed set minus `removed` still has a solution
    fn satisfiable_without(&self, removed: &BTreeSet<String>) -> Result<bool> {
        let remaining: Vec<Package> = self
            .installed()
            .world()?
            .into_iter()
            .filter(|p| !removed.contains(&p.fingerprint()))
            .collect();

        let mut builder = FormulaBuilder::new(vec![self.installed()]);
        for p in &remaining {
            builder.add(p)?;
        }
        let (mut formula, variables) = builder.finish();
        for p in &remaining {
            formula.add(Clause::unit(Literal::positive(p.fingerprint())));
        }
        for r in removed {
            formula.add(Clause::unit(Literal::negative(r.clone())));
        }

        let problem = SatProblem::new(&formula, variables.iter().map(|(k, _)| k));
        problem.is_satisfiable()
    }

    /// Plan the removal of `targets` from the installed set
    ///
    /// - `full = false, check_conflicts = true`: refuse if an installed
    ///   package still requires a target
    /// - `full = true`: also remove every requirement of the targets that
    ///   the rest of the installed set can live without
    pub fn uninstall(
        &self,
        check_conflicts: bool,
        full: bool,
        targets: &[Package],
    ) -> Result<Vec<Package>> {
        self.uninstall_replacing(check_conflicts, full, targets, &[])
    }

    fn uninstall_replacing(
        &self,
        check_conflicts: bool,
        full: bool,
        targets: &[Package],
        replacements: &[Package],
    ) -> Result<Vec<Package>> {
        let targets = self.installed_targets(targets)?;
        let target_fps: BTreeSet<String> = targets.iter().map(|t| t.fingerprint()).collect();

        if !full {
            if check_conflicts {
                for t in &targets {
                    let blocking = self.blocking_revdeps(t, &target_fps, replacements)?;
                    if let Some(first) = blocking.first() {
                        return Err(Error::DependencyCycleInDeletion {
                            package: t.fingerprint(),
                            required_by: first.fingerprint(),
                        });
                    }
                }
            }
            return Ok(targets);
        }

        // Requirement closure of the targets within the installed set
        let empty = MemoryDatabase::new();
        let closure = self.sibling(self.installed(), &empty).install(&targets)?;

        let mut removal = target_fps.clone();
        let candidates: Vec<Package> = closure
            .trues()
            .into_iter()
            .filter(|p| !target_fps.contains(&p.fingerprint()))
            .collect();

        for candidate in candidates {
            let mut trial = removal.clone();
            trial.insert(candidate.fingerprint());
            if self.satisfiable_without(&trial)? {
                debug!("Removing unneeded dependency {}", candidate);
                removal = trial;
            }
        }

        if check_conflicts && !self.satisfiable_without(&removal)? {
            return Err(Error::DependencyCycleInDeletion {
                package: targets
                    .first()
                    .map(|t| t.fingerprint())
                    .unwrap_or_default(),
                required_by: "installed set".to_string(),
            });
        }

        removal.iter().map(|fp| self.installed().get_package(fp)).collect()
    }

    /// Assert every target false and remove whatever the model turns off
    pub fn uninstall_universe(&self, targets: &[Package]) -> Result<Vec<Package>> {
        let targets = self.installed_targets(targets)?;

        let mut builder = FormulaBuilder::new(vec![self.installed()]);
        for p in self.installed().world()? {
            builder.add(&p)?;
        }
        let (mut formula, variables) = builder.finish();
        for t in &targets {
            formula.add(Clause::unit(Literal::negative(t.fingerprint())));
        }

        let problem = SatProblem::new(&formula, variables.iter().map(|(k, _)| k));
        let model = problem
            .solve(Preference::Maximal)?
            .ok_or_else(|| super::explain(&formula))?;

        let mut removal = Vec::new();
        for (name, value) in model {
            if !value {
                if let Ok(p) = self.installed().get_package(&name) {
                    removal.push(p);
                }
            }
        }
        info!("Universe uninstall removes {} packages", removal.len());
        Ok(removal)
    }

    /// Best replacement for an installed package in the definitions
    ///
    /// A provider of the installed name wins even if the definitions still
    /// carry the providee; otherwise only a strictly newer version counts.
    fn replacement_for(&self, installed: &Package) -> Result<Option<Package>> {
        let any_version = Package::new(&installed.category, &installed.name, "");
        let found = self.definitions().find_packages(&any_version)?;
        let Some(best) = package::best_version(&found) else {
            return Ok(None);
        };

        if !best.same_name(installed) {
            return Ok(Some(best.clone()));
        }
        match version::compare_versions(&best.version, &installed.version) {
            Ordering::Greater => Ok(Some(best.clone())),
            _ => Ok(None),
        }
    }

    /// Install `to_install` on top of the installed set minus `removed`
    fn install_over(&self, removed: &[Package], to_install: &[Package]) -> Result<AssertionList> {
        let remaining = MemoryDatabase::new();
        self.installed().clone_into(&remaining)?;
        for r in removed {
            remaining.remove_package(r)?;
        }

        self.sibling(self.definitions(), &remaining)
            .install_with(to_install, self.resolver.as_deref())
    }

    /// Upgrade every installed package that has a better definition
    pub fn upgrade(&self, check_conflicts: bool, full: bool) -> Result<UpgradePlan> {
        let mut to_uninstall = Vec::new();
        let mut to_install = Vec::new();

        for p in self.installed().world()? {
            if let Some(replacement) = self.replacement_for(&p)? {
                debug!("{} will be replaced by {}", p, replacement);
                to_uninstall.push(p);
                to_install.push(replacement);
            }
        }

        if to_uninstall.is_empty() {
            return Ok(UpgradePlan::default());
        }

        let uninstall =
            self.uninstall_replacing(check_conflicts, full, &to_uninstall, &to_install)?;
        let install = self.install_over(&uninstall, &to_install)?;

        info!(
            "Upgrade plan: {} to remove, {} to install",
            uninstall.len(),
            to_install.len()
        );
        Ok(UpgradePlan { uninstall, install })
    }

    /// Treat the definitions as authoritative for the whole installed set
    ///
    /// Installed packages with a better definition are replaced; packages the
    /// definitions no longer know (and nothing provides) are dropped when
    /// `drop_removed` is set.
    pub fn upgrade_universe(&self, drop_removed: bool) -> Result<UpgradePlan> {
        let mut uninstall = Vec::new();
        let mut to_install = Vec::new();

        for p in self.installed().world()? {
            let known = self.definitions().find_package(&p).is_ok()
                || !self
                    .definitions()
                    .find_packages(&Package::new(&p.category, &p.name, ""))?
                    .is_empty();

            if !known {
                if drop_removed {
                    debug!("{} is gone from the definitions", p);
                    uninstall.push(p);
                }
                continue;
            }

            if let Some(replacement) = self.replacement_for(&p)? {
                uninstall.push(p);
                to_install.push(replacement);
            }
        }

        let install = self.install_over(&uninstall, &to_install)?;
        Ok(UpgradePlan { uninstall, install })
    }
}
