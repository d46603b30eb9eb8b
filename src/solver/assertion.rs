// src/solver/assertion.rs

//! Solver output: package assertions and their build order
//!
//! An [`AssertionList`] is the decoded model of one install/upgrade run.
//! [`AssertionList::order`] turns it into a build plan (dependencies first,
//! ties broken by fingerprint), which is the only order hashes are computed
//! over.

use crate::error::{Error, Result};
use crate::hash::Hasher;
use crate::package::Package;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Content hashes attached to an assertion by the hash tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionHash {
    /// Hash of the ordered list cut before this package
    #[serde(default)]
    pub build_hash: String,
    /// Hash of the ordered list up to and including this package
    #[serde(default)]
    pub package_hash: String,
}

/// A package and the value the solver assigned to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    pub package: Package,
    pub value: bool,
    #[serde(default)]
    pub hash: AssertionHash,
}

impl Assertion {
    pub fn new(package: Package, value: bool) -> Self {
        Self {
            package,
            value,
            hash: AssertionHash::default(),
        }
    }

    pub fn fingerprint(&self) -> String {
        self.package.fingerprint()
    }
}

/// Ordered or unordered collection of assertions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssertionList(Vec<Assertion>);

impl AssertionList {
    pub fn new(assertions: Vec<Assertion>) -> Self {
        Self(assertions)
    }

    /// All packages asserted true, in fingerprint order
    pub fn all_true(packages: &[Package]) -> Self {
        let mut by_fp: BTreeMap<String, Package> = BTreeMap::new();
        for p in packages {
            by_fp.entry(p.fingerprint()).or_insert_with(|| p.clone());
        }
        Self(by_fp.into_values().map(|p| Assertion::new(p, true)).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Assertion> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Assertion> {
        self.0.iter_mut()
    }

    pub fn push(&mut self, assertion: Assertion) {
        self.0.push(assertion);
    }

    pub fn as_slice(&self) -> &[Assertion] {
        &self.0
    }

    /// Find the assertion for a fingerprint
    pub fn search(&self, fingerprint: &str) -> Option<&Assertion> {
        self.0.iter().find(|a| a.fingerprint() == fingerprint)
    }

    pub fn search_mut(&mut self, fingerprint: &str) -> Option<&mut Assertion> {
        self.0.iter_mut().find(|a| a.fingerprint() == fingerprint)
    }

    /// Copy of the list without the given package
    pub fn drop(&self, package: &Package) -> Self {
        let fp = package.fingerprint();
        Self(self.0.iter().filter(|a| a.fingerprint() != fp).cloned().collect())
    }

    pub fn trues(&self) -> Vec<Package> {
        self.0.iter().filter(|a| a.value).map(|a| a.package.clone()).collect()
    }

    pub fn falses(&self) -> Vec<Package> {
        self.0.iter().filter(|a| !a.value).map(|a| a.package.clone()).collect()
    }

    /// Prefix of the list before `package` (excluded)
    ///
    /// Returns the whole list if the package is absent.
    pub fn cut(&self, package: &Package) -> Self {
        let fp = package.fingerprint();
        Self(
            self.0
                .iter()
                .take_while(|a| a.fingerprint() != fp)
                .cloned()
                .collect(),
        )
    }

    /// Prefix of the list up to and including `package`
    pub fn cut_including(&self, package: &Package) -> Self {
        let fp = package.fingerprint();
        let mut out = Vec::new();
        for a in &self.0 {
            out.push(a.clone());
            if a.fingerprint() == fp {
                break;
            }
        }
        Self(out)
    }

    /// Hash of the true assertions, each mixed with a per-package salt
    pub fn hash_with<F>(&self, salt: F) -> String
    where
        F: Fn(&Package) -> String,
    {
        let mut hasher = Hasher::new();
        for a in self.0.iter().filter(|a| a.value) {
            hasher.update_field(&format!("{},{},{}", a.fingerprint(), a.value, salt(&a.package)));
        }
        hasher.finalize()
    }

    /// Hash of the prefix up to and including `package`
    pub fn hash_from<F>(&self, package: &Package, salt: F) -> String
    where
        F: Fn(&Package) -> String,
    {
        self.cut_including(package).hash_with(salt)
    }

    /// Dependency edges among true assertions: index → indices it requires
    fn dependency_edges(trues: &[&Assertion]) -> Vec<BTreeSet<usize>> {
        trues
            .iter()
            .enumerate()
            .map(|(i, a)| {
                let mut deps = BTreeSet::new();
                for req in &a.package.requires {
                    for (j, q) in trues.iter().enumerate() {
                        if i != j && (req.matches(&q.package) || q.package.provides_for(req)) {
                            deps.insert(j);
                        }
                    }
                }
                deps
            })
            .collect()
    }

    /// Topological order: dependencies before dependents, ties by fingerprint,
    /// false assertions last
    ///
    /// Cycles are broken by emitting the lexicographically smallest remaining
    /// package.
    pub fn order(&self) -> Self {
        let mut trues: Vec<&Assertion> = self.0.iter().filter(|a| a.value).collect();
        trues.sort_by_key(|a| a.fingerprint());
        trues.dedup_by_key(|a| a.fingerprint());

        let deps = Self::dependency_edges(&trues);
        let mut pending: Vec<usize> = deps.iter().map(|d| d.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); trues.len()];
        for (i, d) in deps.iter().enumerate() {
            for &j in d {
                dependents[j].push(i);
            }
        }

        // Indices are in fingerprint order, so the smallest index is the tie-break
        let mut ready: BTreeSet<usize> = (0..trues.len()).filter(|&i| pending[i] == 0).collect();
        let mut done = vec![false; trues.len()];
        let mut ordered = Vec::with_capacity(self.0.len());

        while ordered.len() < trues.len() {
            let next = match ready.pop_first() {
                Some(i) => i,
                None => {
                    let Some(i) = (0..trues.len()).find(|&i| !done[i]) else {
                        break;
                    };
                    warn!(
                        "Dependency cycle detected, emitting {} first",
                        trues[i].fingerprint()
                    );
                    i
                }
            };
            if done[next] {
                continue;
            }
            done[next] = true;
            ordered.push(trues[next].clone());
            for &d in &dependents[next] {
                if pending[d] > 0 {
                    pending[d] -= 1;
                }
                if pending[d] == 0 && !done[d] {
                    ready.insert(d);
                }
            }
        }

        let mut falses: Vec<&Assertion> = self.0.iter().filter(|a| !a.value).collect();
        falses.sort_by_key(|a| a.fingerprint());
        falses.dedup_by_key(|a| a.fingerprint());
        ordered.extend(falses.into_iter().cloned());

        Self(ordered)
    }

    /// Check that every true dependency precedes its dependents
    pub fn ensure_order(&self) -> Result<()> {
        let trues: Vec<&Assertion> = self.0.iter().filter(|a| a.value).collect();
        let deps = Self::dependency_edges(&trues);
        for (i, d) in deps.iter().enumerate() {
            for &j in d {
                if j > i && !deps[j].contains(&i) {
                    return Err(Error::SolverError(format!(
                        "{} is ordered before its dependency {}",
                        trues[i].fingerprint(),
                        trues[j].fingerprint()
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

impl IntoIterator for AssertionList {
    type Item = Assertion;
    type IntoIter = std::vec::IntoIter<Assertion>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a AssertionList {
    type Item = &'a Assertion;
    type IntoIter = std::slice::Iter<'a, Assertion>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<Assertion> for AssertionList {
    fn from_iter<T: IntoIterator<Item = Assertion>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(name: &str, requires: &[&str]) -> Package {
        Package::new(name, name, "1.0").with_requires(
            requires
                .iter()
                .map(|r| Package::new(r, r, ">=1.0"))
                .collect(),
        )
    }

    fn chain() -> AssertionList {
        AssertionList::new(vec![
            Assertion::new(pkg("a", &["b"]), true),
            Assertion::new(pkg("e", &[]), false),
            Assertion::new(pkg("b", &["c"]), true),
            Assertion::new(pkg("c", &[]), true),
            Assertion::new(pkg("d", &[]), true),
        ])
    }

    fn names(list: &AssertionList) -> Vec<String> {
        list.iter().map(|a| a.package.name.clone()).collect()
    }

    #[test]
    fn test_order_puts_dependencies_first() {
        let ordered = chain().order();
        assert_eq!(names(&ordered), vec!["c", "b", "a", "d", "e"]);
        ordered.ensure_order().unwrap();
    }

    #[test]
    fn test_order_is_idempotent_and_permutation_invariant() {
        let ordered = chain().order();
        assert_eq!(ordered.order(), ordered);

        let mut reversed: Vec<Assertion> = chain().into_iter().collect();
        reversed.reverse();
        assert_eq!(AssertionList::new(reversed).order(), ordered);
    }

    #[test]
    fn test_order_breaks_cycles() {
        let list = AssertionList::new(vec![
            Assertion::new(pkg("x", &["y"]), true),
            Assertion::new(pkg("y", &["x"]), true),
        ]);
        assert_eq!(names(&list.order()), vec!["x", "y"]);
    }

    #[test]
    fn test_ensure_order_detects_violation() {
        let list = AssertionList::new(vec![
            Assertion::new(pkg("a", &["b"]), true),
            Assertion::new(pkg("b", &[]), true),
        ]);
        assert!(list.ensure_order().is_err());
    }

    #[test]
    fn test_cut() {
        let ordered = chain().order();
        let b = pkg("b", &["c"]);
        assert_eq!(names(&ordered.cut(&b)), vec!["c"]);
        assert_eq!(names(&ordered.cut_including(&b)), vec!["c", "b"]);
    }

    #[test]
    fn test_hash_ignores_false_assertions() {
        let ordered = chain().order();
        let without_e = ordered.drop(&pkg("e", &[]));
        assert_eq!(ordered.hash_with(|_| String::new()), without_e.hash_with(|_| String::new()));
        assert_ne!(
            ordered.hash_with(|_| String::new()),
            ordered.hash_with(|p| p.name.clone())
        );
    }

    #[test]
    fn test_trues_and_falses() {
        let list = chain();
        assert_eq!(list.trues().len(), 4);
        assert_eq!(list.falses().len(), 1);
        assert!(list.search("e/e-1.0").is_some_and(|a| !a.value));
    }

    #[test]
    fn test_yaml_serialization() {
        let yaml = chain().order().to_yaml().unwrap();
        let back: AssertionList = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, chain().order());
    }
}
