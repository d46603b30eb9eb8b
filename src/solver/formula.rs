// src/solver/formula.rs

//! Propositional formulas over package fingerprints
//!
//! Variables are package fingerprints. Clauses and formulas are kept in
//! sorted sets so that the same relations always produce the same CNF,
//! whatever order packages were visited in.

use crate::package::Package;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A (possibly negated) package variable
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Literal {
    pub variable: String,
    pub positive: bool,
}

impl Literal {
    pub fn positive(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            positive: true,
        }
    }

    pub fn negative(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            positive: false,
        }
    }

    pub fn negate(&self) -> Self {
        Self {
            variable: self.variable.clone(),
            positive: !self.positive,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.positive {
            write!(f, "{}", self.variable)
        } else {
            write!(f, "¬{}", self.variable)
        }
    }
}

/// A disjunction of literals
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Clause(Vec<Literal>);

impl Clause {
    pub fn new(mut literals: Vec<Literal>) -> Self {
        literals.sort();
        literals.dedup();
        Self(literals)
    }

    pub fn unit(literal: Literal) -> Self {
        Self(vec![literal])
    }

    /// `a → b`, encoded as `¬a ∨ b`
    pub fn implies(a: &str, b: &str) -> Self {
        Self::new(vec![Literal::negative(a), Literal::positive(b)])
    }

    /// `¬(a ∧ b)`, encoded as `¬a ∨ ¬b`
    pub fn exclusive(a: &str, b: &str) -> Self {
        Self::new(vec![Literal::negative(a), Literal::negative(b)])
    }

    pub fn literals(&self) -> &[Literal] {
        &self.0
    }

    /// Always true because it contains both `x` and `¬x`
    pub fn is_tautology(&self) -> bool {
        self.0
            .windows(2)
            .any(|w| w[0].variable == w[1].variable && w[0].positive != w[1].positive)
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|l| l.to_string()).collect();
        write!(f, "({})", parts.join(" ∨ "))
    }
}

/// A conjunction of clauses
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Formula {
    clauses: BTreeSet<Clause>,
}

impl Formula {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, clause: Clause) {
        if !clause.is_tautology() {
            self.clauses.insert(clause);
        }
    }

    pub fn extend(&mut self, other: Formula) {
        self.clauses.extend(other.clauses);
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Clause> {
        self.clauses.iter()
    }

    pub fn contains(&self, clause: &Clause) -> bool {
        self.clauses.contains(clause)
    }

    /// Every variable mentioned by some clause
    pub fn variables(&self) -> BTreeSet<String> {
        self.clauses
            .iter()
            .flat_map(|c| c.literals().iter().map(|l| l.variable.clone()))
            .collect()
    }
}

impl FromIterator<Clause> for Formula {
    fn from_iter<T: IntoIterator<Item = Clause>>(iter: T) -> Self {
        let mut formula = Formula::new();
        for clause in iter {
            formula.add(clause);
        }
        formula
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.clauses.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join(" ∧ "))
    }
}

/// Maps variable names back to the packages they encode
#[derive(Debug, Clone, Default)]
pub struct VariableMap {
    packages: BTreeMap<String, Package>,
}

impl VariableMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the variable for a package; returns the variable name
    pub fn register(&mut self, package: &Package) -> String {
        let fingerprint = package.fingerprint();
        self.packages
            .entry(fingerprint.clone())
            .or_insert_with(|| package.clone());
        fingerprint
    }

    pub fn get(&self, variable: &str) -> Option<&Package> {
        self.packages.get(variable)
    }

    pub fn contains(&self, variable: &str) -> bool {
        self.packages.contains_key(variable)
    }

    pub fn merge(&mut self, other: VariableMap) {
        for (k, v) in other.packages {
            self.packages.entry(k).or_insert(v);
        }
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Package)> {
        self.packages.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clause_display_is_sorted() {
        let c = Clause::new(vec![Literal::positive("b/b-1.0"), Literal::negative("a/a-1.0")]);
        assert_eq!(c.to_string(), "(¬a/a-1.0 ∨ b/b-1.0)");
    }

    #[test]
    fn test_formula_dedups_and_drops_tautologies() {
        let mut f = Formula::new();
        f.add(Clause::implies("a", "b"));
        f.add(Clause::implies("a", "b"));
        f.add(Clause::new(vec![Literal::positive("x"), Literal::negative("x")]));
        assert_eq!(f.len(), 1);
        assert_eq!(f.variables().len(), 2);
    }

    #[test]
    fn test_formula_display() {
        let f: Formula = vec![
            Clause::unit(Literal::positive("a")),
            Clause::exclusive("b", "c"),
        ]
        .into_iter()
        .collect();
        assert_eq!(f.to_string(), "(a) ∧ (¬b ∨ ¬c)");
    }
}
