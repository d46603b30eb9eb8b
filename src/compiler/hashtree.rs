// src/compiler/hashtree.rs

//! Content-addressed image tags for a build plan
//!
//! Every true assertion gets two hashes over the ordered plan, each entry
//! salted with its package's recipe digest:
//! - build hash: the plan cut before the package
//! - package hash: the plan up to and including the package
//!
//! Builder images are tagged with the package fingerprint hashed against the
//! target's package hash, so the same dependency gets a distinct builder in
//! every solution it takes part in.

use super::spec::SpecRegistry;
use crate::error::{Error, Result};
use crate::package::Package;
use crate::solver::{Assertion, AssertionHash, AssertionList};
use std::collections::BTreeMap;

/// Prefix of every builder image tag
pub const BUILDER_PREFIX: &str = "builder-";

#[derive(Debug, Clone)]
pub struct HashTree {
    /// The target assertion, hashed
    pub target: Assertion,
    /// Dependencies in build order, hashed
    pub dependencies: AssertionList,
    /// Whole ordered plan the hashes were computed over
    pub plan: AssertionList,
    /// Builder image tag for the target
    pub builder_image_hash: String,
    /// Tag of the image the target builds on when it has no base image
    pub source_hash: String,
    builder_tags: BTreeMap<String, String>,
}

impl HashTree {
    /// Hash an ordered plan of true assertions for `target`
    pub fn build(plan: &AssertionList, target: &Package, specs: &SpecRegistry) -> Result<Self> {
        let salt = |p: &Package| specs.digest(p);
        let mut target_assertion = plan
            .search(&target.fingerprint())
            .cloned()
            .ok_or_else(|| Error::PackageNotFound(format!("{} is not in its own build plan", target)))?;
        target_assertion.hash = AssertionHash {
            build_hash: plan.cut(target).hash_with(salt),
            package_hash: plan.hash_with(salt),
        };
        let target_hash = target_assertion.hash.package_hash.clone();

        let mut dependencies = plan.drop(target);
        let mut builder_tags = BTreeMap::new();
        for dep in dependencies.iter_mut().filter(|a| a.value) {
            dep.hash = AssertionHash {
                build_hash: plan.cut(&dep.package).hash_with(salt),
                package_hash: plan.hash_from(&dep.package, salt),
            };

            let seeded = specs
                .get(&dep.fingerprint())
                .map(|s| s.base_image().is_some())
                .unwrap_or(false);
            let tag = if seeded {
                dep.hash.build_hash.clone()
            } else {
                format!("{}{}", BUILDER_PREFIX, dep.package.hash_fingerprint(&target_hash))
            };
            builder_tags.insert(dep.fingerprint(), tag);
        }

        let source_hash = dependencies
            .iter()
            .filter(|a| a.value)
            .last()
            .map(|a| a.hash.package_hash.clone())
            .unwrap_or_else(|| target_hash.clone());
        let builder_image_hash = format!("{}{}", BUILDER_PREFIX, target.hash_fingerprint(&target_hash));

        Ok(Self {
            target: target_assertion,
            dependencies,
            plan: plan.clone(),
            builder_image_hash,
            source_hash,
            builder_tags,
        })
    }

    /// Hash identifying the target's step image
    pub fn package_hash(&self) -> &str {
        &self.target.hash.package_hash
    }

    /// Builder image tag for a dependency
    pub fn builder_tag(&self, fingerprint: &str) -> Option<&str> {
        self.builder_tags.get(fingerprint).map(String::as_str)
    }

    /// Plan with every assertion's hashes filled in
    pub fn hashed_plan(&self) -> AssertionList {
        let mut out: AssertionList = self.dependencies.iter().cloned().collect();
        out.push(self.target.clone());
        out
    }
}
