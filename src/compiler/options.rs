// src/compiler/options.rs

use crate::backend::BackendType;
use crate::compression::CompressionType;
use crate::solver::default_concurrency;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Repository used when nothing else is configured
pub const DEFAULT_IMAGE_REPOSITORY: &str = "kiln/cache";

/// How the compiler builds, caches and publishes images
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    /// Repository every built image is tagged into
    pub push_image_repository: String,
    /// Repositories searched, in order, after the push repository
    pub pull_image_repositories: Vec<String>,
    /// Count remote images as available, pulling them when found
    pub pull_first: bool,
    /// Push images after building them
    pub push: bool,
    /// Keep built images after their artifacts are written
    pub keep_img: bool,
    pub concurrency: usize,
    pub compression_type: CompressionType,
    /// Poll for missing images instead of building them
    pub wait: bool,
    /// Build dependencies only, not the target
    pub only_deps: bool,
    /// Skip dependencies; their images must already exist
    pub no_deps: bool,
    /// Write an artifact for the target only
    pub package_target_only: bool,
    /// Rebuild target images even when they exist
    pub rebuild: bool,
    pub backend_args: Vec<String>,
    pub backend_type: BackendType,
    /// Value files for recipe templating, handed through to the recipe loader
    pub build_values_file: Vec<String>,
    /// Directory receiving artifacts and metadata
    pub output_dir: PathBuf,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            push_image_repository: DEFAULT_IMAGE_REPOSITORY.to_string(),
            pull_image_repositories: Vec::new(),
            pull_first: false,
            push: false,
            keep_img: true,
            concurrency: default_concurrency(),
            compression_type: CompressionType::None,
            wait: false,
            only_deps: false,
            no_deps: false,
            package_target_only: false,
            rebuild: false,
            backend_args: Vec::new(),
            backend_type: BackendType::Docker,
            build_values_file: Vec::new(),
            output_dir: PathBuf::from("build"),
        }
    }
}

impl CompilerOptions {
    /// Candidate references for a tag: push repository first, then pulls
    pub fn image_candidates(&self, tag: &str) -> Vec<String> {
        std::iter::once(&self.push_image_repository)
            .chain(self.pull_image_repositories.iter())
            .map(|repo| format!("{}:{}", repo, tag))
            .collect()
    }

    /// Reference an image is built under
    pub fn image_ref(&self, tag: &str) -> String {
        format!("{}:{}", self.push_image_repository, tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_candidates_order() {
        let opts = CompilerOptions {
            push_image_repository: "registry/cache".to_string(),
            pull_image_repositories: vec!["mirror/a".to_string(), "mirror/b".to_string()],
            ..Default::default()
        };
        assert_eq!(
            opts.image_candidates("abc"),
            vec!["registry/cache:abc", "mirror/a:abc", "mirror/b:abc"]
        );
        assert_eq!(opts.image_ref("builder-x"), "registry/cache:builder-x");
    }

    #[test]
    fn test_options_from_toml() {
        let opts: CompilerOptions = toml::from_str(
            "push = true\ncompression_type = \"zstd\"\nbackend_type = \"img\"\nkeep_img = false",
        )
        .unwrap();
        assert!(opts.push);
        assert!(!opts.keep_img);
        assert_eq!(opts.compression_type, CompressionType::Zstd);
        assert_eq!(opts.backend_type, BackendType::Img);
        assert_eq!(opts.push_image_repository, DEFAULT_IMAGE_REPOSITORY);
    }
}
