// src/commands.rs
//! Command handlers for the kiln CLI

use anyhow::{Context, Result};
use kiln::artifact::PackageArtifact;
use kiln::backend::Backend;
use kiln::compiler::{self, CompilationSpec, Compiler, SpecRegistry};
use kiln::compression::CompressionType;
use kiln::config::Config;
use kiln::db::{MemoryDatabase, PackageDatabase};
use kiln::delta;
use kiln::package::Package;
use kiln::solver::{ResolverType, Solver};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::cli::ResolverArg;

/// Parse `category/name[@version]`
pub fn parse_package(arg: &str) -> Result<Package> {
    let (id, version) = match arg.split_once('@') {
        Some((id, version)) => (id, version),
        None => (arg, ""),
    };
    let (category, name) = id
        .split_once('/')
        .with_context(|| format!("Expected category/name, got '{}'", arg))?;
    if category.is_empty() || name.is_empty() {
        anyhow::bail!("Expected category/name, got '{}'", arg);
    }
    Ok(Package::new(category, name, version))
}

fn load_packages(path: &Path) -> Result<Vec<Package>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn load_world(path: &Path) -> Result<MemoryDatabase> {
    Ok(MemoryDatabase::from_packages(&load_packages(path)?)?)
}

fn load_installed(config: &Config, path: Option<&Path>) -> Result<Box<dyn PackageDatabase>> {
    match path {
        Some(path) => Ok(Box::new(load_world(path)?)),
        None => Ok(config.database.open()?),
    }
}

fn load_specs(path: &Path) -> Result<SpecRegistry> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(SpecRegistry::from_yaml(&content)?)
}

fn find_spec<'a>(registry: &'a SpecRegistry, arg: &str) -> Result<&'a CompilationSpec> {
    let wanted = parse_package(arg)?;
    registry
        .iter()
        .filter(|s| s.package.same_name(&wanted))
        .filter(|s| wanted.version.is_empty() || s.package.version == wanted.version)
        .max_by(|a, b| kiln::package::compare(&a.package, &b.package))
        .with_context(|| format!("No build spec for {}", arg))
}

pub fn cmd_solve(
    config: &Config,
    world: &Path,
    installed: Option<&Path>,
    resolver: Option<ResolverArg>,
    packages: &[String],
) -> Result<()> {
    let definitions = load_world(world)?;
    let installed = load_installed(config, installed)?;
    let wanted = packages
        .iter()
        .map(|p| parse_package(p))
        .collect::<Result<Vec<_>>>()?;

    let mut options = config.solver.clone();
    if let Some(r) = resolver {
        options.resolver = match r {
            ResolverArg::None => ResolverType::None,
            ResolverArg::Explainer => ResolverType::Explainer,
            ResolverArg::Qlearning => ResolverType::QLearning,
        };
    }

    let solver = Solver::new(&definitions, installed.as_ref(), options);
    let plan = solver.install(&wanted)?.order();
    for assertion in plan.iter().filter(|a| a.value) {
        println!("{}", assertion.package);
    }
    Ok(())
}

pub fn cmd_upgrade(config: &Config, world: &Path, installed: Option<&Path>, full: bool) -> Result<()> {
    let definitions = load_world(world)?;
    let installed = load_installed(config, installed)?;
    let solver = Solver::new(&definitions, installed.as_ref(), config.solver.clone());

    let plan = solver.upgrade(false, full)?;
    for package in &plan.uninstall {
        println!("- {}", package);
    }
    for assertion in plan.install.order().iter().filter(|a| a.value) {
        println!("+ {}", assertion.package);
    }
    Ok(())
}

fn compiler_for(config: &Config, registry: SpecRegistry) -> Result<Compiler> {
    let backend = Backend::new(
        config.compiler.backend_type,
        config.compiler.backend_args.clone(),
    );
    Ok(Compiler::new(
        Arc::new(backend),
        registry,
        config.compiler.clone(),
        config.solver.clone(),
    )?)
}

pub fn cmd_tree(config: &Config, specs: &Path, package: &str) -> Result<()> {
    let registry = load_specs(specs)?;
    let spec = find_spec(&registry, package)?.clone();
    let compiler = compiler_for(config, registry)?;

    let tree = compiler.hash_tree(&spec)?;
    for (package, hash) in compiler::describe_tree(&tree) {
        println!("{}  {}", hash, package);
    }
    println!("builder: {}", tree.builder_image_hash);
    Ok(())
}

pub fn cmd_delta(src: &Path, dst: &Path) -> Result<()> {
    let diff = delta::compute_delta(src, dst)?;
    print!("{}", serde_yaml::to_string(&diff)?);
    Ok(())
}

pub fn cmd_pack(
    config: &Config,
    src: &Path,
    package: &str,
    output: &Path,
    compression: &str,
) -> Result<()> {
    let package = parse_package(package)?;
    let compression: CompressionType = compression.parse()?;
    let mut artifact = PackageArtifact::for_package(output, &package, compression);
    artifact.compress(src, config.compiler.concurrency)?;
    let metadata = artifact.write_yaml(output)?;
    println!("{}", artifact.path.display());
    info!("Metadata written to {}", metadata.display());
    Ok(())
}

pub fn cmd_unpack(metadata: &Path, dest: &Path, keep_perms: bool) -> Result<()> {
    let artifact = PackageArtifact::load_yaml(metadata)?;
    artifact.verify()?;
    artifact.unpack(dest, keep_perms)?;
    println!("Unpacked {} into {}", artifact.path.display(), dest.display());
    Ok(())
}

pub fn cmd_verify(metadata: &Path) -> Result<()> {
    let artifact = PackageArtifact::load_yaml(metadata)?;
    artifact.verify()?;
    println!("{}: OK", artifact.path.display());
    Ok(())
}

pub fn cmd_build(config: &Config, specs: &Path, packages: &[String]) -> Result<()> {
    let registry = load_specs(specs)?;
    let targets = packages
        .iter()
        .map(|p| find_spec(&registry, p).cloned())
        .collect::<Result<Vec<_>>>()?;
    let compiler = compiler_for(config, registry)?;

    let (artifacts, errors) = compiler.compile_parallel(&targets);
    for artifact in &artifacts {
        println!("{}", artifact.path.display());
    }
    if !errors.is_empty() {
        let report = errors
            .iter()
            .map(|e| format!("[{}] {}", e.kind(), e))
            .collect::<Vec<_>>()
            .join("\n");
        anyhow::bail!("{} build(s) failed:\n{}", errors.len(), report);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_package() {
        let p = parse_package("app/editor@>=1.2").unwrap();
        assert_eq!((p.category.as_str(), p.name.as_str(), p.version.as_str()), ("app", "editor", ">=1.2"));
        assert_eq!(parse_package("lib/z").unwrap().version, "");
        assert!(parse_package("nocategory").is_err());
        assert!(parse_package("/name").is_err());
    }
}
