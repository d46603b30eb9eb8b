// src/compiler/mod.rs

//! Compilation orchestrator
//!
//! Compiling a package means:
//! 1. solving its build-time dependency tree
//! 2. hashing the ordered plan into image tags ([`HashTree`])
//! 3. materialising every dependency's step image, in plan order, each one
//!    built on top of the previous (or on its own base image)
//! 4. building the target's builder image (prelude) and step image (steps)
//! 5. packaging the delta between the two as the artifact
//!
//! Images are looked up before they are built: the push repository first,
//! then every pull repository. Nothing here runs build steps; all image work
//! goes through an [`ImageBackend`].

mod dockerfile;
pub mod hashtree;
pub mod options;
pub mod spec;
pub mod state;

pub use dockerfile::{BUILD_DIR, CopyFrom, render_builder, render_step};
pub use hashtree::HashTree;
pub use options::CompilerOptions;
pub use spec::{BuildDefinition, CompilationSpec, CopyField, SpecRegistry};
pub use state::{BuildProgress, BuildState};

use crate::artifact::{self, DeltaFilter, PackageArtifact};
use crate::backend::{ImageBackend, ImageBuildOptions};
use crate::db::{MemoryDatabase, PackageDatabase};
use crate::error::{Error, Result};
use crate::hash::Hasher;
use crate::package::Package;
use crate::solver::{AssertionList, ResolverType, Solver, SolverOptions};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Delay between registry checks while waiting for an image
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Drives an image backend to turn compilation specs into artifacts
pub struct Compiler {
    backend: Arc<dyn ImageBackend>,
    specs: SpecRegistry,
    database: MemoryDatabase,
    options: CompilerOptions,
    solver_options: SolverOptions,
    cancelled: AtomicBool,
    poll_interval: Duration,
}

/// Images created during one compile, removed afterwards unless kept
#[derive(Default)]
struct BuiltImages(Vec<String>);

impl Compiler {
    pub fn new(
        backend: Arc<dyn ImageBackend>,
        specs: SpecRegistry,
        options: CompilerOptions,
        solver_options: SolverOptions,
    ) -> Result<Self> {
        let database = specs.database()?;
        Ok(Self {
            backend,
            specs,
            database,
            options,
            solver_options,
            cancelled: AtomicBool::new(false),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub fn specs(&self) -> &SpecRegistry {
        &self.specs
    }

    /// Stop picking up new work; running backend commands finish
    pub fn cancel(&self) {
        info!("Compilation cancelled");
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Ordered build plan of `spec`: true assertions, dependencies first
    pub fn compute_dep_tree(&self, spec: &CompilationSpec) -> Result<AssertionList> {
        let installed = MemoryDatabase::new();
        let mut options = self.solver_options.clone();
        options.resolver = ResolverType::None;
        let solver = Solver::new(&self.database, &installed, options);

        let solution = solver.install(std::slice::from_ref(&spec.package))?;
        let plan: AssertionList = solution
            .order()
            .into_iter()
            .filter(|a| a.value)
            .collect();
        if plan.search(&spec.fingerprint()).is_none() {
            return Err(Error::PackageNotFound(format!(
                "{} is not part of its own build plan",
                spec.package
            )));
        }
        debug!("Build plan for {}: {} packages", spec.package, plan.len());
        Ok(plan)
    }

    pub fn hash_tree(&self, spec: &CompilationSpec) -> Result<HashTree> {
        let plan = self.compute_dep_tree(spec)?;
        HashTree::build(&plan, &spec.package, &self.specs)
    }

    /// First available reference for `tag` among the candidate repositories
    ///
    /// Local images always count; remote ones only with `pull_first`, in
    /// which case they are pulled.
    fn find_image(&self, tag: &str) -> Result<Option<String>> {
        for candidate in self.options.image_candidates(tag) {
            if self.backend.image_exists(&candidate) {
                debug!("Found local image {}", candidate);
                return Ok(Some(candidate));
            }
            if self.options.pull_first && self.backend.image_available(&candidate) {
                self.backend.download_image(&candidate)?;
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Resolve `tag` to an image reference, polling with `wait`
    pub fn resolve_image_name(&self, tag: &str) -> Result<Option<String>> {
        loop {
            if let Some(image) = self.find_image(tag)? {
                return Ok(Some(image));
            }
            if !self.options.wait {
                return Ok(None);
            }
            self.check_cancelled()?;
            info!("Waiting for image {}", tag);
            thread::sleep(self.poll_interval);
        }
    }

    fn build_image(&self, name: &str, dockerfile: String, context: PathBuf) -> Result<()> {
        self.backend.build_image(&ImageBuildOptions {
            image_name: name.to_string(),
            dockerfile,
            context,
        })?;
        if self.options.push {
            self.backend.push(name)?;
        }
        Ok(())
    }

    /// Compilation spec of the best build-database match for `selector`
    fn spec_for_selector(&self, selector: &Package) -> Result<&CompilationSpec> {
        let candidate = self.database.find_package_candidate(selector)?;
        let package = self.database.find_package(&candidate)?;
        self.specs.spec_for(&package)
    }

    /// `COPY --from` sources, with package references resolved to images
    fn resolve_copies(&self, spec: &CompilationSpec) -> Result<Vec<CopyFrom>> {
        spec.build
            .copy
            .iter()
            .map(|copy| {
                let image = match &copy.package {
                    Some(package) => {
                        let source = self.spec_for_selector(package)?;
                        let tree = self.hash_tree(source)?;
                        self.resolve_image_name(tree.package_hash())?.ok_or_else(|| {
                            Error::PackageNotFound(format!("no image for {}", package))
                        })?
                    }
                    None => copy.image.clone(),
                };
                Ok(CopyFrom {
                    image,
                    source: copy.source.clone(),
                    destination: copy.destination.clone(),
                })
            })
            .collect()
    }

    /// Image holding the artifacts of every joined package
    fn join_image(&self, spec: &CompilationSpec, built: &mut BuiltImages) -> Result<String> {
        let rootfs = TempDir::new()?;
        let mut hasher = Hasher::new();
        for package in &spec.build.join {
            let joined = self.spec_for_selector(package)?;
            let artifact = self.compile(joined)?;
            artifact.unpack(rootfs.path(), true)?;
            hasher.update_field(&artifact.hash()?);
        }

        let image = self.options.image_ref(&format!("join-{}", hasher.finalize()));
        if !self.backend.image_exists(&image) {
            artifact::build_scratch_image(rootfs.path(), &image, self.backend.as_ref())?;
            built.0.push(image.clone());
        }
        Ok(image)
    }

    /// Image a spec builds on: joined artifacts, its own base, or `previous`
    fn base_image(
        &self,
        spec: &CompilationSpec,
        previous: Option<&str>,
        built: &mut BuiltImages,
    ) -> Result<String> {
        if !spec.build.join.is_empty() {
            return self.join_image(spec, built);
        }
        if let Some(image) = spec.base_image() {
            return Ok(image.to_string());
        }
        previous.map(str::to_string).ok_or_else(|| {
            Error::InitError(format!("{} has no image to build from", spec.package))
        })
    }

    /// Build the builder and step images of a spec
    fn build_stages(
        &self,
        spec: &CompilationSpec,
        base: &str,
        builder_ref: &str,
        step_ref: &str,
        built: &mut BuiltImages,
    ) -> Result<()> {
        // Recipes without a directory build from an empty context
        let scratch = TempDir::new()?;
        let context = spec
            .context_dir()
            .unwrap_or_else(|| scratch.path().to_path_buf());
        let copies = self.resolve_copies(spec)?;

        self.build_image(builder_ref, render_builder(spec, base, &copies), context.clone())?;
        built.0.push(builder_ref.to_string());
        self.build_image(step_ref, render_step(spec, builder_ref), context)?;
        built.0.push(step_ref.to_string());
        Ok(())
    }

    /// Package what the step image added on top of the builder image
    fn package_stages(
        &self,
        spec: &CompilationSpec,
        builder_ref: &str,
        step_ref: &str,
        plan: &AssertionList,
    ) -> Result<PackageArtifact> {
        let mut filter = DeltaFilter::new(&spec.build.includes, &spec.build.excludes)?;
        if !spec.build.package_dir.is_empty() {
            filter = filter.with_package_dir(&spec.build.package_dir);
        }

        let mut artifact = PackageArtifact::for_package(
            &self.options.output_dir,
            &spec.package,
            self.options.compression_type,
        )
        .with_spec(spec.clone());
        artifact.source_assertion = plan.clone();

        let rootfs = TempDir::new()?;
        self.backend.extract_rootfs(step_ref, rootfs.path(), true)?;
        let concurrency = self.options.concurrency.max(1);
        if spec.build.unpack {
            artifact::package_rootfs(rootfs.path(), &filter, &mut artifact, concurrency)?;
        } else {
            let diff = self.backend.changes(builder_ref, step_ref)?;
            artifact::extract_from_delta(rootfs.path(), &diff, &filter, &mut artifact, concurrency)?;
        }
        Ok(artifact)
    }

    /// Make sure a dependency's step image exists, returning its reference
    fn compile_dependency(
        &self,
        tree: &HashTree,
        index: usize,
        previous: Option<&str>,
        built: &mut BuiltImages,
        artifacts: &mut Vec<PackageArtifact>,
    ) -> Result<String> {
        let Some(dep) = tree.dependencies.as_slice().get(index) else {
            return Err(Error::InitError(format!("no dependency at {}", index)));
        };
        let spec = self.specs.spec_for(&dep.package)?;

        if let Some(image) = self.resolve_image_name(&dep.hash.package_hash)? {
            info!("Using cached image {} for {}", image, dep.package);
            return Ok(image);
        }

        info!("Building dependency {}", dep.package);
        let fp = dep.fingerprint();
        let builder_tag = tree
            .builder_tag(&fp)
            .ok_or_else(|| Error::InitError(format!("no builder tag for {}", fp)))?;
        let builder_ref = self.options.image_ref(builder_tag);
        let step_ref = self.options.image_ref(&dep.hash.package_hash);

        let base = self.base_image(spec, previous, built)?;
        self.build_stages(spec, &base, &builder_ref, &step_ref, built)?;

        if !self.options.package_target_only {
            let plan = tree.plan.cut_including(&dep.package);
            let artifact = self.package_stages(spec, &builder_ref, &step_ref, &plan)?;
            artifact.write_yaml(&self.options.output_dir)?;
            artifacts.push(artifact);
        }
        Ok(step_ref)
    }

    fn cleanup(&self, built: BuiltImages) {
        if self.options.keep_img {
            return;
        }
        for image in built.0 {
            if let Err(e) = self.backend.remove_image(&image) {
                warn!("Failed to remove image {}: {}", image, e);
            }
        }
    }

    /// Compile one spec into an artifact
    ///
    /// With `only_deps` the returned artifact has no file of its own and
    /// only carries the dependency artifacts.
    pub fn compile(&self, spec: &CompilationSpec) -> Result<PackageArtifact> {
        let mut progress = BuildProgress::new(spec.fingerprint());
        let mut built = BuiltImages::default();
        let result = self.compile_with(spec, &mut progress, &mut built);
        if let Err(e) = &result {
            progress.fail(e);
        }
        self.cleanup(built);
        result
    }

    fn compile_with(
        &self,
        spec: &CompilationSpec,
        progress: &mut BuildProgress,
        built: &mut BuiltImages,
    ) -> Result<PackageArtifact> {
        self.check_cancelled()?;
        if !self.options.build_values_file.is_empty() {
            debug!("Build values files: {:?}", self.options.build_values_file);
        }
        let tree = self.hash_tree(spec)?;
        info!("Compiling {} ({})", spec.package, tree.package_hash());

        let mut dependencies = Vec::new();
        let mut previous: Option<String> = None;
        if !self.options.no_deps && !spec.is_virtual() {
            for index in 0..tree.dependencies.len() {
                self.check_cancelled()?;
                let image = self.compile_dependency(
                    &tree,
                    index,
                    previous.as_deref(),
                    built,
                    &mut dependencies,
                )?;
                previous = Some(image);
            }
        }
        progress.advance(BuildState::DependenciesReady)?;

        if self.options.only_deps {
            progress.advance(BuildState::Done)?;
            return Ok(PackageArtifact {
                dependencies,
                ..Default::default()
            });
        }

        if spec.is_virtual() {
            let empty = TempDir::new()?;
            let mut artifact = PackageArtifact::for_package(
                &self.options.output_dir,
                &spec.package,
                self.options.compression_type,
            )
            .with_spec(spec.clone());
            artifact.source_assertion = tree.hashed_plan();
            artifact.compress(empty.path(), self.options.concurrency.max(1))?;
            artifact.write_yaml(&self.options.output_dir)?;
            progress.advance(BuildState::ArtifactWritten)?;
            progress.advance(BuildState::Done)?;
            return Ok(artifact);
        }

        let builder_ref = self.options.image_ref(&tree.builder_image_hash);
        let step_ref = self.options.image_ref(tree.package_hash());
        let cached = !self.options.rebuild
            && self.backend.image_exists(&builder_ref)
            && self.backend.image_exists(&step_ref);

        if cached {
            info!("Reusing images of {}", spec.package);
            progress.advance(BuildState::BuilderImageAvailable)?;
            progress.advance(BuildState::StepImageAvailable)?;
        } else {
            let previous = match previous {
                Some(image) => Some(image),
                None if spec.base_image().is_none() && spec.build.join.is_empty() => {
                    self.resolve_image_name(&tree.source_hash)?
                }
                None => None,
            };
            let base = self.base_image(spec, previous.as_deref(), built)?;
            self.build_stages(spec, &base, &builder_ref, &step_ref, built)?;
            progress.advance(BuildState::BuilderImageAvailable)?;
            progress.advance(BuildState::StepImageAvailable)?;
        }

        self.check_cancelled()?;
        let mut artifact = self.package_stages(spec, &builder_ref, &step_ref, &tree.hashed_plan())?;
        progress.advance(BuildState::DeltaComputed)?;

        artifact.dependencies = dependencies;
        artifact.write_yaml(&self.options.output_dir)?;
        progress.advance(BuildState::ArtifactWritten)?;
        progress.advance(BuildState::Done)?;
        Ok(artifact)
    }

    /// Compile specs on `concurrency` workers
    ///
    /// Each spec fails on its own: a worker reports the error and picks up
    /// the next spec. Only cancellation stops pickup. Every error is returned
    /// alongside the artifacts that were produced.
    pub fn compile_parallel(&self, specs: &[CompilationSpec]) -> (Vec<PackageArtifact>, Vec<Error>) {
        let workers = self.options.concurrency.max(1);
        let (tx, rx) = flume::bounded::<&CompilationSpec>(workers);
        let (err_tx, err_rx) = flume::unbounded::<Error>();
        let artifacts = Mutex::new(Vec::new());

        thread::scope(|scope| {
            for _ in 0..workers {
                let rx = rx.clone();
                let err_tx = err_tx.clone();
                let artifacts = &artifacts;
                scope.spawn(move || {
                    for spec in rx.iter() {
                        if self.is_cancelled() {
                            return;
                        }
                        match self.compile(spec) {
                            Ok(artifact) => match artifacts.lock() {
                                Ok(mut list) => list.push(artifact),
                                Err(poisoned) => poisoned.into_inner().push(artifact),
                            },
                            Err(e) => {
                                let _ = err_tx.send(e);
                            }
                        }
                    }
                });
            }
            drop(rx);

            for spec in specs {
                if self.is_cancelled() || tx.send(spec).is_err() {
                    break;
                }
            }
            drop(tx);
        });
        drop(err_tx);

        let mut errors: Vec<Error> = err_rx.try_iter().collect();
        if self.is_cancelled() {
            errors.push(Error::Cancelled);
        }
        let artifacts = match artifacts.into_inner() {
            Ok(list) => list,
            Err(poisoned) => poisoned.into_inner(),
        };
        info!(
            "Compiled {} packages, {} errors",
            artifacts.len(),
            errors.len()
        );
        (artifacts, errors)
    }
}

/// Build plan summary: each package with its package hash
pub fn describe_tree(tree: &HashTree) -> Vec<(Package, String)> {
    tree.hashed_plan()
        .into_iter()
        .map(|a| (a.package, a.hash.package_hash))
        .collect()
}
