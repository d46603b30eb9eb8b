// src/cli.rs
//! CLI definitions for kiln
//!
//! Argument parsing only; handlers live in the `commands` module.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(version)]
#[command(about = "Source package builds driven by a SAT solver and content-addressed images", long_about = None)]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ResolverArg {
    None,
    Explainer,
    Qlearning,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Solve an install request and print the ordered plan
    Solve {
        /// YAML list of available packages
        #[arg(short, long)]
        world: PathBuf,

        /// YAML list of installed packages; defaults to the configured database
        #[arg(short, long)]
        installed: Option<PathBuf>,

        /// Strategy for unsatisfiable requests, overriding the config
        #[arg(short, long, value_enum)]
        resolver: Option<ResolverArg>,

        /// Packages to install, as category/name[@selector]
        #[arg(required = true)]
        packages: Vec<String>,
    },

    /// Plan an upgrade of the installed packages
    Upgrade {
        #[arg(short, long)]
        world: PathBuf,

        #[arg(short, long)]
        installed: Option<PathBuf>,

        /// Also plan removal of packages no longer needed
        #[arg(long)]
        full: bool,
    },

    /// Print the build plan and image hashes of a package
    Tree {
        /// YAML list of compilation specs
        #[arg(short, long)]
        specs: PathBuf,

        /// Package as category/name[@version]
        package: String,
    },

    /// Compute the file delta between two rootfs directories or tarballs
    Delta {
        src: PathBuf,
        dst: PathBuf,
    },

    /// Pack a directory into an artifact
    Pack {
        /// Directory to pack
        src: PathBuf,

        /// Package as category/name@version
        package: String,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// none, gzip or zstd
        #[arg(long, default_value = "gzip")]
        compression: String,
    },

    /// Unpack an artifact, protecting modified files
    Unpack {
        /// Metadata sidecar of the artifact
        metadata: PathBuf,

        /// Destination directory
        dest: PathBuf,

        /// Preserve file permissions
        #[arg(long)]
        keep_perms: bool,
    },

    /// Check an artifact against its recorded checksum
    Verify {
        /// Metadata sidecar of the artifact
        metadata: PathBuf,
    },

    /// Compile packages into artifacts
    Build {
        /// YAML list of compilation specs
        #[arg(short, long)]
        specs: PathBuf,

        /// Output directory, overriding the config
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Push built images
        #[arg(long)]
        push: bool,

        /// Pull images before building
        #[arg(long)]
        pull: bool,

        /// Rebuild even when images exist
        #[arg(long)]
        rebuild: bool,

        /// Packages to build, as category/name[@version]
        #[arg(required = true)]
        packages: Vec<String>,
    },
}
