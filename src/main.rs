// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use kiln::config::Config;
use kiln::Error;
use tracing_subscriber::EnvFilter;

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    }
}

fn run(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Solve {
            world,
            installed,
            resolver,
            packages,
        } => commands::cmd_solve(&config, &world, installed.as_deref(), resolver, &packages),
        Commands::Upgrade {
            world,
            installed,
            full,
        } => commands::cmd_upgrade(&config, &world, installed.as_deref(), full),
        Commands::Tree { specs, package } => commands::cmd_tree(&config, &specs, &package),
        Commands::Delta { src, dst } => commands::cmd_delta(&src, &dst),
        Commands::Pack {
            src,
            package,
            output,
            compression,
        } => commands::cmd_pack(&config, &src, &package, &output, &compression),
        Commands::Unpack {
            metadata,
            dest,
            keep_perms,
        } => commands::cmd_unpack(&metadata, &dest, keep_perms),
        Commands::Verify { metadata } => commands::cmd_verify(&metadata),
        Commands::Build {
            specs,
            output,
            push,
            pull,
            rebuild,
            packages,
        } => {
            let mut config = config;
            if let Some(output) = output {
                config.compiler.output_dir = output;
            }
            config.compiler.push |= push;
            config.compiler.pull_first |= pull;
            config.compiler.rebuild |= rebuild;
            commands::cmd_build(&config, &specs, &packages)
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    let default_level = if cli.verbose {
        "debug".to_string()
    } else {
        config.general.log_level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli, config) {
        match e.downcast_ref::<Error>() {
            Some(err) => eprintln!("Error [{}]: {}", err.kind(), err),
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}
