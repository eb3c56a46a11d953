use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use lpack_lib::Config;
use std::env;

mod config;
mod fs_utils;
mod packaging;
mod pipeline;
mod process;

use crate::config::{Settings, merge_configs, read_env};
use crate::pipeline::Outcome;
use crate::process::{ContainerCommand, SystemRunner};

/// Exit status when the configuration cannot be resolved.
const EXIT_INVALID_CONFIG: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "lpack", author, version, about = "Lambda deployment packager", long_about = None)]
pub struct Cli {
    /// Project directory holding the manifest and sources (default: current directory)
    #[arg(short, long)]
    pub workdir: Option<String>,

    /// Staging directory, relative to the project directory
    #[arg(long)]
    pub staging_dir: Option<String>,

    /// Output archive, relative to the project directory
    #[arg(short, long)]
    pub archive: Option<String>,

    /// Dependency manifest passed to pip
    #[arg(short, long)]
    pub manifest: Option<String>,

    /// Build image used for dependency installation
    #[arg(short, long)]
    pub image: Option<String>,

    /// Container platform to pin, e.g. linux/amd64
    #[arg(short, long)]
    pub platform: Option<String>,

    /// Container runtime executable [docker|podman]
    #[arg(long)]
    pub runtime: Option<String>,

    /// Application file to copy (can be specified multiple times)
    #[arg(long = "app-file")]
    pub app_files: Vec<String>,

    /// Data directory copied to `data/` in the archive
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Glob patterns excluded from the archive (can be specified multiple times)
    #[arg(short = 's', long)]
    pub skip: Vec<String>,

    /// Dry run (print the plan without touching anything)
    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    pub dry: bool,

    /// Keep the partial staging directory when dependency install fails
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub keep_failed_staging: bool,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    // env < CLI, then defaults
    let mut merged = merge_configs(read_env(env::vars()), cli_to_config(&cli));
    merged.apply_defaults();

    let settings = match env::current_dir()
        .context("resolving current directory")
        .and_then(|cwd| Settings::from_config(&merged, &cwd))
    {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(EXIT_INVALID_CONFIG);
        }
    };

    let result = if merged.dry.unwrap_or(false) {
        dry_run(&merged, &settings)
    } else {
        match pipeline::run(&settings, &SystemRunner) {
            Ok(Outcome::Packaged {
                archive,
                entries,
                bytes,
            }) => {
                info!("packaged {entries} entries ({bytes} bytes) into {}", archive.display());
                Ok(())
            }
            Ok(Outcome::Aborted(e)) => {
                debug!("pipeline aborted: {e:?}");
                std::process::exit(1);
            }
            Err(e) => Err(e),
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

/// Prints the effective configuration and what a real run would do.
fn dry_run(merged: &Config, settings: &Settings) -> Result<()> {
    println!("--- DRY RUN ---");
    print!("{}", serde_yaml::to_string(merged)?);
    println!("Working directory: {}", settings.workdir.display());
    println!("Install command: {}", ContainerCommand::pip_install(settings));

    println!("Application files:");
    for name in &settings.app_files {
        let state = if settings.workdir.join(name).is_file() {
            "found"
        } else {
            "missing"
        };
        println!("  {name} ({state})");
    }

    let data_state = if settings.data_dir.is_dir() {
        "found"
    } else {
        "absent"
    };
    println!("Data directory: {} ({data_state})", settings.data_dir.display());
    println!("Archive: {}", settings.archive.display());
    Ok(())
}

/// Converts CLI struct into Config. Unset flags stay `None` so the
/// environment can supply them.
fn cli_to_config(cli: &Cli) -> Config {
    fn non_empty(v: &[String]) -> Option<Vec<String>> {
        if v.is_empty() { None } else { Some(v.to_vec()) }
    }

    Config {
        workdir: cli.workdir.clone(),
        staging_dir: cli.staging_dir.clone(),
        archive: cli.archive.clone(),
        manifest: cli.manifest.clone(),
        image: cli.image.clone(),
        platform: cli.platform.clone(),
        runtime: cli.runtime.clone(),
        app_files: non_empty(&cli.app_files),
        data_dir: cli.data_dir.clone(),
        skip: non_empty(&cli.skip),
        dry: cli.dry.then_some(true),
        keep_failed_staging: cli.keep_failed_staging.then_some(true),
    }
}
