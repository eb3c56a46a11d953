//! The packaging pipeline: cleanup, staging, containerised dependency
//! install, file copy, archiving and the final size report.
//!
//! Steps run strictly in order. The only branch is the installer: when it
//! fails the run ends in [`Outcome::Aborted`] and nothing after it executes.

use anyhow::Result;
use log::{info, warn};
use std::path::PathBuf;

use crate::config::Settings;
use crate::fs_utils::{clean_paths, copy_app_files, copy_tree, create_staging, format_megabytes};
use crate::packaging::zip_directory_sync;
use crate::process::{CommandRunner, ContainerCommand, InstallError};

/// How a pipeline run ended when no filesystem error interrupted it.
#[derive(Debug)]
pub enum Outcome {
    Packaged {
        archive: PathBuf,
        entries: usize,
        bytes: u64,
    },
    Aborted(InstallError),
}

/// Runs the whole pipeline. Filesystem errors propagate; an installer
/// failure is reported on the console and returned as [`Outcome::Aborted`].
pub fn run(settings: &Settings, runner: &dyn CommandRunner) -> Result<Outcome> {
    println!("🚀 Starting Lambda deployment packaging...");

    clean_paths(&[&settings.staging_dir, &settings.archive])?;
    create_staging(&settings.staging_dir)?;

    println!(
        "📦 Installing dependencies inside {} ({})...",
        settings.runtime, settings.platform
    );
    let command = ContainerCommand::pip_install(settings);
    if let Err(e) = runner.run(&command) {
        println!("❌ Dependency install failed: {e}");
        if settings.keep_failed_staging {
            warn!(
                "leaving partial staging directory at {}",
                settings.staging_dir.display()
            );
        } else {
            clean_paths(&[&settings.staging_dir])?;
        }
        return Ok(Outcome::Aborted(e));
    }

    println!("📄 Copying application files...");
    let report = copy_app_files(&settings.workdir, &settings.app_files, &settings.staging_dir)?;
    for name in &report.missing {
        println!("⚠️ Warning: {name} not found, skipping.");
    }

    if settings.data_dir.is_dir() {
        let dest = settings.staging_dir.join("data");
        let copied = copy_tree(&settings.data_dir, &dest)?;
        info!("copied {copied} data files into {}", dest.display());
    }

    println!("🤐 Creating zip file...");
    let summary = zip_directory_sync(&settings.staging_dir, &settings.skip, &settings.archive)?;

    println!(
        "✅ Success! Created {} ({})",
        archive_label(settings),
        format_megabytes(summary.bytes)
    );

    Ok(Outcome::Packaged {
        archive: settings.archive.clone(),
        entries: summary.entries,
        bytes: summary.bytes,
    })
}

fn archive_label(settings: &Settings) -> String {
    settings
        .archive
        .strip_prefix(&settings.workdir)
        .unwrap_or(&settings.archive)
        .display()
        .to_string()
}
