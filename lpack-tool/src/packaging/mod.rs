use anyhow::{Context, Result};
use glob::Pattern;
use log::info;
use std::path::{Path, PathBuf};
use tokio::runtime::Builder;

use crate::fs_utils::list_files;
use crate::packaging::zip::save_zip_async;

pub mod zip;

/// Represents a file to include in the ZIP archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub name_in_archive: String,
}

/// What ended up in a finished archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub bytes: u64,
}

/// Lists every file under `root` with its archive name relative to `root`,
/// so the archive top level is the root's contents rather than the root
/// directory itself.
pub fn entries_for(root: &Path, skip: &[Pattern]) -> Result<Vec<FileEntry>> {
    Ok(list_files(root, skip)?
        .into_iter()
        .map(|(name_in_archive, path)| FileEntry {
            path,
            name_in_archive,
        })
        .collect())
}

/// Zips the contents of `root` into `output` with deflate compression,
/// managing its own async runtime.
///
/// This is the main entrypoint for the synchronous pipeline.
pub fn zip_directory_sync(root: &Path, skip: &[Pattern], output: &Path) -> Result<ArchiveSummary> {
    let files = entries_for(root, skip)?;

    let rt = Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(save_zip_async(output, &files))?;

    let bytes = std::fs::metadata(output)
        .with_context(|| format!("reading size of {}", output.display()))?
        .len();
    info!("wrote {} entries to {} ({bytes} bytes)", files.len(), output.display());

    Ok(ArchiveSummary {
        entries: files.len(),
        bytes,
    })
}
