use anyhow::{Context, Result};
use async_zip::tokio::write::ZipFileWriter;
use async_zip::{Compression, ZipDateTime, ZipEntryBuilder};
use chrono::{DateTime, Datelike, Utc};
use log::debug;
use std::fs::Metadata;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::packaging::FileEntry;

/// DOS timestamps cannot represent anything earlier.
const ZIP_EPOCH_YEAR: i32 = 1980;

fn entry_builder(fe: &FileEntry, meta: &Metadata) -> ZipEntryBuilder {
    let mut builder = ZipEntryBuilder::new(fe.name_in_archive.clone().into(), Compression::Deflate);

    if let Ok(modified) = meta.modified() {
        let modified: DateTime<Utc> = modified.into();
        if modified.year() >= ZIP_EPOCH_YEAR {
            builder = builder.last_modification_date(ZipDateTime::from_chrono(&modified));
        }
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder = builder.unix_permissions((meta.permissions().mode() & 0xFFFF) as u16);
    }

    builder
}

/// Writes `files` into a new deflate-compressed archive at `path`, replacing
/// any existing file.
pub async fn save_zip_async(path: &Path, files: &[FileEntry]) -> Result<()> {
    // Create parent directories if they don't exist
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let mut f = File::create(path)
        .await
        .with_context(|| format!("creating archive {}", path.display()))?;
    let mut writer = ZipFileWriter::with_tokio(&mut f);

    for fe in files {
        let data = tokio::fs::read(&fe.path)
            .await
            .with_context(|| format!("reading {}", fe.path.display()))?;
        let meta = tokio::fs::metadata(&fe.path)
            .await
            .with_context(|| format!("reading metadata of {}", fe.path.display()))?;

        writer
            .write_entry_whole(entry_builder(fe, &meta), &data)
            .await
            .with_context(|| format!("adding {} to archive", fe.name_in_archive))?;
        debug!("zipped {} ({} bytes)", fe.name_in_archive, data.len());
    }

    writer.close().await.context("finishing archive")?;
    f.flush().await?;
    Ok(())
}

/// Reads an archive back as `(name, content)` pairs in stored order.
#[cfg(test)]
pub(crate) async fn read_archive_async(path: &Path) -> Vec<(String, Vec<u8>)> {
    use async_zip::base::read::mem::ZipFileReader;
    use futures::AsyncReadExt;

    let data = tokio::fs::read(path).await.unwrap();
    let reader = ZipFileReader::new(data).await.unwrap();
    let mut out = Vec::new();
    for i in 0..reader.file().entries().len() {
        let name = reader.file().entries()[i]
            .filename()
            .as_str()
            .unwrap()
            .to_string();
        let mut content = Vec::new();
        reader
            .reader_with_entry(i)
            .await
            .unwrap()
            .read_to_end(&mut content)
            .await
            .unwrap();
        out.push((name, content));
    }
    out
}

#[cfg(test)]
pub(crate) fn read_archive(path: &Path) -> Vec<(String, Vec<u8>)> {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(read_archive_async(path))
}
