use anyhow::{Context, Result};
use glob::Pattern;
use log::debug;
use std::{
    fs::{self, File, FileTimes},
    io::ErrorKind,
    path::{Path, PathBuf},
};

use crate::config::slash_path;

/// Removes each path if present: directories recursively, anything else as a
/// single file. Already-absent paths are not an error.
pub fn clean_paths<P: AsRef<Path>>(paths: &[P]) -> Result<()> {
    for path in paths {
        let path = path.as_ref();
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e).with_context(|| format!("inspecting {}", path.display())),
        };

        if meta.is_dir() {
            fs::remove_dir_all(path).with_context(|| format!("removing directory {}", path.display()))?;
        } else {
            fs::remove_file(path).with_context(|| format!("removing file {}", path.display()))?;
        }
        debug!("removed {}", path.display());
    }
    Ok(())
}

/// Creates the staging directory. Must run after [`clean_paths`], so an
/// existing directory here is an error like any other.
pub fn create_staging(dir: &Path) -> Result<()> {
    if let Some(parent) = dir.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::create_dir(dir).with_context(|| format!("creating staging directory {}", dir.display()))
}

/// Result of copying the application file list.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CopyReport {
    pub copied: Vec<String>,
    pub missing: Vec<String>,
}

/// Copies each listed file from `workdir` into the root of `staging`,
/// keeping its timestamps. Missing files are recorded, not fatal.
pub fn copy_app_files(workdir: &Path, names: &[String], staging: &Path) -> Result<CopyReport> {
    let mut report = CopyReport::default();

    for name in names {
        let src = workdir.join(name);
        let Some(file_name) = src.file_name() else {
            report.missing.push(name.clone());
            continue;
        };

        if !src.is_file() {
            report.missing.push(name.clone());
            continue;
        }

        let dest = staging.join(file_name);
        let bytes = copy_with_times(&src, &dest)?;
        debug!("copied {} ({bytes} bytes)", src.display());
        report.copied.push(name.clone());
    }

    Ok(report)
}

/// Recursively copies `src` into `dest`, merging into whatever already
/// exists there and overwriting conflicting files. Returns the number of
/// files copied.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<usize> {
    fs::create_dir_all(dest).with_context(|| format!("creating {}", dest.display()))?;

    let mut copied = 0;
    for entry in fs::read_dir(src).with_context(|| format!("reading directory {src:?}"))? {
        let entry = entry?;
        let path = entry.path();
        let target = dest.join(entry.file_name());

        if path.is_dir() {
            copied += copy_tree(&path, &target)?;
        } else {
            copy_with_times(&path, &target)?;
            debug!("copied {} -> {}", path.display(), target.display());
            copied += 1;
        }
    }
    Ok(copied)
}

fn copy_with_times(src: &Path, dest: &Path) -> Result<u64> {
    let bytes = fs::copy(src, dest)
        .with_context(|| format!("copying {} to {}", src.display(), dest.display()))?;

    let meta = fs::metadata(src).with_context(|| format!("reading metadata of {}", src.display()))?;
    let mut times = FileTimes::new().set_modified(meta.modified()?);
    if let Ok(accessed) = meta.accessed() {
        times = times.set_accessed(accessed);
    }

    // Read-only sources produce read-only copies.
    let file = File::options()
        .write(true)
        .open(dest)
        .or_else(|_| File::open(dest))
        .with_context(|| format!("opening {}", dest.display()))?;
    file.set_times(times)
        .with_context(|| format!("setting timestamps on {}", dest.display()))?;

    Ok(bytes)
}

/// Recursively lists every file under `root` as `(relative name, path)`
/// pairs, sorted by name. Names use `/` separators; any name matching a
/// `skip` pattern is left out, and skipped directories are not descended.
/// Symlinks to directories are neither descended nor listed; symlinks to
/// files are listed and archived by content.
pub fn list_files(root: &Path, skip: &[Pattern]) -> Result<Vec<(String, PathBuf)>> {
    fn walk_dir(
        root: &Path,
        dir: &Path,
        patterns: &[Pattern],
        result: &mut Vec<(String, PathBuf)>,
    ) -> Result<()> {
        for entry in fs::read_dir(dir).with_context(|| format!("reading directory {dir:?}"))? {
            let entry = entry?;
            let path = entry.path();
            let name = slash_path(path.strip_prefix(root).unwrap_or(&path));

            if patterns.iter().any(|p| p.matches(&name)) {
                debug!("skipping {name}");
                continue;
            }

            let file_type = entry
                .file_type()
                .with_context(|| format!("reading file type of {}", path.display()))?;
            if file_type.is_dir() {
                walk_dir(root, &path, patterns, result)?;
            } else if file_type.is_symlink() && path.is_dir() {
                debug!("not following directory symlink {name}");
            } else {
                result.push((name, path));
            }
        }
        Ok(())
    }

    let mut result = Vec::new();
    walk_dir(root, root, skip, &mut result)?;
    result.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(result)
}

/// Formats a byte count as binary megabytes with two decimals.
pub fn format_megabytes(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn clean_paths_removes_dirs_and_files_and_ignores_absent() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("lambda-package");
        let zip = tmp.path().join("lambda-deployment.zip");
        write(&dir.join("nested/file.txt"), "x");
        write(&zip, "old");

        clean_paths(&[&dir, &zip]).unwrap();
        assert!(!dir.exists());
        assert!(!zip.exists());

        clean_paths(&[&dir, &zip]).unwrap();
    }

    #[test]
    fn create_staging_fails_when_stale_dir_remains() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("pkg");
        create_staging(&dir).unwrap();
        assert!(dir.is_dir());
        assert!(create_staging(&dir).is_err());
    }

    #[test]
    fn app_files_keep_content_and_mtime() {
        let tmp = TempDir::new().unwrap();
        let staging = tmp.path().join("pkg");
        fs::create_dir(&staging).unwrap();
        write(&tmp.path().join("lambda_handler.py"), "def handler(): pass\n");
        write(&tmp.path().join("server.py"), "app = None\n");

        let old = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        File::options()
            .write(true)
            .open(tmp.path().join("server.py"))
            .unwrap()
            .set_modified(old)
            .unwrap();

        let names: Vec<String> = ["server.py", "lambda_handler.py", "context.py", "resources.py"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let report = copy_app_files(tmp.path(), &names, &staging).unwrap();

        assert_eq!(report.copied, vec!["server.py", "lambda_handler.py"]);
        assert_eq!(report.missing, vec!["context.py", "resources.py"]);
        assert_eq!(
            fs::read_to_string(staging.join("lambda_handler.py")).unwrap(),
            "def handler(): pass\n"
        );
        let copied_mtime = fs::metadata(staging.join("server.py")).unwrap().modified().unwrap();
        assert_eq!(copied_mtime, old);
        assert!(!staging.join("context.py").exists());
    }

    #[test]
    fn copy_tree_preserves_structure_and_merges() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("data");
        write(&src.join("a.txt"), "alpha");
        write(&src.join("sub/b.txt"), "beta");

        let dest = tmp.path().join("pkg/data");
        write(&dest.join("a.txt"), "stale");
        write(&dest.join("keep.txt"), "kept");

        let copied = copy_tree(&src, &dest).unwrap();
        assert_eq!(copied, 2);
        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "alpha");
        assert_eq!(fs::read_to_string(dest.join("sub/b.txt")).unwrap(), "beta");
        assert_eq!(fs::read_to_string(dest.join("keep.txt")).unwrap(), "kept");
    }

    #[test]
    fn list_files_is_relative_sorted_and_skips() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("lambda_handler.py"), "");
        write(&tmp.path().join("data/sub/b.txt"), "");
        write(&tmp.path().join("pkg/__pycache__/x.pyc"), "");
        write(&tmp.path().join("pkg/mod.py"), "");

        let skip = vec![Pattern::new("**/__pycache__").unwrap()];
        let names: Vec<String> = list_files(tmp.path(), &skip)
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();

        assert_eq!(names, vec!["data/sub/b.txt", "lambda_handler.py", "pkg/mod.py"]);
    }

    #[cfg(unix)]
    #[test]
    fn list_files_does_not_follow_directory_symlinks() {
        use std::os::unix::fs::symlink;

        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("pkg");
        write(&root.join("handler.py"), "");
        write(&root.join("real/x.py"), "");
        symlink(root.join("real"), root.join("alias")).unwrap();
        symlink(root.join("handler.py"), root.join("entry.py")).unwrap();
        fs::create_dir_all(root.join("a")).unwrap();
        symlink(&root, root.join("a/loop")).unwrap();

        let names: Vec<String> = list_files(&root, &[])
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();

        assert_eq!(names, vec!["entry.py", "handler.py", "real/x.py"]);
    }

    #[rstest]
    #[case(2_097_152, "2.00 MB")]
    #[case(0, "0.00 MB")]
    #[case(1_572_864, "1.50 MB")]
    #[case(10_000, "0.01 MB")]
    fn megabytes_use_binary_units(#[case] bytes: u64, #[case] expected: &str) {
        assert_eq!(format_megabytes(bytes), expected);
    }
}
