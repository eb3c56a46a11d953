use anyhow::{Context, Result, bail};
use glob::Pattern;
use lpack_lib::{
    Config, DEFAULT_ARCHIVE, DEFAULT_DATA_DIR, DEFAULT_IMAGE, DEFAULT_MANIFEST, DEFAULT_PLATFORM,
    DEFAULT_RUNTIME, DEFAULT_STAGING_DIR,
};
use std::{
    collections::HashMap,
    path::{Component, Path, PathBuf},
};

/// Prefix shared by every environment variable the tool reads.
pub const ENV_PREFIX: &str = "LPACK_";

/// Reads `LPACK_*` variables from the given environment snapshot.
pub fn read_env<I>(vars: I) -> Config
where
    I: IntoIterator<Item = (String, String)>,
{
    let vars: HashMap<String, String> = vars.into_iter().collect();

    macro_rules! get_env {
        ($key:expr) => {
            vars.get(&format!("{}{}", ENV_PREFIX, $key)).cloned()
        };
    }

    fn list(v: String) -> Vec<String> {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn flag(v: String) -> bool {
        v == "true" || v == "1" || v.eq_ignore_ascii_case("yes")
    }

    Config {
        workdir: get_env!("WORKDIR"),
        staging_dir: get_env!("STAGING_DIR"),
        archive: get_env!("ARCHIVE"),
        manifest: get_env!("MANIFEST"),
        image: get_env!("IMAGE"),
        platform: get_env!("PLATFORM"),
        runtime: get_env!("RUNTIME"),
        app_files: get_env!("APP_FILES").map(list),
        data_dir: get_env!("DATA_DIR"),
        skip: get_env!("SKIP").map(list),
        dry: get_env!("DRY").map(flag),
        keep_failed_staging: get_env!("KEEP_FAILED_STAGING").map(flag),
    }
}

/// Merge configs by priority: env < cli
pub fn merge_configs(env: Config, cli: Config) -> Config {
    fn pick<T>(env: Option<T>, cli: Option<T>) -> Option<T> {
        cli.or(env)
    }

    Config {
        workdir: pick(env.workdir, cli.workdir),
        staging_dir: pick(env.staging_dir, cli.staging_dir),
        archive: pick(env.archive, cli.archive),
        manifest: pick(env.manifest, cli.manifest),
        image: pick(env.image, cli.image),
        platform: pick(env.platform, cli.platform),
        runtime: pick(env.runtime, cli.runtime),
        app_files: pick(env.app_files, cli.app_files),
        data_dir: pick(env.data_dir, cli.data_dir),
        skip: pick(env.skip, cli.skip),
        dry: pick(env.dry, cli.dry),
        keep_failed_staging: pick(env.keep_failed_staging, cli.keep_failed_staging),
    }
}

/// Fully resolved packaging settings. All paths are absolute and rooted at
/// `workdir`; nothing downstream consults the process working directory.
#[derive(Debug, Clone)]
pub struct Settings {
    pub workdir: PathBuf,
    pub staging_dir: PathBuf,
    /// Staging directory relative to `workdir`, `/`-separated.
    pub staging_name: String,
    pub archive: PathBuf,
    /// Manifest relative to `workdir`, `/`-separated.
    pub manifest: String,
    pub image: String,
    pub platform: String,
    pub runtime: String,
    pub app_files: Vec<String>,
    pub data_dir: PathBuf,
    pub skip: Vec<Pattern>,
    pub keep_failed_staging: bool,
}

impl Settings {
    /// Resolves a merged config against `cwd`. Unset fields fall back to the
    /// defaults from `lpack_lib`.
    pub fn from_config(cfg: &Config, cwd: &Path) -> Result<Self> {
        let workdir = match cfg.workdir.as_deref() {
            Some(dir) if !dir.is_empty() => cwd.join(dir),
            _ => cwd.to_path_buf(),
        };

        let staging_rel = relative_inside(
            "staging_dir",
            cfg.staging_dir.as_deref().unwrap_or(DEFAULT_STAGING_DIR),
        )?;
        let archive_rel = relative_inside("archive", cfg.archive.as_deref().unwrap_or(DEFAULT_ARCHIVE))?;
        let manifest_rel =
            relative_inside("manifest", cfg.manifest.as_deref().unwrap_or(DEFAULT_MANIFEST))?;
        let data_rel = relative_inside("data_dir", cfg.data_dir.as_deref().unwrap_or(DEFAULT_DATA_DIR))?;

        if archive_rel.starts_with(&staging_rel) {
            bail!(
                "archive {} must not live inside the staging directory {}",
                archive_rel.display(),
                staging_rel.display()
            );
        }

        let app_files = cfg.app_files.clone().unwrap_or_else(|| {
            lpack_lib::DEFAULT_APP_FILES.iter().map(|s| s.to_string()).collect()
        });
        for name in &app_files {
            if Path::new(name).file_name().is_none() {
                bail!("application file entry {name:?} does not name a file");
            }
        }

        let skip = cfg
            .skip
            .as_ref()
            .map(|patterns| {
                patterns
                    .iter()
                    .map(|p| Pattern::new(p).with_context(|| format!("invalid skip pattern: {p}")))
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Settings {
            staging_dir: workdir.join(&staging_rel),
            staging_name: slash_path(&staging_rel),
            archive: workdir.join(&archive_rel),
            manifest: slash_path(&manifest_rel),
            data_dir: workdir.join(&data_rel),
            workdir,
            image: cfg.image.clone().unwrap_or_else(|| DEFAULT_IMAGE.to_string()),
            platform: cfg.platform.clone().unwrap_or_else(|| DEFAULT_PLATFORM.to_string()),
            runtime: cfg.runtime.clone().unwrap_or_else(|| DEFAULT_RUNTIME.to_string()),
            app_files,
            skip,
            keep_failed_staging: cfg.keep_failed_staging.unwrap_or(false),
        })
    }
}

/// Accepts only non-empty relative paths that cannot escape their base.
fn relative_inside(field: &str, value: &str) -> Result<PathBuf> {
    let path = Path::new(value);
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => bail!("{field} must be a relative path inside the working directory, got {value:?}"),
        }
    }
    if clean.as_os_str().is_empty() {
        bail!("{field} must not be empty or refer to the working directory itself");
    }
    Ok(clean)
}

/// Joins path components with `/`, the separator used inside containers and
/// zip archives.
pub fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
