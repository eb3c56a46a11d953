use serde::{Deserialize, Serialize};

pub const DEFAULT_STAGING_DIR: &str = "lambda-package";
pub const DEFAULT_ARCHIVE: &str = "lambda-deployment.zip";
pub const DEFAULT_MANIFEST: &str = "requirements.txt";
/// SAM build image; it ships the toolchain needed by native extensions.
pub const DEFAULT_IMAGE: &str = "public.ecr.aws/sam/build-python3.12:latest";
pub const DEFAULT_PLATFORM: &str = "linux/amd64";
pub const DEFAULT_RUNTIME: &str = "docker";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_APP_FILES: [&str; 4] =
    ["server.py", "lambda_handler.py", "context.py", "resources.py"];

/// Packaging configuration. Every field is optional so that sources can be
/// layered before defaults are applied.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub workdir: Option<String>,
    pub staging_dir: Option<String>,
    pub archive: Option<String>,
    pub manifest: Option<String>,
    pub image: Option<String>,
    pub platform: Option<String>,
    pub runtime: Option<String>,
    pub app_files: Option<Vec<String>>,
    pub data_dir: Option<String>,
    pub skip: Option<Vec<String>>,
    pub dry: Option<bool>,
    pub keep_failed_staging: Option<bool>,
}

impl Config {
    /// Fills every unset field with its hardcoded default.
    ///
    /// `workdir` is left alone: it defaults to the process working directory,
    /// which only the binary knows.
    pub fn apply_defaults(&mut self) {
        fn fill(slot: &mut Option<String>, value: &str) {
            if slot.is_none() {
                *slot = Some(value.to_string());
            }
        }

        fill(&mut self.staging_dir, DEFAULT_STAGING_DIR);
        fill(&mut self.archive, DEFAULT_ARCHIVE);
        fill(&mut self.manifest, DEFAULT_MANIFEST);
        fill(&mut self.image, DEFAULT_IMAGE);
        fill(&mut self.platform, DEFAULT_PLATFORM);
        fill(&mut self.runtime, DEFAULT_RUNTIME);
        fill(&mut self.data_dir, DEFAULT_DATA_DIR);

        if self.app_files.is_none() {
            self.app_files = Some(DEFAULT_APP_FILES.iter().map(|s| s.to_string()).collect());
        }
        if self.skip.is_none() {
            self.skip = Some(Vec::new());
        }
        if self.dry.is_none() {
            self.dry = Some(false);
        }
        if self.keep_failed_staging.is_none() {
            self.keep_failed_staging = Some(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_lambda_layout() {
        let mut cfg = Config::default();
        cfg.apply_defaults();

        assert_eq!(cfg.staging_dir.as_deref(), Some("lambda-package"));
        assert_eq!(cfg.archive.as_deref(), Some("lambda-deployment.zip"));
        assert_eq!(cfg.manifest.as_deref(), Some("requirements.txt"));
        assert_eq!(cfg.platform.as_deref(), Some("linux/amd64"));
        assert_eq!(cfg.runtime.as_deref(), Some("docker"));
        assert_eq!(cfg.data_dir.as_deref(), Some("data"));
        assert_eq!(
            cfg.app_files.as_deref(),
            Some(
                &[
                    "server.py".to_string(),
                    "lambda_handler.py".to_string(),
                    "context.py".to_string(),
                    "resources.py".to_string(),
                ][..]
            )
        );
        assert_eq!(cfg.skip, Some(Vec::new()));
        assert_eq!(cfg.dry, Some(false));
        assert!(cfg.workdir.is_none());
    }

    #[test]
    fn explicit_values_survive_defaults() {
        let mut cfg = Config {
            archive: Some("out.zip".into()),
            app_files: Some(vec!["main.py".into()]),
            dry: Some(true),
            ..Config::default()
        };
        cfg.apply_defaults();

        assert_eq!(cfg.archive.as_deref(), Some("out.zip"));
        assert_eq!(cfg.app_files, Some(vec!["main.py".to_string()]));
        assert_eq!(cfg.dry, Some(true));
        assert_eq!(cfg.staging_dir.as_deref(), Some(DEFAULT_STAGING_DIR));
    }

    #[test]
    fn partial_yaml_leaves_missing_fields_unset() {
        let cfg: Config = serde_yaml::from_str("image: python:3.12\nskip: ['*.pyc']\n").unwrap();

        assert_eq!(cfg.image.as_deref(), Some("python:3.12"));
        assert_eq!(cfg.skip, Some(vec!["*.pyc".to_string()]));
        assert!(cfg.archive.is_none());
    }
}
