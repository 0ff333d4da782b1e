//! Pipeline settings and their YAML loader.
//!
//! `MainSettings` is read from `{root}/data/{project}/settings.yaml` and `S3Settings` from
//! `{root}/data/s3_settings.yaml`. Both are immutable once a run starts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const MAIN_SETTINGS_FILE: &str = "settings.yaml";
const S3_SETTINGS_FILE: &str = "s3_settings.yaml";

/// Top-level pipeline configuration shared with the remote services.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MainSettings {
    #[serde(default)]
    pub general: GeneralSettings,
    #[serde(default)]
    pub train_relevance: TrainingSettings,
    #[serde(default)]
    pub train_kpi: TrainingSettings,
    /// Sections the router does not interpret (extraction, curation, ...). They are
    /// forwarded to the services untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    pub project_name: String,
    pub ext_ip: String,
    pub ext_port: u16,
    pub infer_ip: String,
    pub infer_port: u16,
    pub s3_usage: bool,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            project_name: String::new(),
            ext_ip: "0.0.0.0".to_string(),
            ext_port: 8000,
            infer_ip: "0.0.0.0".to_string(),
            infer_port: 8000,
            s3_usage: false,
        }
    }
}

/// Shared shape of the `train_relevance` and `train_kpi` sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// Enable flag for this training stage.
    pub train: bool,
    pub output_model_name: String,
}

impl MainSettings {
    pub fn validate(&self) -> Result<()> {
        let general = &self.general;
        if general.project_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "general.project_name must not be empty".to_string(),
            ));
        }
        for (field, host) in [("ext_ip", &general.ext_ip), ("infer_ip", &general.infer_ip)] {
            if host.trim().is_empty() {
                return Err(ConfigError::InvalidValue(format!(
                    "general.{field} must not be empty"
                )));
            }
        }
        for (field, port) in [("ext_port", general.ext_port), ("infer_port", general.infer_port)] {
            if port == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "general.{field} must be a non-zero port"
                )));
            }
        }
        for (section, training) in [
            ("train_relevance", &self.train_relevance),
            ("train_kpi", &self.train_kpi),
        ] {
            if training.train && training.output_model_name.trim().is_empty() {
                return Err(ConfigError::InvalidValue(format!(
                    "{section}.output_model_name is required when {section}.train is enabled"
                )));
            }
        }
        Ok(())
    }
}

/// Object storage credentials. The router only hands them on to the text merger.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Settings {
    pub prefix: String,
    pub main_bucket: S3Bucket,
    pub interim_bucket: S3Bucket,
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Bucket {
    pub s3_endpoint: String,
    pub s3_access_key: String,
    pub s3_secret_key: String,
    pub s3_bucket_name: String,
}

impl fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Settings")
            .field("prefix", &self.prefix)
            .field("main_bucket", &self.main_bucket)
            .field("interim_bucket", &self.interim_bucket)
            .finish()
    }
}

impl fmt::Debug for S3Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Bucket")
            .field("s3_endpoint", &self.s3_endpoint)
            .field("s3_access_key", &"<redacted>")
            .field("s3_secret_key", &"<redacted>")
            .field("s3_bucket_name", &self.s3_bucket_name)
            .finish()
    }
}

/// Locates and reads the settings files for one project.
#[derive(Debug, Clone)]
pub struct SettingsHandler {
    main_path: PathBuf,
    s3_path: PathBuf,
}

impl SettingsHandler {
    /// Default file locations below `root`.
    pub fn new(root: &Path, project_name: &str) -> Self {
        let data = root.join("data");
        Self {
            main_path: data.join(project_name).join(MAIN_SETTINGS_FILE),
            s3_path: data.join(S3_SETTINGS_FILE),
        }
    }

    pub fn with_main_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.main_path = path.into();
        self
    }

    pub fn with_s3_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.s3_path = path.into();
        self
    }

    pub fn main_path(&self) -> &Path {
        &self.main_path
    }

    pub fn s3_path(&self) -> &Path {
        &self.s3_path
    }

    /// Read both files. `project_name` replaces whatever the main file declares.
    pub fn read_settings(&self, project_name: &str) -> Result<(MainSettings, S3Settings)> {
        let mut main: MainSettings = read_setting_file(&self.main_path)?;
        if !main.general.project_name.is_empty() && main.general.project_name != project_name {
            warn!(
                file_project = %main.general.project_name,
                cli_project = %project_name,
                "project name in settings file differs; using the command line value"
            );
        }
        main.general.project_name = project_name.to_string();
        main.validate()?;

        let s3 = if self.s3_path.exists() {
            read_setting_file(&self.s3_path)?
        } else if main.general.s3_usage {
            return Err(ConfigError::FileNotFound(self.s3_path.clone()));
        } else {
            debug!(path = %self.s3_path.display(), "no S3 settings file, using defaults");
            S3Settings::default()
        };

        Ok((main, s3))
    }
}

fn read_setting_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path).map_err(ConfigError::FileRead)?;
    debug!(path = %path.display(), "loaded settings file");
    serde_yaml::from_str(&content).map_err(|source| ConfigError::ParseYaml {
        path: path.to_path_buf(),
        source,
    })
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Settings file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read settings file: {0}")]
    FileRead(std::io::Error),

    #[error("Failed to parse YAML settings in {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Invalid settings value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
