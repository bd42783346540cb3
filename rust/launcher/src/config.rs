//! Configuration parsing for the launcher.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use jodie_config::{BatchError, JobSpec, default_jobs, validate_batch};
use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from TOML (raw, before merging).
#[derive(Debug, Clone, Deserialize)]
struct RawLauncherConfig {
    #[serde(default)]
    pub launcher: LauncherSettings,
    #[serde(default = "empty_table")]
    pub defaults: toml::Value,
    #[serde(default)]
    pub jobs: Vec<toml::Value>,
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

/// Top-level configuration after merging defaults into jobs.
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub launcher: LauncherSettings,
    pub jobs: Vec<JobSpec>,
}

/// How each child process is started.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherSettings {
    /// Executable to run for every job.
    #[serde(default = "default_program")]
    pub program: String,
    /// Arguments placed before the job's own flags (usually the script path).
    #[serde(default = "default_program_args")]
    pub program_args: Vec<String>,
    /// Working directory for the children. Inherited when unset.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Name of the home-directory variable exported to every child.
    #[serde(default = "default_home_var")]
    pub home_var: String,
    /// Value for `home_var`, exported to every child. When unset the children
    /// inherit the launcher's own value; [`LauncherConfig::builtin`] fills it
    /// in from the launcher's environment so it is passed explicitly.
    #[serde(default)]
    pub home_dir: Option<String>,
    /// Variable that carries the job's device selector.
    #[serde(default = "default_device_var")]
    pub device_var: String,
    /// Also pass `--gpu <id>` for single-device jobs. The training program
    /// overwrites `CUDA_VISIBLE_DEVICES` with its `--gpu` value (default 5),
    /// so without the flag the device variable alone does not pin the job.
    #[serde(default = "default_true")]
    pub forward_gpu_flag: bool,
    /// Exported as `CUDA_DEVICE_ORDER` so ids match `nvidia-smi` numbering.
    #[serde(default = "default_device_order")]
    pub device_order: Option<String>,
    /// Per-job stdout/stderr logs go to `<log_dir>/<job>/`.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// What a failed job means for the launcher's exit status.
    #[serde(default)]
    pub on_failure: FailurePolicy,
    /// Additional variables exported to every child.
    #[serde(default)]
    pub extra_env: BTreeMap<String, String>,
}

/// What to do when a job fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Record the failure and still exit successfully once all jobs are joined.
    #[default]
    Ignore,
    /// Exit with a non-zero status if any job failed or could not start.
    Strict,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            program: default_program(),
            program_args: default_program_args(),
            working_dir: None,
            home_var: default_home_var(),
            home_dir: None,
            device_var: default_device_var(),
            forward_gpu_flag: true,
            device_order: default_device_order(),
            log_dir: default_log_dir(),
            on_failure: FailurePolicy::default(),
            extra_env: BTreeMap::new(),
        }
    }
}

fn default_program() -> String {
    "python".to_string()
}

fn default_program_args() -> Vec<String> {
    vec!["jodie.py".to_string()]
}

fn default_home_var() -> String {
    "HOME".to_string()
}

fn default_device_var() -> String {
    "CUDA_VISIBLE_DEVICES".to_string()
}

fn default_true() -> bool {
    true
}

#[allow(clippy::unnecessary_wraps)]
fn default_device_order() -> Option<String> {
    Some("PCI_BUS_ID".to_string())
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}

/// Merge two TOML tables, with `overlay` values taking precedence.
fn merge_toml(base: &toml::Value, overlay: &toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(base_map), toml::Value::Table(overlay_map)) => {
            let mut merged = base_map.clone();
            for (k, v) in overlay_map {
                merged.insert(
                    k.clone(),
                    if let Some(base_v) = base_map.get(k) {
                        merge_toml(base_v, v)
                    } else {
                        v.clone()
                    },
                );
            }
            toml::Value::Table(merged)
        }
        (_, overlay) => overlay.clone(),
    }
}

impl LauncherConfig {
    /// The stock four-job batch with default settings.
    ///
    /// The home directory is resolved once here and handed to every child.
    #[must_use]
    pub fn builtin() -> Self {
        let mut launcher = LauncherSettings::default();
        launcher.home_dir = std::env::var(&launcher.home_var).ok();
        Self {
            launcher,
            jobs: default_jobs(),
        }
    }

    /// Load configuration from a TOML file, merging defaults into each job.
    ///
    /// A file without `[[jobs]]` keeps the stock batch.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().display().to_string(), e))?;
        content.parse()
    }

    /// Reject invalid parameters and duplicate job names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_batch(&self.jobs)?;
        Ok(())
    }
}

impl std::str::FromStr for LauncherConfig {
    type Err = ConfigError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let raw: RawLauncherConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let jobs = if raw.jobs.is_empty() {
            default_jobs()
        } else {
            raw.jobs
                .into_iter()
                .map(|job_value| {
                    merge_toml(&raw.defaults, &job_value)
                        .try_into()
                        .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))
                })
                .collect::<Result<_, _>>()?
        };

        let config = Self {
            launcher: raw.launcher,
            jobs,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid job batch: {0}")]
    Batch(#[from] BatchError),
}
