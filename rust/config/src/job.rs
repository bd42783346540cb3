//! Job descriptors.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{DeviceSelector, ParamsError, TrainParams};

/// Description of one training launch: which device it runs on and what it
/// passes to the training program.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JobSpec {
    /// Display name; defaults to `<network>-<model>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub device: DeviceSelector,
    #[serde(flatten)]
    pub params: TrainParams,
}

impl JobSpec {
    /// A job on a single device with default optional parameters.
    #[must_use]
    pub fn new(device: u32, network: &str, model: &str, epochs: u32) -> Self {
        Self {
            name: None,
            device: DeviceSelector::single(device),
            params: TrainParams {
                model: model.into(),
                epochs,
                ..TrainParams::new(network)
            },
        }
    }

    /// Override the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.params.network, self.params.model))
    }

    /// Arguments for the training program.
    #[must_use]
    pub fn to_cli_args(&self) -> Vec<String> {
        self.params.to_cli_args()
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(ParamsError::EmptyName);
        }
        self.params.validate()
    }
}

/// The stock batch: the four JODIE benchmark networks, two per device.
#[must_use]
pub fn default_jobs() -> Vec<JobSpec> {
    vec![
        JobSpec::new(0, "lastfm", "jodie", 50),
        JobSpec::new(0, "wikipedia", "jodie", 50),
        JobSpec::new(1, "reddit", "jodie", 50),
        JobSpec::new(1, "mooc", "jodie", 50),
    ]
}

/// Check a batch before anything is launched: it must be non-empty, every job
/// valid, and names unique (they key the per-job log directories).
pub fn validate_batch(jobs: &[JobSpec]) -> Result<(), BatchError> {
    if jobs.is_empty() {
        return Err(BatchError::Empty);
    }
    let mut seen = HashSet::new();
    for job in jobs {
        let name = job.name();
        job.validate()
            .map_err(|e| BatchError::InvalidJob(name.clone(), e))?;
        if !seen.insert(name.clone()) {
            return Err(BatchError::DuplicateName(name));
        }
    }
    Ok(())
}

/// Invalid job batch.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BatchError {
    #[error("no jobs to launch")]
    Empty,
    #[error("invalid job {0}: {1}")]
    InvalidJob(String, ParamsError),
    #[error("duplicate job name: {0}")]
    DuplicateName(String),
}
