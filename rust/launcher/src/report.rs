//! Summary of a finished launch.

use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::{
    config::FailurePolicy,
    runner::{JobOutcome, JobStatus},
};

/// Outcomes of every job in a launch, in spawn order.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchReport {
    pub started_at: String,
    pub elapsed_secs: f64,
    pub jobs: Vec<JobOutcome>,
}

impl LaunchReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.jobs.len()
    }

    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.count(JobStatus::Succeeded)
    }

    /// Jobs that started but did not exit cleanly.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(JobStatus::Failed)
    }

    #[must_use]
    pub fn spawn_failed(&self) -> usize {
        self.count(JobStatus::SpawnFailed)
    }

    /// Whether every job started and exited with status 0.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.jobs.iter().all(JobOutcome::success)
    }

    /// Whether the launcher should exit successfully under `policy`.
    #[must_use]
    pub fn exit_ok(&self, policy: FailurePolicy) -> bool {
        match policy {
            FailurePolicy::Ignore => true,
            FailurePolicy::Strict => self.all_succeeded(),
        }
    }

    fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    /// Write the report as pretty-printed JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| ReportError::Io(parent.to_path_buf(), e))?;
        }
        let file = File::create(path).map_err(|e| ReportError::Io(path.to_path_buf(), e))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .map_err(|e| ReportError::Write(path.to_path_buf(), e.to_string()))
    }
}

/// Errors that can occur when writing a report.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to create report file {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("failed to write report file {0}: {1}")]
    Write(PathBuf, String),
}
