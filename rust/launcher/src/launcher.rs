//! Concurrent launch of a fixed job batch with a join-all barrier.

use std::{sync::Arc, time::Instant};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use jodie_config::{BatchError, JobSpec, validate_batch};
use tokio::sync::mpsc;

use crate::{
    config::LauncherSettings,
    report::LaunchReport,
    runner::{JobOutcome, JobStatus, LaunchCommand, Runner, now_timestamp},
};

/// Starts every job of a batch and waits for all of them.
pub struct Launcher {
    runner: Arc<Runner>,
    show_progress: bool,
}

/// A job as it would be started, for dry runs.
#[derive(Debug, Clone)]
pub struct PlannedJob {
    pub name: String,
    pub command: LaunchCommand,
}

impl Launcher {
    #[must_use]
    pub fn new(settings: LauncherSettings) -> Self {
        Self {
            runner: Arc::new(Runner::new(settings)),
            show_progress: true,
        }
    }

    /// Enable or disable the per-job spinners.
    #[must_use]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    #[must_use]
    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    /// Resolve every job's command without starting anything.
    pub fn plan(&self, jobs: &[JobSpec]) -> Result<Vec<PlannedJob>, LaunchError> {
        validate_batch(jobs)?;
        Ok(jobs
            .iter()
            .map(|job| PlannedJob {
                name: job.name(),
                command: self.runner.command(job),
            })
            .collect())
    }

    /// Spawn every job in order, then block until all of them have exited.
    ///
    /// A job that fails to start or exits non-zero is recorded in the report;
    /// it never stops its siblings or the wait.
    pub async fn run(&self, jobs: &[JobSpec]) -> Result<LaunchReport, LaunchError> {
        validate_batch(jobs)?;

        let started_at = now_timestamp();
        let clock = Instant::now();
        let multi = if self.show_progress {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        // Completion notifications carry the job's position in the batch
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, JobOutcome)>();
        let mut outcomes: Vec<Option<JobOutcome>> = vec![None; jobs.len()];

        for (index, job) in jobs.iter().enumerate() {
            let name = job.name();
            let pb = multi.add(ProgressBar::new_spinner());
            pb.set_style(spinner_style.clone());
            pb.set_message(format!("{name:20}: starting..."));

            match self.runner.spawn(job) {
                Ok(handle) => {
                    let pid = handle.pid;
                    tracing::info!("Started {name} on device {} (PID {pid})", job.device);
                    pb.set_message(format!("{name:20}: running (PID {pid}, device {})", job.device));
                    pb.enable_steady_tick(std::time::Duration::from_millis(100));

                    let runner = Arc::clone(&self.runner);
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let outcome = runner.wait(handle).await;
                        pb.finish_with_message(format!(
                            "{:20}: {}",
                            outcome.name,
                            if outcome.success() { "completed" } else { "failed" }
                        ));
                        let _ = tx.send((index, outcome));
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to spawn {name}: {e}");
                    pb.finish_with_message(format!("{name:20}: spawn failed"));
                    outcomes[index] = Some(JobOutcome::spawn_failed(job, &e));
                }
            }
        }

        // Each wait task holds a sender; the channel closes once all have reported.
        drop(tx);
        while let Some((index, outcome)) = rx.recv().await {
            if outcome.success() {
                tracing::info!("{} completed in {:.1}s", outcome.name, outcome.duration_secs);
            } else {
                tracing::error!(
                    "{} failed: {}",
                    outcome.name,
                    outcome.error.as_deref().unwrap_or("unknown")
                );
            }
            outcomes[index] = Some(outcome);
        }

        let jobs = jobs
            .iter()
            .zip(outcomes)
            .map(|(job, outcome)| outcome.unwrap_or_else(|| lost_outcome(job)))
            .collect();

        Ok(LaunchReport {
            started_at,
            elapsed_secs: clock.elapsed().as_secs_f64(),
            jobs,
        })
    }
}

/// Outcome for a job whose wait task ended without reporting.
fn lost_outcome(job: &JobSpec) -> JobOutcome {
    JobOutcome {
        name: job.name(),
        device: job.device.to_string(),
        status: JobStatus::Failed,
        pid: None,
        exit_code: None,
        signal: None,
        error: Some("wait task ended without reporting".to_string()),
        duration_secs: 0.0,
    }
}

/// Errors that prevent a launch from starting.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error(transparent)]
    Batch(#[from] BatchError),
}

#[cfg(test)]
mod tests {
    use jodie_config::{ParamsError, default_jobs};

    use super::*;

    #[test]
    fn test_plan_preserves_order() {
        let launcher = Launcher::new(LauncherSettings::default());
        let plan = launcher.plan(&default_jobs()).unwrap();

        let names: Vec<_> = plan.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            ["lastfm-jodie", "wikipedia-jodie", "reddit-jodie", "mooc-jodie"]
        );
        let devices: Vec<_> = plan
            .iter()
            .map(|p| p.command.env_value("CUDA_VISIBLE_DEVICES").unwrap())
            .collect();
        assert_eq!(devices, ["0", "0", "1", "1"]);
    }

    #[test]
    fn test_plan_rejects_empty() {
        let launcher = Launcher::new(LauncherSettings::default());
        assert!(matches!(
            launcher.plan(&[]),
            Err(LaunchError::Batch(BatchError::Empty))
        ));
    }

    #[test]
    fn test_plan_rejects_duplicate_names() {
        let launcher = Launcher::new(LauncherSettings::default());
        let jobs = vec![
            JobSpec::new(0, "mooc", "jodie", 50),
            JobSpec::new(1, "mooc", "jodie", 10),
        ];
        assert!(matches!(
            launcher.plan(&jobs),
            Err(LaunchError::Batch(BatchError::DuplicateName(name))) if name == "mooc-jodie"
        ));
    }

    #[tokio::test]
    async fn test_run_rejects_invalid_before_spawning() {
        let launcher = Launcher::new(LauncherSettings {
            program: "/nonexistent/should-not-run".into(),
            ..LauncherSettings::default()
        })
        .with_progress(false);
        let jobs = vec![
            JobSpec::new(0, "lastfm", "jodie", 50),
            JobSpec::new(0, "wikipedia", "jodie", 0),
        ];
        let err = launcher.run(&jobs).await.unwrap_err();
        assert!(matches!(
            err,
            LaunchError::Batch(BatchError::InvalidJob(name, ParamsError::ZeroEpochs))
                if name == "wikipedia-jodie"
        ));
    }
}
