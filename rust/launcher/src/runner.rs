//! Subprocess execution for training jobs.

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    process::Stdio,
    time::Instant,
};

use jodie_config::JobSpec;
use serde::Serialize;
use tokio::{
    fs::OpenOptions,
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader},
    process::{Child, Command},
    task::JoinHandle,
};

use crate::config::LauncherSettings;

/// Number of trailing stderr lines kept for the failure message.
const STDERR_TAIL_LINES: usize = 20;

/// Fully resolved invocation of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Variables set on top of the inherited environment, in application order.
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
}

impl LaunchCommand {
    /// Value this command assigns to `key`, if any. Later entries win.
    #[must_use]
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl std::fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (k, v) in &self.env {
            write!(f, "{k}={v} ")?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Exited with status 0.
    Succeeded,
    /// Started but exited non-zero, was killed, or could not be waited on.
    Failed,
    /// The process never started.
    SpawnFailed,
}

/// Result of a single job.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub name: String,
    pub device: String,
    pub status: JobStatus,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    /// Terminating signal when the child was killed.
    pub signal: Option<i32>,
    /// Error message if failed.
    pub error: Option<String>,
    pub duration_secs: f64,
}

impl JobOutcome {
    /// Outcome for a job whose process could not be started.
    #[must_use]
    pub fn spawn_failed(job: &JobSpec, error: &RunError) -> Self {
        Self {
            name: job.name(),
            device: job.device.to_string(),
            status: JobStatus::SpawnFailed,
            pid: None,
            exit_code: None,
            signal: None,
            error: Some(error.to_string()),
            duration_secs: 0.0,
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}

/// Builds, spawns and waits on training processes.
#[derive(Debug, Clone)]
pub struct Runner {
    settings: LauncherSettings,
}

impl Runner {
    #[must_use]
    pub fn new(settings: LauncherSettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub fn settings(&self) -> &LauncherSettings {
        &self.settings
    }

    /// Resolve the command line and environment for `job`.
    ///
    /// The device variable is applied last so nothing in `extra_env` can
    /// redirect a job to another device. Single-device jobs also get
    /// `--gpu <id>` when `forward_gpu_flag` is set, since the training
    /// program rewrites the device variable from that flag.
    #[must_use]
    pub fn command(&self, job: &JobSpec) -> LaunchCommand {
        let mut args = self.settings.program_args.clone();
        args.extend(job.to_cli_args());
        if self.settings.forward_gpu_flag
            && let Some(id) = job.device.single_id()
        {
            args.extend(["--gpu".to_string(), id.to_string()]);
        }

        let mut env: Vec<(String, String)> = self
            .settings
            .extra_env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(ref home) = self.settings.home_dir {
            env.push((self.settings.home_var.clone(), home.clone()));
        }
        if let Some(order) = self.settings.device_order.as_deref()
            && !order.is_empty()
        {
            env.push(("CUDA_DEVICE_ORDER".into(), order.into()));
        }
        env.push((self.settings.device_var.clone(), job.device.to_string()));

        LaunchCommand {
            program: self.settings.program.clone(),
            args,
            env,
            working_dir: self.settings.working_dir.clone(),
        }
    }

    /// Directory holding the logs of the job called `name`.
    #[must_use]
    pub fn log_dir(&self, name: &str) -> PathBuf {
        self.settings.log_dir.join(name)
    }

    /// Spawn a job as a subprocess without waiting for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(&self, job: &JobSpec) -> Result<JobHandle, RunError> {
        let name = job.name();
        let launch = self.command(job);

        tracing::debug!("Spawning {name}: {launch}");

        let mut cmd = Command::new(&launch.program);
        cmd.args(&launch.args)
            .envs(launch.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Children outlive a dropped handle; nothing cancels a job.
            .kill_on_drop(false);
        if let Some(ref dir) = launch.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .map_err(|e| RunError::Spawn(name.clone(), launch.program.clone(), e))?;

        let pid = child.id().ok_or_else(|| {
            RunError::Spawn(name.clone(), launch.program, std::io::Error::other("no PID"))
        })?;

        Ok(JobHandle {
            log_dir: self.log_dir(&name),
            name,
            device: job.device.to_string(),
            child,
            pid,
            started: Instant::now(),
        })
    }

    /// Wait for a job to exit, streaming its output to log files.
    pub async fn wait(&self, mut handle: JobHandle) -> JobOutcome {
        if let Err(e) = tokio::fs::create_dir_all(&handle.log_dir).await {
            tracing::warn!(
                "{}: cannot create log directory {}: {e}",
                handle.name,
                handle.log_dir.display()
            );
        }

        let stdout_task = handle
            .child
            .stdout
            .take()
            .map(|out| tokio::spawn(drain_to_log(out, handle.log_dir.join("stdout.log"), 0)));
        let stderr_task = handle.child.stderr.take().map(|err| {
            tokio::spawn(drain_to_log(
                err,
                handle.log_dir.join("stderr.log"),
                STDERR_TAIL_LINES,
            ))
        });

        let status = handle.child.wait().await;

        // Readers finish once both pipes reach EOF
        join_reader(stdout_task).await;
        let stderr_tail = join_reader(stderr_task).await;

        let duration_secs = handle.started.elapsed().as_secs_f64();
        let mut outcome = JobOutcome {
            name: handle.name,
            device: handle.device,
            status: JobStatus::Failed,
            pid: Some(handle.pid),
            exit_code: None,
            signal: None,
            error: None,
            duration_secs,
        };

        match status {
            Ok(status) if status.success() => {
                outcome.status = JobStatus::Succeeded;
                outcome.exit_code = status.code();
            }
            Ok(status) => {
                outcome.exit_code = status.code();
                outcome.signal = exit_signal(status);
                outcome.error = Some(if stderr_tail.is_empty() {
                    format!("Exit status: {status}")
                } else {
                    stderr_tail.join("\n")
                });
            }
            Err(e) => {
                outcome.error = Some(format!("Process error: {e}"));
            }
        }
        outcome
    }
}

#[cfg(unix)]
fn exit_signal(status: std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: std::process::ExitStatus) -> Option<i32> {
    None
}

async fn join_reader(task: Option<JoinHandle<Vec<String>>>) -> Vec<String> {
    match task {
        Some(task) => task.await.unwrap_or_default(),
        None => Vec::new(),
    }
}

/// Copy `reader` into `path`, returning its last `keep` lines.
///
/// The reader is always drained to the end, even when the log file cannot be
/// opened, so the child never blocks on a full pipe.
async fn drain_to_log<R>(reader: R, path: PathBuf, keep: usize) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut file = open_log(&path).await;
    let mut tail = VecDeque::with_capacity(keep);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        // Raw bytes: training output is not guaranteed to be UTF-8.
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("read error on {}: {e}; discarding the rest", path.display());
                // Keep the pipe empty until the child closes it
                if let Err(e) = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
                    tracing::warn!("cannot drain {}: {e}", path.display());
                }
                break;
            }
        }
        if let Some(ref mut f) = file {
            let _ = f.write_all(&buf).await;
        }
        if keep > 0 {
            if tail.len() >= keep {
                tail.pop_front();
            }
            let line = String::from_utf8_lossy(&buf);
            tail.push_back(line.trim_end_matches(['\r', '\n']).to_string());
        }
    }
    if let Some(ref mut f) = file {
        let _ = f.flush().await;
    }
    tail.into_iter().collect()
}

/// Open a log for appending, writing a separator if an earlier launch left
/// output in it.
async fn open_log(path: &Path) -> Option<tokio::fs::File> {
    let mut file = match OpenOptions::new().create(true).append(true).open(path).await {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!("cannot open log {}: {e}", path.display());
            return None;
        }
    };
    if file.metadata().await.is_ok_and(|m| m.len() > 0) {
        let _ = file
            .write_all(format!("\n--- launch at {} ---\n\n", now_timestamp()).as_bytes())
            .await;
    }
    Some(file)
}

/// Get current local time as a display string.
#[must_use]
pub fn now_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Handle to a running subprocess.
///
/// Owned by the launcher from spawn until [`Runner::wait`] consumes it.
#[derive(Debug)]
pub struct JobHandle {
    pub name: String,
    pub device: String,
    pub log_dir: PathBuf,
    child: Child,
    pub pid: u32,
    started: Instant,
}

/// Errors that can occur when starting a subprocess.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to spawn {1} for {0}: {2}")]
    Spawn(String, String, std::io::Error),
}
