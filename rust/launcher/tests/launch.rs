//! Integration tests for launching jobs as real child processes.
//!
//! A small shell script stands in for the training program. It receives the
//! usual flags (`--network N --model M --epochs E --gpu G`), records what it
//! saw in `$OUT_DIR/<network>.*` and sleeps for `E` seconds.

use std::{collections::BTreeMap, fs, path::Path, time::Instant};

use jodie_config::{JobSpec, default_jobs};
use jodie_config::BatchError;
use jodie_launcher::{
    FailurePolicy, JobStatus, LaunchError, Launcher, LauncherSettings, Runner,
};
use tempfile::{TempDir, tempdir};

const FAKE_TRAINER: &str = r#"
network="$2"
epochs="$6"
echo "$CUDA_VISIBLE_DEVICES" > "$OUT_DIR/$network.device"
if [ "$7" = "--gpu" ]; then
    echo "$8" > "$OUT_DIR/$network.gpu"
fi
echo "$JODIE_HOME" > "$OUT_DIR/$network.home"
echo "$$" > "$OUT_DIR/$network.pid"
echo "training $network for $epochs epochs"
if [ "$network" = "broken" ]; then
    echo "Training sequence proportion cannot be greater than 0.8." >&2
    exit 3
fi
# exec so the recorded pid is the sleeping process itself
exec sleep "$epochs"
"#;

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("out")).unwrap();
        fs::write(dir.path().join("trainer.sh"), FAKE_TRAINER).unwrap();
        Self { dir }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn settings(&self) -> LauncherSettings {
        let root = self.dir.path();
        let mut extra_env = BTreeMap::new();
        extra_env.insert(
            "OUT_DIR".to_string(),
            root.join("out").display().to_string(),
        );
        LauncherSettings {
            program: "sh".into(),
            program_args: vec![root.join("trainer.sh").display().to_string()],
            home_var: "JODIE_HOME".into(),
            home_dir: Some("/srv/jodie".into()),
            log_dir: root.join("logs"),
            extra_env,
            ..LauncherSettings::default()
        }
    }

    fn launcher(&self) -> Launcher {
        Launcher::new(self.settings()).with_progress(false)
    }

    fn read(&self, network: &str, what: &str) -> String {
        fs::read_to_string(self.root().join("out").join(format!("{network}.{what}")))
            .unwrap()
            .trim()
            .to_string()
    }
}

fn with_epochs(epochs: u32) -> Vec<JobSpec> {
    default_jobs()
        .into_iter()
        .map(|mut job| {
            job.params.epochs = epochs;
            job
        })
        .collect()
}

#[tokio::test]
async fn test_stock_batch_spawns_every_job_with_its_device() {
    let fx = Fixture::new();
    let report = fx.launcher().run(&with_epochs(1)).await.unwrap();

    assert_eq!(report.total(), 4);
    assert_eq!(report.succeeded(), 4);
    assert!(report.all_succeeded());

    let names: Vec<_> = report.jobs.iter().map(|j| j.name.as_str()).collect();
    assert_eq!(
        names,
        ["lastfm-jodie", "wikipedia-jodie", "reddit-jodie", "mooc-jodie"]
    );

    for (network, device) in [("lastfm", "0"), ("wikipedia", "0"), ("reddit", "1"), ("mooc", "1")] {
        assert_eq!(fx.read(network, "device"), device, "device for {network}");
        assert_eq!(fx.read(network, "gpu"), device, "--gpu for {network}");
        assert_eq!(fx.read(network, "home"), "/srv/jodie");
    }

    // Four distinct processes
    let mut pids: Vec<_> = ["lastfm", "wikipedia", "reddit", "mooc"]
        .iter()
        .map(|n| fx.read(n, "pid"))
        .collect();
    pids.sort();
    pids.dedup();
    assert_eq!(pids.len(), 4);
}

#[tokio::test]
async fn test_run_waits_for_slowest_job() {
    let fx = Fixture::new();
    let jobs = vec![
        JobSpec::new(0, "lastfm", "jodie", 1),
        JobSpec::new(0, "wikipedia", "jodie", 3),
        JobSpec::new(1, "reddit", "jodie", 2),
    ];

    let start = Instant::now();
    let report = fx.launcher().run(&jobs).await.unwrap();
    let elapsed = start.elapsed().as_secs_f64();

    assert_eq!(report.succeeded(), 3);
    assert!(elapsed >= 3.0, "returned after {elapsed:.2}s, before the slowest job");
    // Sequential execution would take 6s
    assert!(elapsed < 5.5, "jobs did not run concurrently ({elapsed:.2}s)");
    assert!(report.jobs[1].duration_secs >= 3.0);
}

#[tokio::test]
async fn test_failed_job_does_not_stop_siblings() {
    let fx = Fixture::new();
    let jobs = vec![
        JobSpec::new(0, "broken", "jodie", 1),
        JobSpec::new(1, "mooc", "jodie", 1),
    ];

    let report = fx.launcher().run(&jobs).await.unwrap();

    assert_eq!(report.failed(), 1);
    assert_eq!(report.succeeded(), 1);
    assert!(!report.all_succeeded());
    assert!(report.exit_ok(FailurePolicy::Ignore));
    assert!(!report.exit_ok(FailurePolicy::Strict));

    let broken = &report.jobs[0];
    assert_eq!(broken.status, JobStatus::Failed);
    assert_eq!(broken.exit_code, Some(3));
    assert!(
        broken
            .error
            .as_deref()
            .unwrap()
            .contains("cannot be greater than 0.8")
    );
    assert_eq!(report.jobs[1].status, JobStatus::Succeeded);
}

#[tokio::test]
async fn test_spawn_failure_is_recorded_per_job() {
    let fx = Fixture::new();
    let launcher = Launcher::new(LauncherSettings {
        program: fx.root().join("no-such-python").display().to_string(),
        ..fx.settings()
    })
    .with_progress(false);

    let report = launcher.run(&with_epochs(1)).await.unwrap();

    assert_eq!(report.total(), 4);
    assert_eq!(report.spawn_failed(), 4);
    assert!(report.jobs.iter().all(|j| j.pid.is_none() && j.error.is_some()));
}

#[tokio::test]
async fn test_output_captured_to_logs() {
    let fx = Fixture::new();
    let jobs = vec![
        JobSpec::new(0, "broken", "jodie", 1),
        JobSpec::new(0, "lastfm", "jodie", 1),
    ];
    fx.launcher().run(&jobs).await.unwrap();

    let logs = fx.root().join("logs");
    let stdout = fs::read_to_string(logs.join("lastfm-jodie/stdout.log")).unwrap();
    assert!(stdout.contains("training lastfm for 1 epochs"));

    let stderr = fs::read_to_string(logs.join("broken-jodie/stderr.log")).unwrap();
    assert!(stderr.contains("cannot be greater than 0.8"));

    // A second launch appends after a separator
    fx.launcher()
        .run(&[JobSpec::new(0, "lastfm", "jodie", 1)])
        .await
        .unwrap();
    let stdout = fs::read_to_string(logs.join("lastfm-jodie/stdout.log")).unwrap();
    assert_eq!(stdout.matches("training lastfm").count(), 2);
    assert!(stdout.contains("--- launch at "));
}

#[tokio::test]
async fn test_killing_one_child_leaves_siblings_running() {
    let fx = Fixture::new();
    let runner = Runner::new(fx.settings());

    let victim = runner.spawn(&JobSpec::new(0, "reddit", "jodie", 30)).unwrap();
    let sibling = runner.spawn(&JobSpec::new(1, "mooc", "jodie", 2)).unwrap();

    // SAFETY: the pid belongs to a child we own and have not reaped yet.
    let killed = unsafe { libc::kill(victim.pid as i32, libc::SIGKILL) };
    assert_eq!(killed, 0);

    let (victim, sibling) = tokio::join!(runner.wait(victim), runner.wait(sibling));

    assert_eq!(victim.status, JobStatus::Failed);
    assert_eq!(victim.signal, Some(libc::SIGKILL));
    assert!(victim.duration_secs < 30.0);

    assert_eq!(sibling.status, JobStatus::Succeeded);
    assert!(sibling.duration_secs >= 2.0);
}

#[tokio::test]
async fn test_empty_batch_rejected() {
    let fx = Fixture::new();
    let err = fx.launcher().run(&[]).await.unwrap_err();
    assert!(matches!(err, LaunchError::Batch(BatchError::Empty)));
}
