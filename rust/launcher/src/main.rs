//! JODIE Job Launcher CLI
//!
//! With no arguments, launches the stock four-network batch and waits for it.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use jodie_launcher::{JobStatus, LaunchReport, Launcher, LauncherConfig};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "jodie-launcher", about = "Launch JODIE training jobs in parallel")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch every job and wait for all of them (the default)
    Run(RunArgs),

    /// Print the jobs and the command each one would run
    List {
        /// Path to launcher.toml (stock batch if omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(clap::Args, Default)]
struct RunArgs {
    /// Path to launcher.toml (stock batch if omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the commands without starting anything
    #[arg(long)]
    dry_run: bool,

    /// Interpreter or executable to run for every job
    #[arg(long)]
    program: Option<String>,

    /// Training script passed as the first argument to the program
    #[arg(long)]
    script: Option<String>,

    /// Write a JSON summary of the launch to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Disable progress spinners
    #[arg(long)]
    no_progress: bool,
}

fn load_config(path: Option<&PathBuf>) -> Result<LauncherConfig, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(path) => LauncherConfig::load(path)?,
        None => LauncherConfig::builtin(),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // tracing needs to be initialized with indicatif_layer to not clobber progress bars
    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .with(indicatif_layer)
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or_else(|| Commands::Run(RunArgs::default())) {
        Commands::Run(args) => {
            let mut config = load_config(args.config.as_ref())?;
            if let Some(program) = args.program {
                config.launcher.program = program;
            }
            if let Some(script) = args.script {
                config.launcher.program_args = vec![script];
            }
            let policy = config.launcher.on_failure;
            let launcher = Launcher::new(config.launcher).with_progress(!args.no_progress);

            if args.dry_run {
                println!("=== Dry Run ===");
                for planned in launcher.plan(&config.jobs)? {
                    println!("{}: {}", planned.name, planned.command);
                }
                return Ok(());
            }

            println!("Launching {} jobs", config.jobs.len());
            let report = launcher.run(&config.jobs).await?;
            print_summary(&report);

            if let Some(path) = args.report {
                report.write_json(&path)?;
                println!("Report written to {}", path.display());
            }

            if !report.exit_ok(policy) {
                std::process::exit(1);
            }
        }

        Commands::List { config } => {
            let config = load_config(config.as_ref())?;
            let launcher = Launcher::new(config.launcher);

            println!("=== Jobs ===");
            for (job, planned) in config.jobs.iter().zip(launcher.plan(&config.jobs)?) {
                println!("{} (device {})", planned.name, job.device);
                println!("  {}", planned.command);
            }
        }
    }

    Ok(())
}

fn print_summary(report: &LaunchReport) {
    println!();
    println!("=== Launch Complete ({:.1}s) ===", report.elapsed_secs);
    for job in &report.jobs {
        let status = match job.status {
            JobStatus::Succeeded => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::SpawnFailed => "SPAWN FAILED",
        };
        print!("{}: {status}", job.name);
        if let Some(code) = job.exit_code {
            print!(" (exit {code})");
        }
        if let Some(signal) = job.signal {
            print!(" (signal {signal})");
        }
        println!();
    }
    println!("Total: {}", report.total());
    println!("Completed: {}", report.succeeded());
    println!("Failed: {}", report.failed());
    println!("Spawn failed: {}", report.spawn_failed());
}
