#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

//! JODIE Job Launcher
//!
//! Starts a fixed batch of training jobs as independent child processes, one
//! device selector per job, and waits for every one of them to exit.

pub mod config;
pub mod launcher;
pub mod report;
pub mod runner;

pub use config::{FailurePolicy, LauncherConfig, LauncherSettings};
pub use launcher::{LaunchError, Launcher};
pub use report::LaunchReport;
pub use runner::{JobHandle, JobOutcome, JobStatus, Runner};
