//! Shop launch orchestrator.
//!
//! A launch validates a shop's configuration and environment, checks the
//! go-live gates, scaffolds the shop app and its deploy workflow, commits and
//! deploys through CI, then runs post-deploy checks and writes a report. Every
//! step is checkpointed so a failed launch resumes where it stopped.

pub mod config;
pub mod deploy;
pub mod errors;
pub mod gates;
pub mod logging;
pub mod orchestrator;
pub mod platform;
pub mod preflight;
pub mod report;
pub mod secrets;
pub mod settings;
pub mod state;
pub mod steps;
pub mod ui;
pub mod util;
