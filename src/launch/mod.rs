//! Launching the external inference entry point.
//!
//! This module provides:
//! - `compose`: the launcher command line built from a profile
//! - `Environment`: NCCL, master port and `PYTHONPATH` for the workers
//! - `create_log_file`: one timestamped log per invocation
//! - `run`: spawn, tee output, wait
//! - `check_checkpoint`: verify the checkpoint matches the partitioning

mod checkpoint;
mod command;
mod environment;
mod log_file;
mod runner;

pub use checkpoint::{check_checkpoint, shard_file_name, CheckpointLayout};
pub use command::{compose, entry_args, CommandLine};
pub use environment::{resolve_master_port, Environment, MASTER_PORT_RANGE};
pub use log_file::{create_log_file, LOG_TIMESTAMP_FORMAT};
pub use runner::{run, LaunchOutcome};

use std::path::PathBuf;

use crate::config::Profile;

/// Everything needed to start one run
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub command: CommandLine,
    pub env: Environment,
    pub working_dir: Option<PathBuf>,
    pub log_dir: PathBuf,
    pub log_name: String,
    /// Mirror child output on the console
    pub echo: bool,
}

impl LaunchPlan {
    /// Resolve the master port and compose command and environment.
    ///
    /// `inherited_pythonpath` is the caller's `PYTHONPATH`, if any.
    pub fn prepare(profile: &Profile, inherited_pythonpath: Option<String>) -> crate::Result<Self> {
        let port = resolve_master_port(profile.launch.master_port);
        Self::with_port(profile, port, inherited_pythonpath.as_deref())
    }

    /// Compose a plan for an already chosen master port
    pub fn with_port(profile: &Profile, port: u16, inherited_pythonpath: Option<&str>) -> crate::Result<Self> {
        let command = compose(profile, port)?;
        let env = Environment::resolve(&profile.launch, port, inherited_pythonpath);

        Ok(Self {
            command,
            env,
            working_dir: profile.launch.working_dir.clone(),
            log_dir: profile.launch.log_dir.clone(),
            log_name: profile.launch.log_name.clone(),
            echo: true,
        })
    }

    pub fn master_port(&self) -> Option<u16> {
        self.env.get("MASTER_PORT").and_then(|p| p.parse().ok())
    }

    /// Shell form of the plan: environment prefix, command, tee into the log
    pub fn render(&self) -> String {
        format!(
            "{} {} 2>&1 | tee {}/{}-<timestamp>.log",
            self.env.render(),
            self.command.render(),
            self.log_dir.display(),
            self.log_name
        )
    }
}
