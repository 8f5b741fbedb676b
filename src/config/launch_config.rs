//! Distributed launcher settings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::GlmError;

/// Distributed-process launcher that starts one worker per partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LauncherKind {
    #[default]
    Torchrun,
    Deepspeed,
}

impl LauncherKind {
    pub fn program(&self) -> &'static str {
        match self {
            LauncherKind::Torchrun => "torchrun",
            LauncherKind::Deepspeed => "deepspeed",
        }
    }
}

/// Launcher configuration: how the entry point is started and with which environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Launcher program
    pub launcher: LauncherKind,

    /// Python entry point run by every worker
    pub entry_point: PathBuf,

    /// Workers per node (defaults to the model-parallel size)
    pub nproc_per_node: Option<usize>,

    /// Local GPU ids handed to deepspeed `--include`
    pub gpus: Option<Vec<usize>>,

    /// Deepspeed hostfile for multi-node runs
    pub hostfile: Option<PathBuf>,

    /// Rendezvous port; a random free-range port is drawn when unset
    pub master_port: Option<u16>,

    /// NCCL transport tuning exported to every worker
    pub nccl: BTreeMap<String, String>,

    /// Directories prepended to `PYTHONPATH`
    pub python_path: Vec<PathBuf>,

    /// Directory receiving one log file per invocation
    pub log_dir: PathBuf,

    /// Log file name prefix
    pub log_name: String,

    /// Working directory of the launched process
    pub working_dir: Option<PathBuf>,

    /// Flags appended verbatim after the composed ones
    pub extra_args: Vec<String>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        let nccl = [
            ("NCCL_DEBUG", "info"),
            ("NCCL_IB_DISABLE", "0"),
            ("NCCL_NET_GDR_LEVEL", "2"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            launcher: LauncherKind::Torchrun,
            entry_point: PathBuf::from("inference.py"),
            nproc_per_node: None,
            gpus: None,
            hostfile: None,
            master_port: None,
            nccl,
            python_path: Vec::new(),
            log_dir: PathBuf::from("logs"),
            log_name: "generate".to_string(),
            working_dir: None,
            extra_args: Vec::new(),
        }
    }
}

impl LaunchConfig {
    /// Workers per node for a model split into `model_parallel_size` partitions
    pub fn workers(&self, model_parallel_size: usize) -> usize {
        self.nproc_per_node.unwrap_or(model_parallel_size)
    }

    /// GPU ids used by deepspeed
    pub fn gpu_ids(&self, model_parallel_size: usize) -> Vec<usize> {
        match &self.gpus {
            Some(gpus) => gpus.clone(),
            None => (0..self.workers(model_parallel_size)).collect(),
        }
    }

    pub fn validate(&self, model_parallel_size: usize) -> crate::Result<()> {
        if self.entry_point.as_os_str().is_empty() {
            return Err(GlmError::invalid("entry_point", "must not be empty"));
        }
        if self.workers(model_parallel_size) == 0 {
            return Err(GlmError::invalid("nproc_per_node", "must be at least 1"));
        }
        if let Some(gpus) = &self.gpus {
            if gpus.is_empty() {
                return Err(GlmError::invalid("gpus", "must list at least one device"));
            }
        }
        if self.master_port == Some(0) {
            return Err(GlmError::invalid("master_port", "must be non-zero"));
        }
        if self.log_name.is_empty() || self.log_name.contains('/') {
            return Err(GlmError::invalid("log_name", "must be a plain file name prefix"));
        }
        for key in self.nccl.keys() {
            if key.is_empty() || key.contains('=') {
                return Err(GlmError::invalid("nccl", format!("bad variable name {key:?}")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LaunchConfig::default();
        assert_eq!(config.launcher.program(), "torchrun");
        assert_eq!(config.workers(8), 8);
        assert_eq!(config.gpu_ids(4), vec![0, 1, 2, 3]);
        assert_eq!(config.nccl.get("NCCL_IB_DISABLE").map(String::as_str), Some("0"));
        assert!(config.validate(8).is_ok());
    }

    #[test]
    fn test_explicit_gpus() {
        let config = LaunchConfig {
            gpus: Some(vec![4, 5, 6, 7]),
            nproc_per_node: Some(4),
            ..Default::default()
        };
        assert_eq!(config.gpu_ids(8), vec![4, 5, 6, 7]);
        assert_eq!(config.workers(8), 4);
    }

    #[test]
    fn test_validation() {
        let config = LaunchConfig {
            master_port: Some(0),
            ..Default::default()
        };
        assert!(config.validate(8).is_err());

        let config = LaunchConfig {
            log_name: "a/b".to_string(),
            ..Default::default()
        };
        assert!(config.validate(8).is_err());
    }
}
