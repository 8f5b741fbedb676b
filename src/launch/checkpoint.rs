//! Checkpoint directory layout check.
//!
//! A partitioned checkpoint directory holds a `latest` file naming the
//! iteration tag, and a directory of that name with one
//! `mp_rank_XX_model_states.pt` shard per model-parallel rank.

use std::path::{Path, PathBuf};

use crate::config::ModelConfig;
use crate::GlmError;

/// A checkpoint whose shards were all found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointLayout {
    /// Iteration tag read from `latest`
    pub iteration: String,
    /// Shard file per rank, rank order
    pub shards: Vec<PathBuf>,
}

impl CheckpointLayout {
    /// Total size of all shards on disk
    pub fn total_bytes(&self) -> crate::Result<u64> {
        let mut total = 0;
        for shard in &self.shards {
            total += std::fs::metadata(shard)?.len();
        }
        Ok(total)
    }
}

/// File name of the shard held by `rank`
pub fn shard_file_name(rank: usize) -> String {
    format!("mp_rank_{:02}_model_states.pt", rank)
}

/// Verify the checkpoint matches the configured model-parallel size
pub fn check_checkpoint(model: &ModelConfig) -> crate::Result<CheckpointLayout> {
    inspect(&model.checkpoint_path, model.model_parallel_size)
}

fn inspect(root: &Path, model_parallel_size: usize) -> crate::Result<CheckpointLayout> {
    if !root.is_dir() {
        return Err(GlmError::CheckpointError(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let latest = root.join("latest");
    let iteration = std::fs::read_to_string(&latest)
        .map_err(|e| GlmError::CheckpointError(format!("cannot read {}: {}", latest.display(), e)))?
        .trim()
        .to_string();
    if iteration.is_empty() {
        return Err(GlmError::CheckpointError(format!("{} is empty", latest.display())));
    }

    let iteration_dir = root.join(&iteration);
    let shards: Vec<PathBuf> = (0..model_parallel_size)
        .map(|rank| iteration_dir.join(shard_file_name(rank)))
        .collect();

    let missing: Vec<String> = shards
        .iter()
        .filter(|p| !p.is_file())
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    if !missing.is_empty() {
        return Err(GlmError::CheckpointError(format!(
            "{} is missing {} of {} shards: {}",
            iteration_dir.display(),
            missing.len(),
            model_parallel_size,
            missing.join(", ")
        )));
    }

    // A shard beyond the configured size means the checkpoint was split differently
    let extra = iteration_dir.join(shard_file_name(model_parallel_size));
    if extra.exists() {
        return Err(GlmError::CheckpointError(format!(
            "{} has more shards than model_parallel_size {}",
            iteration_dir.display(),
            model_parallel_size
        )));
    }

    tracing::info!(
        "Checkpoint {} iteration {} with {} shards",
        root.display(),
        iteration,
        shards.len()
    );

    Ok(CheckpointLayout { iteration, shards })
}
