//! Profiles: one file holding every setting of a deployment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{LaunchConfig, ModelConfig, SamplingConfig, StrategyKind};
use crate::inference::CommandTokens;
use crate::GlmError;

/// A complete deployment profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    /// Profile name, used in logs
    pub name: String,
    pub model: ModelConfig,
    pub sampling: SamplingConfig,
    pub launch: LaunchConfig,
    /// Special token ids of the tokenizer
    pub commands: CommandTokens,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            name: "glm-130b".to_string(),
            model: ModelConfig::glm_130b(),
            sampling: SamplingConfig::default(),
            launch: LaunchConfig::default(),
            commands: CommandTokens::default(),
        }
    }
}

impl Profile {
    /// Load a profile from a `.toml` or `.json` file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let profile = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content)?,
            Some("json") => Self::from_json_str(&content)?,
            _ => {
                return Err(GlmError::ConfigError(format!(
                    "unsupported profile format: {}",
                    path.display()
                )))
            }
        };

        tracing::debug!("Loaded profile '{}' from {:?}", profile.name, path);
        Ok(profile)
    }

    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Validate every section
    pub fn validate(&self) -> crate::Result<()> {
        self.model.validate()?;
        self.sampling.validate()?;
        self.launch.validate(self.model.model_parallel_size)?;
        self.commands.validate(self.model.vocab_size)?;
        Ok(())
    }
}

/// Values replacing profile settings, usually taken from the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub checkpoint_path: Option<PathBuf>,
    pub model_parallel_size: Option<usize>,
    pub strategy: Option<StrategyKind>,
    pub temperature: Option<f32>,
    pub top_k: Option<usize>,
    pub top_p: Option<f32>,
    pub num_beams: Option<usize>,
    pub out_seq_length: Option<usize>,
    pub seed: Option<u64>,
    pub input_source: Option<String>,
    pub output_path: Option<PathBuf>,
    pub master_port: Option<u16>,
    pub log_dir: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

impl Overrides {
    /// Apply the overrides in place
    pub fn apply(self, profile: &mut Profile) {
        if let Some(path) = self.checkpoint_path {
            profile.model.checkpoint_path = path;
        }
        if let Some(mp) = self.model_parallel_size {
            profile.model.model_parallel_size = mp;
        }
        if let Some(strategy) = self.strategy {
            profile.sampling.strategy = strategy;
        }
        if let Some(temperature) = self.temperature {
            profile.sampling.temperature = temperature;
        }
        if let Some(top_k) = self.top_k {
            profile.sampling.top_k = top_k;
        }
        if let Some(top_p) = self.top_p {
            profile.sampling.top_p = top_p;
        }
        if let Some(num_beams) = self.num_beams {
            profile.sampling.num_beams = num_beams;
        }
        if let Some(length) = self.out_seq_length {
            profile.sampling.out_seq_length = length;
        }
        if let Some(seed) = self.seed {
            profile.sampling.seed = seed;
        }
        if let Some(source) = self.input_source {
            profile.sampling.input_source = source;
        }
        if let Some(output) = self.output_path {
            profile.sampling.output_path = output;
        }
        if let Some(port) = self.master_port {
            profile.launch.master_port = Some(port);
        }
        if let Some(dir) = self.log_dir {
            profile.launch.log_dir = dir;
        }
        profile.launch.extra_args.extend(self.extra_args);
    }
}
