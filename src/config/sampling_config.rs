//! Decoding configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::GlmError;

/// Input source value that reads queries from stdin
pub const INTERACTIVE: &str = "interactive";

/// Decoding strategy used by the inference driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Temperature + top-k / top-p sampling
    #[default]
    BaseStrategy,
    /// Length-penalized beam search
    BeamSearchStrategy,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::BaseStrategy => "BaseStrategy",
            StrategyKind::BeamSearchStrategy => "BeamSearchStrategy",
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = GlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BaseStrategy" | "base" => Ok(StrategyKind::BaseStrategy),
            "BeamSearchStrategy" | "beam" => Ok(StrategyKind::BeamSearchStrategy),
            other => Err(GlmError::invalid("sampling_strategy", format!("unknown strategy {other}"))),
        }
    }
}

/// Configuration for a decoding run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Decoding strategy
    pub strategy: StrategyKind,

    /// Temperature for sampling (higher = more random)
    pub temperature: f32,

    /// Top-k sampling (0 = disabled)
    pub top_k: usize,

    /// Top-p (nucleus) threshold, used only when top-k is disabled (0 = disabled)
    pub top_p: f32,

    /// Beam count for beam search
    pub num_beams: usize,

    /// Forbid repeating n-grams of this size (0 = disabled)
    pub no_repeat_ngram_size: usize,

    /// Length penalty exponent for finished beams
    pub length_penalty: f32,

    /// Minimum generated tokens before an end token may be chosen
    pub min_tgt_length: usize,

    /// Total sequence length including the context
    pub out_seq_length: usize,

    /// Answers generated per query
    pub batch_size: usize,

    /// Largest batch handed to the model at once
    pub max_inference_batch_size: usize,

    /// Random seed for reproducibility
    pub seed: u64,

    /// Directory answers are written to
    pub output_path: PathBuf,

    /// Query file, or `interactive` for stdin
    pub input_source: String,

    /// Input lines are `id<TAB>text` and answers are named by id
    pub with_id: bool,

    /// Generate with `[gMASK]` instead of `[MASK]`
    pub task_mask: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::BaseStrategy,
            temperature: 1.0,
            top_k: 0,
            top_p: 0.7,
            num_beams: 4,
            no_repeat_ngram_size: 3,
            length_penalty: 1.0,
            min_tgt_length: 0,
            out_seq_length: 256,
            batch_size: 1,
            max_inference_batch_size: 12,
            seed: 1234,
            output_path: PathBuf::from("samples"),
            input_source: INTERACTIVE.to_string(),
            with_id: false,
            task_mask: false,
        }
    }
}

impl SamplingConfig {
    /// Create a greedy decoding configuration
    pub fn greedy() -> Self {
        Self {
            temperature: 1.0,
            top_k: 1,
            top_p: 0.0,
            ..Default::default()
        }
    }

    /// Create a beam search configuration
    pub fn beam_search(num_beams: usize) -> Self {
        Self {
            strategy: StrategyKind::BeamSearchStrategy,
            num_beams,
            ..Default::default()
        }
    }

    /// Set the total output length
    pub fn with_out_seq_length(mut self, length: usize) -> Self {
        self.out_seq_length = length;
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = temp;
        self
    }

    /// Set the input source
    pub fn with_input_source(mut self, source: impl Into<String>) -> Self {
        self.input_source = source.into();
        self
    }

    /// Whether queries are read from stdin
    pub fn is_interactive(&self) -> bool {
        self.input_source == INTERACTIVE
    }

    /// Command-line flags describing this run, in a fixed order
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--sampling-strategy".to_string(),
            self.strategy.as_str().to_string(),
            "--num-beams".to_string(),
            self.num_beams.to_string(),
            "--no-repeat-ngram-size".to_string(),
            self.no_repeat_ngram_size.to_string(),
            "--length-penalty".to_string(),
            self.length_penalty.to_string(),
            "--min-tgt-length".to_string(),
            self.min_tgt_length.to_string(),
            "--out-seq-length".to_string(),
            self.out_seq_length.to_string(),
            "--temperature".to_string(),
            self.temperature.to_string(),
            "--top_k".to_string(),
            self.top_k.to_string(),
            "--top_p".to_string(),
            self.top_p.to_string(),
            "--seed".to_string(),
            self.seed.to_string(),
            "--batch-size".to_string(),
            self.batch_size.to_string(),
            "--max-inference-batch-size".to_string(),
            self.max_inference_batch_size.to_string(),
            "--output-path".to_string(),
            self.output_path.display().to_string(),
            "--input-source".to_string(),
            self.input_source.clone(),
        ];

        if self.with_id {
            args.push("--with-id".to_string());
        }
        if self.task_mask {
            args.push("--task-mask".to_string());
        }

        args
    }

    /// Check the configuration for values the runtime would reject
    pub fn validate(&self) -> crate::Result<()> {
        if !(self.temperature > 0.0) {
            return Err(GlmError::invalid("temperature", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(GlmError::invalid("top_p", "must lie in [0, 1]"));
        }
        if self.num_beams == 0 {
            return Err(GlmError::invalid("num_beams", "must be at least 1"));
        }
        if self.out_seq_length == 0 {
            return Err(GlmError::invalid("out_seq_length", "must be positive"));
        }
        if self.batch_size == 0 {
            return Err(GlmError::invalid("batch_size", "must be at least 1"));
        }
        if self.max_inference_batch_size == 0 {
            return Err(GlmError::invalid("max_inference_batch_size", "must be at least 1"));
        }

        let mbz = self.max_inference_batch_size;
        if !(self.batch_size < mbz || self.batch_size % mbz == 0) {
            return Err(GlmError::invalid(
                "batch_size",
                format!("{} must be below or a multiple of max_inference_batch_size {}", self.batch_size, mbz),
            ));
        }
        if self.input_source.trim().is_empty() {
            return Err(GlmError::invalid("input_source", "must not be empty"));
        }

        Ok(())
    }

    /// Number of model batches per query and the size of each
    pub fn batch_rounds(&self) -> (usize, usize) {
        let mbz = self.max_inference_batch_size.max(1);
        ((self.batch_size / mbz).max(1), self.batch_size.min(mbz))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let args = SamplingConfig::default().to_args();
        let value = |flag: &str| {
            let i = args.iter().position(|a| a == flag).unwrap();
            args[i + 1].clone()
        };

        assert_eq!(value("--sampling-strategy"), "BaseStrategy");
        assert_eq!(value("--top_k"), "0");
        assert_eq!(value("--top_p"), "0.7");
        assert_eq!(value("--temperature"), "1");
        assert_eq!(value("--out-seq-length"), "256");
        assert_eq!(value("--input-source"), "interactive");
        assert!(!args.contains(&"--with-id".to_string()));
    }

    #[test]
    fn test_batch_rounds() {
        let mut config = SamplingConfig::default();
        config.batch_size = 24;
        config.max_inference_batch_size = 12;
        assert_eq!(config.batch_rounds(), (2, 12));

        config.batch_size = 5;
        assert_eq!(config.batch_rounds(), (1, 5));
    }

    #[test]
    fn test_validation() {
        assert!(SamplingConfig::default().validate().is_ok());
        assert!(SamplingConfig::default().with_temperature(0.0).validate().is_err());

        let mut config = SamplingConfig::default();
        config.batch_size = 18;
        config.max_inference_batch_size = 12;
        assert!(matches!(
            config.validate(),
            Err(GlmError::InvalidValue { field: "batch_size", .. })
        ));

        config.top_p = 1.5;
        config.batch_size = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("beam".parse::<StrategyKind>().unwrap(), StrategyKind::BeamSearchStrategy);
        assert_eq!("BaseStrategy".parse::<StrategyKind>().unwrap(), StrategyKind::BaseStrategy);
        assert!("Nucleus".parse::<StrategyKind>().is_err());
    }
}
