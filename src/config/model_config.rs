//! Static model configuration forwarded to the external runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::GlmError;

/// Placement of layer normalization inside each transformer block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayernormOrder {
    Pre,
    /// GLM-130B uses post-LN with DeepNorm scaling
    #[default]
    Post,
    Sandwich,
}

impl LayernormOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayernormOrder::Pre => "pre",
            LayernormOrder::Post => "post",
            LayernormOrder::Sandwich => "sandwich",
        }
    }
}

/// Numeric precision of the loaded weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    Fp16,
    Bf16,
    Fp32,
}

impl Precision {
    /// Runtime flag selecting this precision, if any
    pub fn flag(&self) -> Option<&'static str> {
        match self {
            Precision::Fp16 => Some("--fp16"),
            Precision::Bf16 => Some("--bf16"),
            Precision::Fp32 => None,
        }
    }

    /// Bytes per parameter
    pub fn bytes(&self) -> usize {
        match self {
            Precision::Fp16 | Precision::Bf16 => 2,
            Precision::Fp32 => 4,
        }
    }
}

/// Model configuration: checkpoint location, parallelism and architecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Checkpoint directory passed as `--load`
    pub checkpoint_path: PathBuf,

    /// Number of devices a single model replica is partitioned across
    pub model_parallel_size: usize,

    /// Number of transformer layers
    pub num_layers: usize,

    /// Hidden size (embedding dimension)
    pub hidden_size: usize,

    /// Hidden size of the MLP inside each layer
    pub inner_hidden_size: usize,

    /// Vocabulary size (padded)
    pub vocab_size: usize,

    /// Number of attention heads
    pub num_attention_heads: usize,

    /// Maximum sequence length
    pub max_sequence_length: usize,

    /// Tokenizer identifier understood by the runtime
    pub tokenizer_type: String,

    /// Layer normalization placement
    pub layernorm_order: LayernormOrder,

    /// Skip random weight initialization before loading the checkpoint
    pub skip_init: bool,

    /// Weight precision
    pub precision: Precision,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::glm_130b()
    }
}

impl ModelConfig {
    /// The GLM-130B deployment on a single 8-GPU node
    pub fn glm_130b() -> Self {
        Self {
            checkpoint_path: PathBuf::from("checkpoints/glm-130b-sat"),
            model_parallel_size: 8,
            num_layers: 70,
            hidden_size: 12288,
            inner_hidden_size: 32768,
            vocab_size: 150528,
            num_attention_heads: 96,
            max_sequence_length: 2048,
            tokenizer_type: "icetk-glm-130B".to_string(),
            layernorm_order: LayernormOrder::Post,
            skip_init: true,
            precision: Precision::Fp16,
        }
    }

    /// Command-line flags describing this model, in a fixed order
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--model-parallel-size".to_string(),
            self.model_parallel_size.to_string(),
            "--num-layers".to_string(),
            self.num_layers.to_string(),
            "--hidden-size".to_string(),
            self.hidden_size.to_string(),
            "--inner-hidden-size".to_string(),
            self.inner_hidden_size.to_string(),
            "--vocab-size".to_string(),
            self.vocab_size.to_string(),
            "--num-attention-heads".to_string(),
            self.num_attention_heads.to_string(),
            "--max-sequence-length".to_string(),
            self.max_sequence_length.to_string(),
            "--tokenizer-type".to_string(),
            self.tokenizer_type.clone(),
            "--layernorm-order".to_string(),
            self.layernorm_order.as_str().to_string(),
            "--load".to_string(),
            self.checkpoint_path.display().to_string(),
        ];

        if self.skip_init {
            args.push("--skip-init".to_string());
        }
        if let Some(flag) = self.precision.flag() {
            args.push(flag.to_string());
        }

        args
    }

    /// Check the configuration for values the runtime would reject
    pub fn validate(&self) -> crate::Result<()> {
        if self.checkpoint_path.as_os_str().is_empty() {
            return Err(GlmError::invalid("checkpoint_path", "must not be empty"));
        }
        if self.model_parallel_size == 0 {
            return Err(GlmError::invalid("model_parallel_size", "must be at least 1"));
        }

        let dims = [
            ("num_layers", self.num_layers),
            ("hidden_size", self.hidden_size),
            ("inner_hidden_size", self.inner_hidden_size),
            ("vocab_size", self.vocab_size),
            ("num_attention_heads", self.num_attention_heads),
            ("max_sequence_length", self.max_sequence_length),
        ];
        for (field, value) in dims {
            if value == 0 {
                return Err(GlmError::invalid(field, "must be positive"));
            }
        }

        if self.hidden_size % self.num_attention_heads != 0 {
            return Err(GlmError::invalid(
                "hidden_size",
                format!(
                    "{} is not divisible by {} attention heads",
                    self.hidden_size, self.num_attention_heads
                ),
            ));
        }
        if self.num_attention_heads % self.model_parallel_size != 0 {
            return Err(GlmError::invalid(
                "model_parallel_size",
                format!(
                    "{} attention heads cannot be split across {} partitions",
                    self.num_attention_heads, self.model_parallel_size
                ),
            ));
        }
        if self.tokenizer_type.trim().is_empty() {
            return Err(GlmError::invalid("tokenizer_type", "must not be empty"));
        }

        Ok(())
    }

    /// Get head dimension
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    /// Parameters in a single transformer layer (attention + GLU MLP)
    pub fn params_per_layer(&self) -> usize {
        self.hidden_size * self.hidden_size * 4 + self.hidden_size * self.inner_hidden_size * 3
    }

    /// Estimated parameter count; the output projection shares the embedding
    pub fn estimated_parameters(&self) -> usize {
        self.vocab_size * self.hidden_size + self.params_per_layer() * self.num_layers
    }

    /// Estimated weight bytes held by each model-parallel partition
    pub fn bytes_per_partition(&self) -> usize {
        self.estimated_parameters() * self.precision.bytes() / self.model_parallel_size.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glm_130b_args() {
        let config = ModelConfig::glm_130b();
        let args = config.to_args();

        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[pos("--model-parallel-size") + 1], "8");
        assert_eq!(args[pos("--num-layers") + 1], "70");
        assert_eq!(args[pos("--hidden-size") + 1], "12288");
        assert_eq!(args[pos("--inner-hidden-size") + 1], "32768");
        assert_eq!(args[pos("--vocab-size") + 1], "150528");
        assert_eq!(args[pos("--tokenizer-type") + 1], "icetk-glm-130B");
        assert_eq!(args[pos("--layernorm-order") + 1], "post");
        assert!(args.contains(&"--skip-init".to_string()));
        assert_eq!(args.last().unwrap(), "--fp16");
    }

    #[test]
    fn test_precision_flags() {
        let mut config = ModelConfig::glm_130b();
        config.precision = Precision::Fp32;
        config.skip_init = false;
        let args = config.to_args();
        assert!(!args.iter().any(|a| a == "--fp16" || a == "--bf16" || a == "--skip-init"));

        config.precision = Precision::Bf16;
        assert!(config.to_args().contains(&"--bf16".to_string()));
    }

    #[test]
    fn test_validation() {
        assert!(ModelConfig::glm_130b().validate().is_ok());

        let mut config = ModelConfig::glm_130b();
        config.model_parallel_size = 5;
        assert!(matches!(
            config.validate(),
            Err(GlmError::InvalidValue { field: "model_parallel_size", .. })
        ));

        let mut config = ModelConfig::glm_130b();
        config.hidden_size = 1000;
        assert!(config.validate().is_err());

        let mut config = ModelConfig::glm_130b();
        config.checkpoint_path = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parameter_estimate() {
        let config = ModelConfig::glm_130b();
        assert_eq!(config.head_dim(), 128);

        let billions = config.estimated_parameters() as f64 / 1e9;
        assert!(billions > 120.0 && billions < 140.0, "got {billions}");
    }
}
