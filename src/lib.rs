//! # glm-launch
//!
//! Launch, inference and evaluation tooling for GLM-130B style deployments.
//!
//! ## Core Concept
//!
//! The heavy model runs inside an external distributed runtime. This crate
//! owns everything around it:
//! - **Profiles**: model, sampling and launcher settings in one TOML/JSON file
//! - **Launching**: one composed command line under `torchrun` or `deepspeed`,
//!   with its output teed into a timestamped log file
//! - **Blank filling**: `[MASK]`/`[gMASK]` query encoding, attention layouts,
//!   sampling strategies and the autoregressive filling loop over any
//!   [`GlmModel`]
//! - **Evaluation**: zero-shot generation and multiple-choice tasks with
//!   EM / F1 / Accuracy reporting
//!
//! ## Example
//!
//! ```ignore
//! use glm_launch::{Profile, launch};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let profile = Profile::from_file("configs/glm-130b.toml")?;
//!     profile.validate()?;
//!     let plan = launch::LaunchPlan::prepare(&profile, std::env::var("PYTHONPATH").ok())?;
//!     let outcome = launch::run(&plan, chrono::Local::now()).await?;
//!     println!("log written to {:?}", outcome.log_path);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod evaluation;
pub mod generation;
pub mod inference;
pub mod launch;
pub mod model;
pub mod utils;

// Re-exports for convenience
pub use config::{LaunchConfig, ModelConfig, Profile, SamplingConfig, StrategyKind};
pub use generation::{filling_sequence, BaseStrategy, BeamSearchStrategy, SamplingStrategy, SequenceLayout};
pub use inference::{BlankFiller, CommandTokens, HfTokenizer, InferenceSession, Query, TextTokenizer};
pub use launch::{CommandLine, LaunchOutcome, LaunchPlan};
pub use model::GlmModel;

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum GlmError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Flag {0} would appear more than once on the command line")]
    DuplicateFlag(String),

    #[error("Checkpoint error: {0}")]
    CheckpointError(String),

    #[error("Launch error: {0}")]
    LaunchError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Generation error: {0}")]
    GenerationError(String),

    #[error("Dataset error: {0}")]
    DatasetError(String),

    #[error("Tokenizer error: {0}")]
    TokenizerError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Candle error: {0}")]
    CandleError(#[from] candle_core::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, GlmError>;

impl GlmError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        GlmError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}
