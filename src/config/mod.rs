//! Configuration module for model, sampling and launcher settings.

mod launch_config;
mod model_config;
mod profile;
mod sampling_config;

pub use launch_config::{LaunchConfig, LauncherKind};
pub use model_config::{LayernormOrder, ModelConfig, Precision};
pub use profile::{Overrides, Profile};
pub use sampling_config::{SamplingConfig, StrategyKind, INTERACTIVE};
