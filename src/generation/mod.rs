//! Text generation: attention layouts, sampling strategies and the filling loop.

mod beam_search;
mod filling;
mod masks;
mod strategy;

pub use beam_search::BeamSearchStrategy;
pub use filling::filling_sequence;
pub use masks::{AttentionMask, SequenceLayout};
pub use strategy::{log_softmax_rows, softmax_rows, top_k_filter, top_p_filter, BaseStrategy, SamplingStrategy};

use crate::config::{SamplingConfig, StrategyKind};

/// Build the strategy a sampling configuration asks for
pub fn strategy_from_config(config: &SamplingConfig, end_tokens: Vec<u32>) -> Box<dyn SamplingStrategy + Send> {
    match config.strategy {
        StrategyKind::BaseStrategy => Box::new(BaseStrategy::from_config(config, end_tokens)),
        StrategyKind::BeamSearchStrategy => Box::new(BeamSearchStrategy::from_config(config, end_tokens)),
    }
}
