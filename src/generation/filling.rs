//! Autoregressive filling loop.

use candle_core::{Device, Tensor};

use super::{SamplingStrategy, SequenceLayout};
use crate::model::GlmModel;
use crate::GlmError;

/// Extend `context` token by token until `max_length` or the strategy stops.
///
/// The context is replicated `batch_size` times. Every step re-runs the model
/// over the whole prefix with the matching slice of `layout` and hands the
/// last-position logits to the strategy.
///
/// # Returns
/// The strategy's finalized sequences (context included)
pub fn filling_sequence<M, S>(
    model: &mut M,
    context: &[u32],
    max_length: usize,
    batch_size: usize,
    layout: &SequenceLayout,
    strategy: &mut S,
    device: &Device,
) -> crate::Result<Vec<Vec<u32>>>
where
    M: GlmModel + ?Sized,
    S: SamplingStrategy + ?Sized,
{
    if context.is_empty() {
        return Err(GlmError::GenerationError("empty context".to_string()));
    }
    if layout.len() < max_length {
        return Err(GlmError::GenerationError(format!(
            "layout covers {} positions, {} requested",
            layout.len(),
            max_length
        )));
    }

    let mut tokens = vec![context.to_vec(); batch_size.max(1)];
    let mut cur_len = context.len();

    while cur_len < max_length {
        let (position_ids, mask) = layout.prefix_tensors(cur_len, device)?;
        let input = batch_tensor(&tokens, cur_len, device)?;

        let logits = model.forward_last(&input, &position_ids, &mask)?;
        tokens = strategy.forward(&logits, tokens)?;
        cur_len += 1;

        if strategy.is_done() || tokens.is_empty() {
            tracing::trace!("Strategy finished at length {}", cur_len);
            break;
        }
    }

    Ok(strategy.finalize(tokens))
}

/// `u32` tensor [batch, len]; rows that stopped early are padded with 0
fn batch_tensor(rows: &[Vec<u32>], len: usize, device: &Device) -> crate::Result<Tensor> {
    let mut flat = Vec::with_capacity(rows.len() * len);
    for row in rows {
        let take = row.len().min(len);
        flat.extend_from_slice(&row[..take]);
        flat.extend(std::iter::repeat(0).take(len - take));
    }
    Ok(Tensor::from_vec(flat, (rows.len(), len), device)?)
}
