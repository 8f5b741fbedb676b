//! Blank filling: generate for each generation mask and splice the result back.

use candle_core::Device;

use super::query::EncodedQuery;
use super::CommandTokens;
use crate::config::SamplingConfig;
use crate::generation::{filling_sequence, SamplingStrategy, SequenceLayout};
use crate::model::GlmModel;
use crate::GlmError;

/// Fills every generation mask of a query, left to right.
///
/// The strategy is borrowed so its random state carries over from one query
/// to the next.
pub struct BlankFiller<'a, M: GlmModel + ?Sized> {
    model: &'a mut M,
    commands: CommandTokens,
    config: &'a SamplingConfig,
    strategy: &'a mut dyn SamplingStrategy,
    device: Device,
}

impl<'a, M: GlmModel + ?Sized> BlankFiller<'a, M> {
    pub fn new(
        model: &'a mut M,
        commands: CommandTokens,
        config: &'a SamplingConfig,
        strategy: &'a mut dyn SamplingStrategy,
        device: Device,
    ) -> Self {
        Self {
            model,
            commands,
            config,
            strategy,
            device,
        }
    }

    /// Run generation until no generation mask is left in the best row.
    ///
    /// # Returns
    /// Every answer row of the last round, masks replaced by generated spans
    pub fn fill(&mut self, encoded: &EncodedQuery) -> crate::Result<Vec<Vec<u32>>> {
        let end_tokens = self.commands.end_tokens();
        let sop = self.commands.sop;
        let (rounds, per_round) = self.config.batch_rounds();

        let mut outputs = vec![encoded.tokens.clone()];
        // Each round consumes one mask unless the model writes new ones
        let mut budget = self.config.out_seq_length.max(encoded.tokens.len()) + 1;

        loop {
            let seq = outputs[0].clone();
            let Some(mask_position) = seq.iter().position(|&t| t == encoded.generation_mask) else {
                break;
            };
            if budget == 0 {
                return Err(GlmError::GenerationError(
                    "generated text keeps producing new blanks".to_string(),
                ));
            }
            budget -= 1;

            let mut context = seq;
            context.push(sop);
            let context_length = context.len();
            let max_length = self.config.out_seq_length.max(context_length);
            let layout = if self.config.task_mask {
                SequenceLayout::gmask(max_length, context_length)
            } else {
                SequenceLayout::mask(max_length, context_length, mask_position)
            };
            tracing::debug!(
                "Filling blank at {} (context {}, up to {})",
                mask_position,
                context_length,
                max_length
            );

            let mut rows = Vec::new();
            for _ in 0..rounds {
                rows.extend(filling_sequence(
                    &mut *self.model,
                    &context,
                    max_length,
                    per_round,
                    &layout,
                    &mut *self.strategy,
                    &self.device,
                )?);
            }
            if rows.is_empty() {
                return Err(GlmError::GenerationError("strategy returned no sequences".to_string()));
            }

            outputs = rows
                .into_iter()
                .map(|row| splice(&row, mask_position, sop, &end_tokens))
                .collect::<crate::Result<_>>()?;
        }

        Ok(outputs)
    }
}

/// Move the span generated after `sop` into the blank at `mask_position`.
///
/// `row[..mask] + row[bog+1..end] + row[mask+1..bog]`, where `bog` is the
/// first `sop` and `end` drops one trailing end token.
pub fn splice(row: &[u32], mask_position: usize, sop: u32, end_tokens: &[u32]) -> crate::Result<Vec<u32>> {
    let bog = row
        .iter()
        .position(|&t| t == sop)
        .ok_or_else(|| GlmError::GenerationError("generated row has no sop token".to_string()))?;
    if mask_position >= bog {
        return Err(GlmError::GenerationError(format!(
            "blank at {} lies after sop at {}",
            mask_position, bog
        )));
    }

    let mut end = row.len();
    if end > bog + 1 && end_tokens.contains(&row[end - 1]) {
        end -= 1;
    }

    let mut out = Vec::with_capacity(row.len());
    out.extend_from_slice(&row[..mask_position]);
    out.extend_from_slice(&row[bog + 1..end]);
    out.extend_from_slice(&row[mask_position + 1..bog]);
    Ok(out)
}
