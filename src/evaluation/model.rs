//! Scoring and generation on top of a [`GlmModel`] for evaluation.

use candle_core::{Device, IndexOp, D};

use super::dataset::{GenerationSample, MultiChoiceBatch};
use crate::generation::{filling_sequence, SamplingStrategy};
use crate::model::GlmModel;
use crate::GlmError;

/// Wraps a model for zero-shot scoring.
pub struct ModelForEvaluation<'a, M: GlmModel + ?Sized> {
    model: &'a mut M,
    device: Device,
}

impl<'a, M: GlmModel + ?Sized> ModelForEvaluation<'a, M> {
    pub fn new(model: &'a mut M, device: Device) -> Self {
        Self { model, device }
    }

    /// Conditional log-probability of every choice of every sample.
    ///
    /// Single-token batches read all choices at the one target position;
    /// otherwise each choice sums the log-probabilities of its tokens.
    pub fn cond_log_prob(&mut self, batch: &MultiChoiceBatch) -> crate::Result<Vec<Vec<f32>>> {
        let (tokens, position_ids, masks) = batch.to_tensors(&self.device)?;
        let logits = self.model.forward(&tokens, &position_ids, &masks)?;

        let mut log_probs = Vec::with_capacity(batch.len());
        for (i, (choices, target_ids)) in batch.choices.iter().zip(&batch.choice_target_ids).enumerate() {
            let row_log_probs = |position: usize| -> crate::Result<Vec<f32>> {
                let row = logits.i((i, position))?;
                Ok(candle_nn::ops::log_softmax(&row, D::Minus1)?.to_vec1::<f32>()?)
            };

            if batch.is_single_token {
                let position = target_ids
                    .first()
                    .and_then(|ids| ids.first())
                    .copied()
                    .ok_or_else(|| GlmError::DatasetError("sample without target position".to_string()))?;
                let dist = row_log_probs(position)?;
                log_probs.push(
                    choices
                        .iter()
                        .map(|choice| lookup(&dist, choice[0]))
                        .collect::<crate::Result<Vec<_>>>()?,
                );
            } else {
                let mut per_choice = Vec::with_capacity(choices.len());
                for (choice, ids) in choices.iter().zip(target_ids) {
                    let mut total = 0f32;
                    for (&token, &position) in choice.iter().zip(ids) {
                        total += lookup(&row_log_probs(position)?, token)?;
                    }
                    per_choice.push(total);
                }
                log_probs.push(per_choice);
            }
        }

        Ok(log_probs)
    }

    /// Generate after the sample's context.
    ///
    /// # Returns
    /// Generated token spans, best first, with one trailing end token removed
    pub fn generate_text<S>(
        &mut self,
        sample: &GenerationSample,
        strategy: &mut S,
        max_length: usize,
    ) -> crate::Result<Vec<Vec<u32>>>
    where
        S: SamplingStrategy + ?Sized,
    {
        let max_length = max_length.min(sample.tokens.len());
        let context_length = sample.context_length;
        let layout = sample.layout();

        let outputs = filling_sequence(
            &mut *self.model,
            sample.context(),
            max_length,
            1,
            &layout,
            strategy,
            &self.device,
        )?;

        let end_tokens = strategy.end_tokens();
        Ok(outputs
            .into_iter()
            .map(|row| {
                let mut end = row.len();
                if end > context_length && end_tokens.contains(&row[end - 1]) {
                    end -= 1;
                }
                row[context_length.min(end)..end].to_vec()
            })
            .collect())
    }
}

fn lookup(dist: &[f32], token: u32) -> crate::Result<f32> {
    dist.get(token as usize)
        .copied()
        .ok_or_else(|| GlmError::DatasetError(format!("token {} outside the vocabulary of {}", token, dist.len())))
}
