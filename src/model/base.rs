//! Base trait for GLM models driven by this crate.

use candle_core::Tensor;

/// Trait for a GLM model the blank filler and evaluator can run.
///
/// The model itself lives outside this crate (a partitioned runtime, a
/// remote endpoint, a test double). Implementations only have to turn a
/// token batch with its layout into logits.
pub trait GlmModel: Send {
    /// Get the model's vocabulary size
    fn vocab_size(&self) -> usize;

    /// Full forward pass.
    ///
    /// # Arguments
    /// * `tokens` - `u32` tensor of shape [batch, seq]
    /// * `position_ids` - `u32` tensor of shape [batch, seq] or [1, seq]
    /// * `attention_mask` - `u8` tensor of shape [batch, 1, seq, seq] or
    ///   [1, 1, seq, seq]; 1 marks a key position the query may attend to
    ///
    /// # Returns
    /// `f32` logits of shape [batch, seq, vocab]
    fn forward(
        &mut self,
        tokens: &Tensor,
        position_ids: &Tensor,
        attention_mask: &Tensor,
    ) -> crate::Result<Tensor>;

    /// Logits at the last position only, shape [batch, vocab]
    fn forward_last(
        &mut self,
        tokens: &Tensor,
        position_ids: &Tensor,
        attention_mask: &Tensor,
    ) -> crate::Result<Tensor> {
        let logits = self.forward(tokens, position_ids, attention_mask)?;
        let seq_len = logits.dim(1)?;
        Ok(logits.narrow(1, seq_len - 1, 1)?.squeeze(1)?)
    }
}
