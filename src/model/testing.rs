//! Deterministic model double for tests.

use candle_core::{Device, Tensor};

use super::GlmModel;

/// Emits `script[k]` at the k-th position after the first `sop` of a row and
/// `eop` once the script runs out. Positions before `sop` get flat logits.
pub(crate) struct ScriptedModel {
    pub vocab: usize,
    pub sop: u32,
    pub eop: u32,
    pub script: Vec<u32>,
    pub calls: usize,
}

impl ScriptedModel {
    pub fn new(vocab: usize, sop: u32, eop: u32, script: Vec<u32>) -> Self {
        Self {
            vocab,
            sop,
            eop,
            script,
            calls: 0,
        }
    }
}

impl GlmModel for ScriptedModel {
    fn vocab_size(&self) -> usize {
        self.vocab
    }

    fn forward(
        &mut self,
        tokens: &Tensor,
        _position_ids: &Tensor,
        _attention_mask: &Tensor,
    ) -> crate::Result<Tensor> {
        self.calls += 1;
        let rows: Vec<Vec<u32>> = tokens.to_vec2()?;
        let seq_len = tokens.dim(1)?;

        let mut data = Vec::with_capacity(rows.len() * seq_len * self.vocab);
        for row in &rows {
            let sop_at = row.iter().position(|&t| t == self.sop);
            for p in 0..seq_len {
                let mut logits = vec![0f32; self.vocab];
                if let Some(s) = sop_at.filter(|&s| s <= p) {
                    let target = self.script.get(p - s).copied().unwrap_or(self.eop);
                    logits[target as usize] = 10.0;
                }
                data.extend(logits);
            }
        }

        Ok(Tensor::from_vec(data, (rows.len(), seq_len, self.vocab), &Device::Cpu)?)
    }
}
