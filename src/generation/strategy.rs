//! Token sampling strategies for blank filling.

use candle_core::{DType, Device, Tensor, D};
use rand::prelude::*;

use crate::config::SamplingConfig;

/// A decoding strategy stepping a batch of sequences one token at a time.
pub trait SamplingStrategy {
    /// Tokens that end a sequence
    fn end_tokens(&self) -> &[u32];

    /// Extend `tokens` using the last-position `logits` of shape [batch, vocab].
    ///
    /// The returned batch may differ in size from the input (beam search
    /// reorders and prunes rows).
    fn forward(&mut self, logits: &Tensor, tokens: Vec<Vec<u32>>) -> crate::Result<Vec<Vec<u32>>>;

    /// No further step can change the result
    fn is_done(&self) -> bool;

    /// Final sequences, best first where a ranking exists. Resets the strategy.
    fn finalize(&mut self, tokens: Vec<Vec<u32>>) -> Vec<Vec<u32>>;
}

/// Temperature + top-k / top-p sampling.
pub struct BaseStrategy {
    temperature: f32,
    top_k: usize,
    top_p: f32,
    end_tokens: Vec<u32>,
    rng: StdRng,
    done: Vec<bool>,
}

impl BaseStrategy {
    /// Create a new sampler; `seed` makes runs reproducible
    pub fn new(temperature: f32, top_k: usize, top_p: f32, end_tokens: Vec<u32>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            temperature,
            top_k,
            top_p,
            end_tokens,
            rng,
            done: Vec::new(),
        }
    }

    pub fn from_config(config: &SamplingConfig, end_tokens: Vec<u32>) -> Self {
        Self::new(config.temperature, config.top_k, config.top_p, end_tokens, Some(config.seed))
    }

    /// Always pick the most likely token
    pub fn greedy(end_tokens: Vec<u32>) -> Self {
        Self::new(1.0, 1, 0.0, end_tokens, Some(0))
    }

    fn filter(&self, logits: &mut [f32]) -> crate::Result<()> {
        if self.temperature != 1.0 {
            for l in logits.iter_mut() {
                *l /= self.temperature;
            }
        }

        if self.top_k > 0 {
            top_k_filter(logits, self.top_k);
        } else if self.top_p > 0.0 {
            top_p_filter(logits, self.top_p)?;
        }
        Ok(())
    }
}

impl SamplingStrategy for BaseStrategy {
    fn end_tokens(&self) -> &[u32] {
        &self.end_tokens
    }

    fn forward(&mut self, logits: &Tensor, mut tokens: Vec<Vec<u32>>) -> crate::Result<Vec<Vec<u32>>> {
        let mut rows: Vec<Vec<f32>> = logits.to_dtype(DType::F32)?.to_vec2()?;
        if rows.len() != tokens.len() {
            return Err(crate::GlmError::GenerationError(format!(
                "{} logit rows for {} sequences",
                rows.len(),
                tokens.len()
            )));
        }
        self.done.resize(tokens.len(), false);

        for row in rows.iter_mut() {
            self.filter(row)?;
        }
        let probs = softmax_rows(&rows)?;

        for (i, seq) in tokens.iter_mut().enumerate() {
            if self.done[i] {
                continue;
            }
            let token = sample_from_probs(&probs[i], &mut self.rng);
            seq.push(token);
            if self.end_tokens.contains(&token) {
                self.done[i] = true;
            }
        }

        Ok(tokens)
    }

    fn is_done(&self) -> bool {
        !self.done.is_empty() && self.done.iter().all(|&d| d)
    }

    fn finalize(&mut self, tokens: Vec<Vec<u32>>) -> Vec<Vec<u32>> {
        self.done.clear();
        tokens
    }
}

/// Mask everything below the k-th largest logit
pub fn top_k_filter(logits: &mut [f32], k: usize) {
    if logits.is_empty() {
        return;
    }
    let k = k.min(logits.len());

    let mut sorted: Vec<f32> = logits.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let threshold = sorted[k - 1];

    for l in logits.iter_mut() {
        if *l < threshold {
            *l = f32::NEG_INFINITY;
        }
    }
}

/// Keep the smallest set of most likely tokens whose mass exceeds `p`.
///
/// The most likely token always survives.
pub fn top_p_filter(logits: &mut [f32], p: f32) -> crate::Result<()> {
    if logits.is_empty() {
        return Ok(());
    }
    let probs = softmax_rows(&[logits.to_vec()])?.remove(0);

    let mut indexed: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut cumsum = 0.0;
    for (rank, &(idx, prob)) in indexed.iter().enumerate() {
        // Drop a token once the tokens ranked before it already exceed p
        if rank > 0 && cumsum > p {
            logits[idx] = f32::NEG_INFINITY;
        }
        cumsum += prob;
    }
    Ok(())
}

/// Row-wise softmax through candle
pub fn softmax_rows(rows: &[Vec<f32>]) -> crate::Result<Vec<Vec<f32>>> {
    let tensor = rows_to_tensor(rows)?;
    Ok(candle_nn::ops::softmax(&tensor, D::Minus1)?.to_vec2()?)
}

/// Row-wise log-softmax through candle
pub fn log_softmax_rows(rows: &[Vec<f32>]) -> crate::Result<Vec<Vec<f32>>> {
    let tensor = rows_to_tensor(rows)?;
    Ok(candle_nn::ops::log_softmax(&tensor, D::Minus1)?.to_vec2()?)
}

fn rows_to_tensor(rows: &[Vec<f32>]) -> crate::Result<Tensor> {
    let width = rows.first().map_or(0, Vec::len);
    let flat: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    Ok(Tensor::from_vec(flat, (rows.len(), width), &Device::Cpu)?)
}

/// Draw an index from a probability vector
fn sample_from_probs(probs: &[f32], rng: &mut StdRng) -> u32 {
    let sample: f32 = rng.random();

    let mut cumsum = 0.0;
    for (idx, &prob) in probs.iter().enumerate() {
        cumsum += prob;
        if sample < cumsum {
            return idx as u32;
        }
    }

    // Rounding left the sample past the total mass
    probs
        .iter()
        .rposition(|&p| p > 0.0)
        .unwrap_or(probs.len().saturating_sub(1)) as u32
}
