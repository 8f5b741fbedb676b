//! Length-penalized beam search.

use candle_core::{DType, Tensor};
use rand::prelude::*;
use std::collections::HashMap;

use super::strategy::{log_softmax_rows, SamplingStrategy};
use crate::config::SamplingConfig;

/// Logit written over banned tokens (lowest finite half-precision value)
const BANNED: f32 = -65504.0;

/// Beam search keeping `num_beams` live beams and `num_beams` finished ones.
pub struct BeamSearchStrategy {
    num_beams: usize,
    length_penalty: f32,
    consider_end: bool,
    end_tokens: Vec<u32>,
    no_repeat_ngram_size: usize,
    min_tgt_length: usize,
    /// Pick candidates by score instead of sampling them
    deterministic: bool,
    rng: StdRng,

    end_beams: Vec<Vec<u32>>,
    end_scores: Vec<f32>,
    beam_scores: Option<Vec<f32>>,
    ngram_bans: Vec<HashMap<Vec<u32>, Vec<u32>>>,
    length_generated: usize,
    done: bool,
}

impl BeamSearchStrategy {
    pub fn new(
        num_beams: usize,
        length_penalty: f32,
        end_tokens: Vec<u32>,
        no_repeat_ngram_size: usize,
        min_tgt_length: usize,
    ) -> Self {
        Self {
            num_beams: num_beams.max(1),
            length_penalty,
            consider_end: true,
            end_tokens,
            no_repeat_ngram_size,
            min_tgt_length,
            deterministic: true,
            rng: StdRng::seed_from_u64(0),
            end_beams: Vec::new(),
            end_scores: Vec::new(),
            beam_scores: None,
            ngram_bans: Vec::new(),
            length_generated: 0,
            done: false,
        }
    }

    pub fn from_config(config: &SamplingConfig, end_tokens: Vec<u32>) -> Self {
        Self::new(
            config.num_beams,
            config.length_penalty,
            end_tokens,
            config.no_repeat_ngram_size,
            config.min_tgt_length,
        )
        .sampled(config.seed)
    }

    /// Draw candidates proportionally to their probability instead of taking the best
    pub fn sampled(mut self, seed: u64) -> Self {
        self.deterministic = false;
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Return live beams as they are on finalize instead of ranking them with the finished ones
    pub fn without_end_consideration(mut self) -> Self {
        self.consider_end = false;
        self
    }

    pub fn num_beams(&self) -> usize {
        self.num_beams
    }

    fn penalized(&self, score: f32, len: usize) -> f32 {
        score / ((5.0 + len as f32) / 6.0).powf(self.length_penalty)
    }

    fn add_end_beam(&mut self, score: f32, beam: Vec<u32>) {
        let score = self.penalized(score, beam.len());
        let pos = self
            .end_scores
            .iter()
            .position(|&s| s <= score)
            .unwrap_or(self.end_scores.len());

        self.end_beams.insert(pos, beam);
        self.end_scores.insert(pos, score);
        self.end_beams.truncate(self.num_beams);
        self.end_scores.truncate(self.num_beams);
    }

    fn ngram_prefix<'a>(&self, seq: &'a [u32]) -> &'a [u32] {
        let keep = self.no_repeat_ngram_size - 1;
        &seq[seq.len().saturating_sub(keep)..]
    }

    /// Indices into `flat` of the candidates to consider, best score first
    fn select_candidates(&mut self, flat: &[(f32, usize, u32)], count: usize) -> Vec<usize> {
        let mut order: Vec<(f32, usize)> = if self.deterministic {
            flat.iter().enumerate().map(|(i, c)| (c.0, i)).collect()
        } else {
            // Gumbel top-k: sampling without replacement from softmax(scores)
            flat.iter()
                .enumerate()
                .map(|(i, c)| {
                    let u: f32 = self.rng.random_range(f32::EPSILON..1.0);
                    (c.0 - (-u.ln()).ln(), i)
                })
                .collect()
        };
        order.sort_by(|a, b| b.0.total_cmp(&a.0));
        order.truncate(count);

        let mut chosen: Vec<usize> = order.into_iter().map(|(_, i)| i).collect();
        chosen.sort_by(|&a, &b| flat[b].0.total_cmp(&flat[a].0));
        chosen
    }

    fn reset(&mut self) {
        self.end_beams.clear();
        self.end_scores.clear();
        self.beam_scores = None;
        self.ngram_bans.clear();
        self.length_generated = 0;
        self.done = false;
    }
}

impl SamplingStrategy for BeamSearchStrategy {
    fn end_tokens(&self) -> &[u32] {
        &self.end_tokens
    }

    fn forward(&mut self, logits: &Tensor, tokens: Vec<Vec<u32>>) -> crate::Result<Vec<Vec<u32>>> {
        let mut rows: Vec<Vec<f32>> = logits.to_dtype(DType::F32)?.to_vec2()?;
        if rows.len() != tokens.len() {
            return Err(crate::GlmError::GenerationError(format!(
                "{} logit rows for {} beams",
                rows.len(),
                tokens.len()
            )));
        }
        if tokens.is_empty() {
            self.done = true;
            return Ok(tokens);
        }

        // Rows start identical, so the first step expands a single beam
        let active = if self.beam_scores.is_none() { 1 } else { tokens.len() };
        let seq_len = tokens[0].len();

        for (i, row) in rows.iter_mut().enumerate().take(active) {
            if self.min_tgt_length > self.length_generated {
                for &end in &self.end_tokens {
                    if let Some(l) = row.get_mut(end as usize) {
                        *l = BANNED;
                    }
                }
            }
            if self.no_repeat_ngram_size > 0 {
                let prefix = self.ngram_prefix(&tokens[i]);
                if let Some(banned) = self.ngram_bans.get(i).and_then(|b| b.get(prefix)) {
                    for &t in banned {
                        if let Some(l) = row.get_mut(t as usize) {
                            *l = BANNED;
                        }
                    }
                }
            }
        }

        let scores = log_softmax_rows(&rows[..active])?;
        let prev = self.beam_scores.clone().unwrap_or_else(|| vec![0.0; active]);

        let flat: Vec<(f32, usize, u32)> = scores
            .iter()
            .enumerate()
            .flat_map(|(beam, row)| {
                let base = prev[beam];
                row.iter()
                    .enumerate()
                    .map(move |(token, &s)| (s + base, beam, token as u32))
            })
            .collect();

        let count = (self.end_tokens.len().max(1) + 1) * self.num_beams;
        let candidates = self.select_candidates(&flat, count);

        let mut beams = Vec::with_capacity(self.num_beams);
        let mut beam_scores = Vec::with_capacity(self.num_beams);
        let mut bans = Vec::with_capacity(self.num_beams);

        for idx in candidates {
            let (score, beam_idx, token) = flat[idx];
            let mut beam = tokens[beam_idx].clone();
            beam.push(token);

            if self.end_tokens.contains(&token) {
                self.add_end_beam(score, beam);
            } else if beams.len() < self.num_beams {
                if self.no_repeat_ngram_size > 0 {
                    let mut beam_bans = self.ngram_bans.get(beam_idx).cloned().unwrap_or_default();
                    let prefix = self.ngram_prefix(&tokens[beam_idx]).to_vec();
                    beam_bans.entry(prefix).or_insert_with(Vec::new).push(token);
                    bans.push(beam_bans);
                }
                beams.push(beam);
                beam_scores.push(score);
            } else {
                break;
            }
        }

        self.length_generated += 1;
        self.ngram_bans = bans;

        let best_live = beam_scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        self.beam_scores = Some(beam_scores);

        if beams.is_empty() {
            self.done = true;
        } else if self.end_beams.len() == self.num_beams {
            // None of the live beams can beat the worst finished one anymore
            let worst_finished = self.end_scores[self.end_scores.len() - 1];
            if worst_finished >= self.penalized(best_live, seq_len + 1) {
                self.done = true;
            }
        }

        Ok(beams)
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn finalize(&mut self, tokens: Vec<Vec<u32>>) -> Vec<Vec<u32>> {
        let result = if self.consider_end {
            let scores = self.beam_scores.clone().unwrap_or_default();
            for (i, beam) in tokens.into_iter().enumerate() {
                let score = scores.get(i).copied().unwrap_or(0.0);
                self.add_end_beam(score, beam);
            }
            std::mem::take(&mut self.end_beams)
        } else {
            tokens
        };

        self.reset();
        result
    }
}
