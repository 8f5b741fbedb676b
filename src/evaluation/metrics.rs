//! Answer scoring and group statistics.

use std::collections::HashMap;

use super::Metric;
use crate::GlmError;

/// Lowercase, drop punctuation and articles, collapse whitespace
pub fn normalize_answer(text: &str) -> String {
    let lower = text.to_lowercase();
    let without_punct: String = lower.chars().filter(|c| !c.is_ascii_punctuation()).collect();
    without_punct
        .split_whitespace()
        .filter(|w| !matches!(*w, "a" | "an" | "the"))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn exact_match_score(prediction: &str, reference: &str) -> bool {
    normalize_answer(prediction) == normalize_answer(reference)
}

/// Token-overlap F1 between normalized answers
pub fn f1_score(prediction: &str, reference: &str) -> f64 {
    let prediction = normalize_answer(prediction);
    let reference = normalize_answer(reference);
    let pred_tokens: Vec<&str> = prediction.split_whitespace().collect();
    let ref_tokens: Vec<&str> = reference.split_whitespace().collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for t in &ref_tokens {
        *counts.entry(*t).or_default() += 1;
    }
    let mut same = 0usize;
    for t in &pred_tokens {
        if let Some(c) = counts.get_mut(t) {
            if *c > 0 {
                *c -= 1;
                same += 1;
            }
        }
    }
    if same == 0 {
        return 0.0;
    }

    let precision = same as f64 / pred_tokens.len() as f64;
    let recall = same as f64 / ref_tokens.len() as f64;
    2.0 * precision * recall / (precision + recall)
}

/// Best score of `prediction` against any reference
fn best_over_references<F>(prediction: &str, references: &[String], score: F) -> f64
where
    F: Fn(&str, &str) -> f64,
{
    references
        .iter()
        .map(|r| score(prediction, r))
        .fold(0.0, f64::max)
}

/// What a task predicted for one dataset, with the ground truth
#[derive(Debug, Clone, PartialEq)]
pub enum Predictions {
    /// Generated texts and their reference answers
    Texts {
        predictions: Vec<String>,
        references: Vec<Vec<String>>,
    },
    /// Chosen indices and the correct labels
    Choices { predictions: Vec<usize>, labels: Vec<usize> },
}

impl Predictions {
    pub fn len(&self) -> usize {
        match self {
            Predictions::Texts { predictions, .. } => predictions.len(),
            Predictions::Choices { predictions, .. } => predictions.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Metric {
    /// Score in percent; an empty dataset scores 0
    pub fn compute(&self, predictions: &Predictions) -> crate::Result<f64> {
        if predictions.is_empty() {
            return Ok(0.0);
        }
        let n = predictions.len() as f64;

        match (self, predictions) {
            (Metric::ExactMatch, Predictions::Texts { predictions, references }) => {
                let total: f64 = predictions
                    .iter()
                    .zip(references)
                    .map(|(p, r)| best_over_references(p, r, |a, b| f64::from(u8::from(exact_match_score(a, b)))))
                    .sum();
                Ok(total / n * 100.0)
            }
            (Metric::F1, Predictions::Texts { predictions, references }) => {
                let total: f64 = predictions
                    .iter()
                    .zip(references)
                    .map(|(p, r)| best_over_references(p, r, f1_score))
                    .sum();
                Ok(total / n * 100.0)
            }
            (Metric::Accuracy, Predictions::Choices { predictions, labels }) => {
                let correct = predictions.iter().zip(labels).filter(|(p, l)| p == l).count();
                Ok(correct as f64 / n * 100.0)
            }
            (metric, _) => Err(GlmError::invalid(
                "metrics",
                format!("{metric} does not apply to these predictions"),
            )),
        }
    }
}

/// Spread of one metric over the files of a group
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupStats {
    pub max: f64,
    pub median: f64,
    /// Average weighted by dataset size
    pub average: f64,
}

/// Statistics per metric over `(scores, dataset length)` of each file.
///
/// Metrics keep the order in which the files report them.
pub fn group_stats(results: &[(Vec<(Metric, f64)>, usize)]) -> Vec<(Metric, GroupStats)> {
    let mut per_metric: Vec<(Metric, Vec<(f64, usize)>)> = Vec::new();
    for (scores, len) in results {
        for &(metric, value) in scores {
            match per_metric.iter_mut().find(|(m, _)| *m == metric) {
                Some((_, values)) => values.push((value, *len)),
                None => per_metric.push((metric, vec![(value, *len)])),
            }
        }
    }

    per_metric
        .into_iter()
        .map(|(metric, values)| {
            let max = values.iter().map(|(v, _)| *v).fold(f64::NEG_INFINITY, f64::max);

            let mut sorted: Vec<f64> = values.iter().map(|(v, _)| *v).collect();
            sorted.sort_by(|a, b| a.total_cmp(b));
            let mid = sorted.len() / 2;
            let median = if sorted.len() % 2 == 0 {
                (sorted[mid - 1] + sorted[mid]) / 2.0
            } else {
                sorted[mid]
            };

            let weight: usize = values.iter().map(|(_, w)| *w).sum();
            let average = if weight == 0 {
                sorted.iter().sum::<f64>() / sorted.len() as f64
            } else {
                values.iter().map(|(v, w)| v * *w as f64).sum::<f64>() / weight as f64
            };

            (metric, GroupStats { max, median, average })
        })
        .collect()
}
