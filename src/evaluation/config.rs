//! Evaluation task configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::StrategyKind;
use crate::GlmError;

/// Kind of zero-shot task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Free-form answers scored against reference texts
    Generation,
    /// Pick one of several candidate continuations
    Multichoice,
}

/// Score computed over a dataset, in percent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "EM")]
    ExactMatch,
    F1,
    Accuracy,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::ExactMatch => "EM",
            Metric::F1 => "F1",
            Metric::Accuracy => "Accuracy",
        }
    }

    /// Whether the metric can score predictions of this task type
    pub fn applies_to(&self, task_type: TaskType) -> bool {
        match self {
            Metric::ExactMatch | Metric::F1 => task_type == TaskType::Generation,
            Metric::Accuracy => task_type == TaskType::Multichoice,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One glob pattern, or named groups of patterns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilePattern {
    Single(String),
    Groups(BTreeMap<String, String>),
}

impl FilePattern {
    /// Group name to pattern; a single pattern forms the group `all`
    pub fn groups(&self) -> BTreeMap<String, String> {
        match self {
            FilePattern::Single(pattern) => BTreeMap::from([("all".to_string(), pattern.clone())]),
            FilePattern::Groups(groups) => groups.clone(),
        }
    }
}

/// Configuration of an evaluation task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Task name used in reports
    pub name: String,

    #[serde(rename = "type")]
    pub task_type: TaskType,

    /// Root directory of the task data
    pub path: PathBuf,

    /// Pattern(s) of data files relative to `path`
    #[serde(default = "default_file_pattern")]
    pub file_pattern: FilePattern,

    /// Longest encoded sample
    #[serde(default = "default_max_seq_length")]
    pub max_seq_length: usize,

    /// Use `[gMASK]` instead of `[MASK]`
    #[serde(default)]
    pub use_task_mask: bool,

    /// Causal attention over the context too
    #[serde(default)]
    pub unidirectional: bool,

    /// Give choice tokens increasing positions (multiple choice only)
    #[serde(default)]
    pub use_multitask_encoding: bool,

    /// Metrics to report; empty means the task type's defaults
    #[serde(default)]
    pub metrics: Vec<Metric>,

    // Generation settings
    #[serde(default)]
    pub sampling_strategy: StrategyKind,

    #[serde(default = "default_num_beams")]
    pub num_beams: usize,

    #[serde(default = "default_length_penalty")]
    pub length_penalty: f32,

    #[serde(default = "default_no_repeat_ngram_size")]
    pub no_repeat_ngram_size: usize,

    #[serde(default)]
    pub min_tgt_length: usize,
}

fn default_file_pattern() -> FilePattern {
    FilePattern::Single("**/*.json*".to_string())
}

fn default_max_seq_length() -> usize {
    2048
}

fn default_num_beams() -> usize {
    4
}

fn default_length_penalty() -> f32 {
    1.0
}

fn default_no_repeat_ngram_size() -> usize {
    3
}

impl TaskConfig {
    /// Load a task from a `.toml` or `.json` file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            _ => {
                return Err(GlmError::ConfigError(format!(
                    "unsupported task format: {}",
                    path.display()
                )))
            }
        };

        config.validate()?;
        tracing::debug!("Loaded task '{}' from {:?}", config.name, path);
        Ok(config)
    }

    /// Configured metrics, or the defaults for the task type
    pub fn metrics(&self) -> Vec<Metric> {
        if !self.metrics.is_empty() {
            return self.metrics.clone();
        }
        match self.task_type {
            TaskType::Generation => vec![Metric::ExactMatch, Metric::F1],
            TaskType::Multichoice => vec![Metric::Accuracy],
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.name.trim().is_empty() {
            return Err(GlmError::invalid("name", "must not be empty"));
        }
        if self.max_seq_length < 4 {
            return Err(GlmError::invalid("max_seq_length", "must be at least 4"));
        }
        if self.num_beams == 0 {
            return Err(GlmError::invalid("num_beams", "must be at least 1"));
        }
        for metric in self.metrics() {
            if !metric.applies_to(self.task_type) {
                return Err(GlmError::invalid(
                    "metrics",
                    format!("{} cannot score a {:?} task", metric, self.task_type),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAMBADA: &str = r#"
name = "lambada"
type = "generation"
path = "data/lambada"
file_pattern = "test.jsonl"
use_task_mask = true
"#;

    #[test]
    fn test_generation_defaults() {
        let config: TaskConfig = toml::from_str(LAMBADA).unwrap();
        config.validate().unwrap();

        assert_eq!(config.max_seq_length, 2048);
        assert_eq!(config.num_beams, 4);
        assert_eq!(config.no_repeat_ngram_size, 3);
        assert_eq!(config.sampling_strategy, StrategyKind::BaseStrategy);
        assert_eq!(config.metrics(), vec![Metric::ExactMatch, Metric::F1]);
        assert_eq!(
            config.file_pattern.groups(),
            BTreeMap::from([("all".to_string(), "test.jsonl".to_string())])
        );
    }

    #[test]
    fn test_grouped_patterns_from_json() {
        let json = r#"{
            "name": "mmlu",
            "type": "multichoice",
            "path": "data/mmlu",
            "file_pattern": {"stem": "stem/**/*.jsonl", "other": "other/*.jsonl"},
            "use_multitask_encoding": true
        }"#;
        let config: TaskConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();

        assert_eq!(config.metrics(), vec![Metric::Accuracy]);
        let groups = config.file_pattern.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["stem"], "stem/**/*.jsonl");
    }

    #[test]
    fn test_unknown_metric_rejected() {
        let toml = format!("{LAMBADA}metrics = [\"BLEU\"]\n");
        assert!(toml::from_str::<TaskConfig>(&toml).is_err());
    }

    #[test]
    fn test_metric_must_fit_task() {
        let toml = format!("{LAMBADA}metrics = [\"Accuracy\"]\n");
        let config: TaskConfig = toml::from_str(&toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task.toml");
        std::fs::write(&path, LAMBADA).unwrap();
        assert_eq!(TaskConfig::from_file(&path).unwrap().name, "lambada");

        let bad = dir.path().join("task.yaml");
        std::fs::write(&bad, LAMBADA).unwrap();
        assert!(matches!(TaskConfig::from_file(&bad), Err(GlmError::ConfigError(_))));
    }
}
