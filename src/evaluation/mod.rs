//! Zero-shot evaluation: task configs, datasets, scoring and reports.

mod config;
mod dataset;
mod file_groups;
mod metrics;
mod model;
mod task;

pub use config::{FilePattern, Metric, TaskConfig, TaskType};
pub use dataset::{
    build_generation_sample, build_multiple_choice_sample, collate, read_jsonl, GenerationDataset, GenerationItem,
    GenerationSample, MultiChoiceBatch, MultiChoiceDataset, MultiChoiceItem, MultiChoiceSample, PAD_TILE,
};
pub use file_groups::{file_groups, glob_match};
pub use metrics::{exact_match_score, f1_score, group_stats, normalize_answer, GroupStats, Predictions};
pub use model::ModelForEvaluation;
pub use task::{EvaluationTask, FileResult, GroupReport, TaskReport};
