//! Task runner and reports.

use candle_core::Device;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::dataset::{GenerationDataset, MultiChoiceDataset};
use super::metrics::{group_stats, GroupStats, Predictions};
use super::model::ModelForEvaluation;
use super::{file_groups, Metric, TaskConfig, TaskType};
use crate::config::StrategyKind;
use crate::generation::{BaseStrategy, BeamSearchStrategy, SamplingStrategy};
use crate::inference::{CommandTokens, TextTokenizer};
use crate::model::GlmModel;

/// Scores of one data file
#[derive(Debug, Clone, PartialEq)]
pub struct FileResult {
    pub file: PathBuf,
    /// In the order the task lists its metrics
    pub scores: Vec<(Metric, f64)>,
    pub len: usize,
}

/// Files of one pattern group and their statistics
#[derive(Debug, Clone, PartialEq)]
pub struct GroupReport {
    pub name: String,
    pub files: Vec<FileResult>,
    pub stats: Vec<(Metric, GroupStats)>,
}

/// Outcome of a whole task
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task: String,
    pub groups: Vec<GroupReport>,
    pub elapsed: Duration,
}

impl FileResult {
    pub fn score(&self, metric: Metric) -> Option<f64> {
        self.scores.iter().find(|(m, _)| *m == metric).map(|(_, v)| *v)
    }

    /// `Finish <file>, EM = 12.345, F1 = ...`
    pub fn summary(&self) -> String {
        let mut line = format!("Finish {}", self.file.display());
        for (metric, value) in &self.scores {
            line.push_str(&format!(", {} = {:.3}", metric, value));
        }
        line
    }
}

impl GroupReport {
    pub fn stat(&self, metric: Metric) -> Option<GroupStats> {
        self.stats.iter().find(|(m, _)| *m == metric).map(|(_, s)| *s)
    }

    /// One line per metric: `Group <name> <metric>: max = .., median = .., average = ..`
    pub fn summary(&self) -> Vec<String> {
        self.stats
            .iter()
            .map(|(metric, s)| {
                format!(
                    "Group {} {}: max = {:.3}, median = {:.3}, average = {:.3}",
                    self.name, metric, s.max, s.median, s.average
                )
            })
            .collect()
    }
}

/// A configured task with its discovered data files.
pub struct EvaluationTask {
    config: TaskConfig,
    commands: CommandTokens,
    file_groups: BTreeMap<String, Vec<PathBuf>>,
}

impl EvaluationTask {
    pub fn new(config: TaskConfig, commands: CommandTokens) -> crate::Result<Self> {
        config.validate()?;
        let file_groups = file_groups(&config)?;
        Ok(Self {
            config,
            commands,
            file_groups,
        })
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn file_groups(&self) -> &BTreeMap<String, Vec<PathBuf>> {
        &self.file_groups
    }

    /// Decoding strategy for generation tasks
    fn strategy(&self) -> Box<dyn SamplingStrategy + Send> {
        let end_tokens = self.commands.end_tokens();
        match self.config.sampling_strategy {
            StrategyKind::BaseStrategy => Box::new(BaseStrategy::greedy(end_tokens)),
            StrategyKind::BeamSearchStrategy => Box::new(BeamSearchStrategy::new(
                self.config.num_beams,
                self.config.length_penalty,
                end_tokens,
                self.config.no_repeat_ngram_size,
                self.config.min_tgt_length,
            )),
        }
    }

    /// Evaluate every file of every group
    pub fn evaluate<M, T>(&self, model: &mut M, tokenizer: &T, device: &Device) -> crate::Result<TaskReport>
    where
        M: GlmModel + ?Sized,
        T: TextTokenizer + ?Sized,
    {
        let start = Instant::now();
        tracing::info!("Evaluating task {}:", self.config.name);
        let metrics = self.config.metrics();
        let mut model = ModelForEvaluation::new(model, device.clone());

        let mut groups = Vec::with_capacity(self.file_groups.len());
        for (group, files) in &self.file_groups {
            tracing::info!("Evaluating group {}:", group);

            let mut results = Vec::with_capacity(files.len());
            for file in files {
                let predictions = self.predict_file(&mut model, tokenizer, file)?;
                let scores = metrics
                    .iter()
                    .map(|m| m.compute(&predictions).map(|v| (*m, v)))
                    .collect::<crate::Result<Vec<_>>>()?;
                let result = FileResult {
                    file: file.clone(),
                    scores,
                    len: predictions.len(),
                };
                tracing::info!("{}", result.summary());
                results.push(result);
            }

            let stats = group_stats(
                &results
                    .iter()
                    .map(|r| (r.scores.clone(), r.len))
                    .collect::<Vec<_>>(),
            );
            groups.push(GroupReport {
                name: group.clone(),
                files: results,
                stats,
            });
        }

        tracing::info!("Evaluation results of task {}:", self.config.name);
        for group in &groups {
            for line in group.summary() {
                tracing::info!("{}", line);
            }
        }

        let elapsed = start.elapsed();
        tracing::info!("Finish task {} in {:.1}s.", self.config.name, elapsed.as_secs_f64());
        Ok(TaskReport {
            task: self.config.name.clone(),
            groups,
            elapsed,
        })
    }

    fn predict_file<M, T>(
        &self,
        model: &mut ModelForEvaluation<'_, M>,
        tokenizer: &T,
        file: &Path,
    ) -> crate::Result<Predictions>
    where
        M: GlmModel + ?Sized,
        T: TextTokenizer + ?Sized,
    {
        let path = self.config.path.join(file);

        match self.config.task_type {
            TaskType::Generation => {
                let dataset = GenerationDataset::load(&path, &self.config, self.commands)?;
                let pb = progress(dataset.len(), file);
                let mut strategy = self.strategy();

                let mut predictions = Vec::with_capacity(dataset.len());
                let mut references = Vec::with_capacity(dataset.len());
                for (i, item) in dataset.items().iter().enumerate() {
                    let sample = dataset.sample(i)?;
                    let outputs = model.generate_text(&sample, strategy.as_mut(), self.config.max_seq_length)?;
                    let best = outputs.first().map(Vec::as_slice).unwrap_or(&[]);
                    predictions.push(tokenizer.detokenize(best)?);
                    references.push(
                        item.targets
                            .iter()
                            .map(|t| tokenizer.detokenize(t))
                            .collect::<crate::Result<Vec<_>>>()?,
                    );
                    pb.inc(1);
                }
                pb.finish_and_clear();
                Ok(Predictions::Texts {
                    predictions,
                    references,
                })
            }
            TaskType::Multichoice => {
                let dataset = MultiChoiceDataset::load(&path, &self.config, self.commands)?;
                let pb = progress(dataset.len(), file);

                let mut predictions = Vec::with_capacity(dataset.len());
                for i in 0..dataset.len() {
                    let batch = dataset.batch(&[i])?;
                    let log_probs = model.cond_log_prob(&batch)?;
                    let best = log_probs
                        .first()
                        .map(|scores| argmax(scores))
                        .unwrap_or(0);
                    predictions.push(best);
                    pb.inc(1);
                }
                pb.finish_and_clear();
                Ok(Predictions::Choices {
                    predictions,
                    labels: dataset.items().iter().map(|item| item.label).collect(),
                })
            }
        }
    }
}

/// Index of the largest score, the first one on ties
fn argmax(scores: &[f32]) -> usize {
    scores
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &s)| if s > best.1 { (i, s) } else { best })
        .0
}

fn progress(len: usize, file: &Path) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb.set_message(file.display().to_string());
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::FilePattern;
    use crate::inference::testing::DigitTokenizer;
    use crate::model::testing::ScriptedModel;

    const SOP: u32 = 22;
    const EOP: u32 = 23;

    fn commands() -> CommandTokens {
        CommandTokens {
            mask: 20,
            gmask: 21,
            smask: 25,
            sop: SOP,
            eop: EOP,
            eos: 24,
        }
    }

    fn task(task_type: TaskType, path: &Path, pattern: FilePattern) -> TaskConfig {
        TaskConfig {
            name: "demo".to_string(),
            task_type,
            path: path.to_path_buf(),
            file_pattern: pattern,
            max_seq_length: 32,
            use_task_mask: true,
            unidirectional: false,
            use_multitask_encoding: false,
            metrics: Vec::new(),
            sampling_strategy: StrategyKind::BaseStrategy,
            num_beams: 2,
            length_penalty: 1.0,
            no_repeat_ngram_size: 0,
            min_tgt_length: 0,
        }
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[-3.0, -1.0, -2.0]), 1);
        assert_eq!(argmax(&[-1.0, -1.0]), 0);
    }

    #[test]
    fn test_generation_task() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.jsonl"),
            "{\"inputs\": [1, 2], \"targets\": [[7, 8]]}\n{\"inputs\": [3], \"targets\": [[9], [7, 8]]}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("b.jsonl"), "{\"inputs\": [4], \"targets\": [[1]]}\n").unwrap();

        let config = task(TaskType::Generation, dir.path(), FilePattern::Single("*.jsonl".to_string()));
        let task = EvaluationTask::new(config, commands()).unwrap();
        assert_eq!(task.file_groups()["all"].len(), 2);

        // Always answers "78"
        let mut model = ScriptedModel::new(32, SOP, EOP, vec![7, 8]);
        let report = task.evaluate(&mut model, &DigitTokenizer, &Device::Cpu).unwrap();

        let group = &report.groups[0];
        assert_eq!(group.name, "all");
        assert_eq!(group.files[0].score(Metric::ExactMatch), Some(100.0));
        assert_eq!(group.files[1].score(Metric::ExactMatch), Some(0.0));
        assert_eq!(group.files[0].summary(), "Finish a.jsonl, EM = 100.000, F1 = 100.000");

        let em = group.stat(Metric::ExactMatch).unwrap();
        assert_eq!(em.max, 100.0);
        assert_eq!(em.median, 50.0);
        assert!((em.average - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(
            group.summary()[0],
            "Group all EM: max = 100.000, median = 50.000, average = 66.667"
        );
    }

    #[test]
    fn test_multichoice_task() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("easy")).unwrap();
        std::fs::write(
            dir.path().join("easy/q.jsonl"),
            "{\"inputs\": [1], \"choices\": [[5], [6]], \"label\": 1}\n{\"inputs\": [2], \"choices\": [[6], [5]], \"label\": 1}\n",
        )
        .unwrap();

        let config = task(
            TaskType::Multichoice,
            dir.path(),
            FilePattern::Groups(BTreeMap::from([("easy".to_string(), "easy/*.jsonl".to_string())])),
        );
        let task = EvaluationTask::new(config, commands()).unwrap();

        // Prefers 6 right after sop
        let mut model = ScriptedModel::new(32, SOP, EOP, vec![6]);
        let report = task.evaluate(&mut model, &DigitTokenizer, &Device::Cpu).unwrap();

        assert_eq!(report.task, "demo");
        let result = &report.groups[0].files[0];
        assert_eq!(result.len, 2);
        assert_eq!(result.score(Metric::Accuracy), Some(50.0));
    }

    #[test]
    fn test_reports_follow_configured_metric_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jsonl"), "{\"inputs\": [1], \"targets\": [[7]]}\n").unwrap();

        let mut config = task(TaskType::Generation, dir.path(), FilePattern::Single("*.jsonl".to_string()));
        config.metrics = vec![Metric::F1, Metric::ExactMatch];
        let task = EvaluationTask::new(config, commands()).unwrap();

        let mut model = ScriptedModel::new(32, SOP, EOP, vec![7]);
        let report = task.evaluate(&mut model, &DigitTokenizer, &Device::Cpu).unwrap();

        let group = &report.groups[0];
        assert_eq!(group.files[0].summary(), "Finish a.jsonl, F1 = 100.000, EM = 100.000");
        assert!(group.summary()[0].starts_with("Group all F1:"));
        assert!(group.summary()[1].starts_with("Group all EM:"));
    }

    #[test]
    fn test_missing_data_directory() {
        let config = task(
            TaskType::Generation,
            Path::new("/nonexistent/task"),
            FilePattern::Single("*.jsonl".to_string()),
        );
        assert!(EvaluationTask::new(config, commands()).is_err());
    }
}
