//! Query loop: read queries, fill their blanks and store the answers.

use candle_core::Device;
use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;

use super::filler::BlankFiller;
use super::output::{output_path_for, write_answers};
use super::query::{encode_query, Query};
use super::{CommandTokens, TextTokenizer};
use crate::config::{SamplingConfig, INTERACTIVE};
use crate::generation::{strategy_from_config, SamplingStrategy};
use crate::model::GlmModel;
use crate::GlmError;

/// Word that ends an interactive session
pub const STOP_WORD: &str = "stop";

const PROMPT: &str = "Please Input Query (stop to exit) >>> ";

/// Answers produced for one query
#[derive(Debug, Clone)]
pub struct Answer {
    pub path: PathBuf,
    pub texts: Vec<String>,
}

/// A model, its tokenizer and the decoding settings for a run.
pub struct InferenceSession<M: GlmModel, T: TextTokenizer> {
    model: M,
    tokenizer: T,
    commands: CommandTokens,
    config: SamplingConfig,
    /// Seeded once per session, shared by every query
    strategy: Box<dyn SamplingStrategy + Send>,
    max_sequence_length: usize,
    device: Device,
}

impl<M: GlmModel, T: TextTokenizer> InferenceSession<M, T> {
    pub fn new(
        model: M,
        tokenizer: T,
        commands: CommandTokens,
        config: SamplingConfig,
        max_sequence_length: usize,
        device: Device,
    ) -> Self {
        let strategy = strategy_from_config(&config, commands.end_tokens());
        Self {
            model,
            tokenizer,
            commands,
            config,
            strategy,
            max_sequence_length,
            device,
        }
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    /// Answer one input line and write the answers file
    pub fn process(&mut self, line: &str) -> crate::Result<Answer> {
        let query = Query::parse(line, self.config.with_id)?;
        let encoded = encode_query(
            &query,
            &self.tokenizer,
            &self.commands,
            self.config.task_mask,
            self.max_sequence_length,
        )?;
        tracing::debug!("Query {:?}: {} tokens", encoded.text, encoded.tokens.len());

        let rows = BlankFiller::new(
            &mut self.model,
            self.commands,
            &self.config,
            self.strategy.as_mut(),
            self.device.clone(),
        )
        .fill(&encoded)?;
        let texts = rows
            .iter()
            .map(|row| self.tokenizer.detokenize(row))
            .collect::<crate::Result<Vec<_>>>()?;

        let named = Query {
            id: query.id,
            text: encoded.text,
        };
        if named.id.is_none() {
            tracing::info!("answer {:?}", texts);
        }

        let path = output_path_for(&named, &self.config.output_path, Local::now());
        write_answers(&path, &texts)?;
        Ok(Answer { path, texts })
    }

    /// Process the configured input source until it is exhausted
    pub fn run(&mut self) -> crate::Result<usize> {
        std::fs::create_dir_all(&self.config.output_path)?;
        let source = self.config.input_source.clone();
        generate_continually(&source, |line| self.process(line).map(|_| ()))
    }
}

/// Feed queries from `source` to `process`.
///
/// `interactive` prompts on stdin until `stop` or end of input; anything else
/// is a file whose non-empty lines are processed in order. A failing query is
/// logged and skipped.
///
/// # Returns
/// Number of queries processed successfully
pub fn generate_continually<F>(source: &str, process: F) -> crate::Result<usize>
where
    F: FnMut(&str) -> crate::Result<()>,
{
    if source == INTERACTIVE {
        let stdin = io::stdin();
        let mut stdout = io::stdout();
        return interactive_loop(stdin.lock(), &mut stdout, process);
    }

    let file = File::open(source)
        .map_err(|e| GlmError::QueryError(format!("cannot open input source {}: {}", source, e)))?;
    let lines = BufReader::new(file).lines().collect::<io::Result<Vec<_>>>()?;
    Ok(process_lines(&lines, process))
}

/// Prompt, read and process lines until `stop` or end of input
pub fn interactive_loop<R, W, F>(mut reader: R, writer: &mut W, mut process: F) -> crate::Result<usize>
where
    R: BufRead,
    W: Write,
    F: FnMut(&str) -> crate::Result<()>,
{
    let mut done = 0;
    loop {
        write!(writer, "{PROMPT}")?;
        writer.flush()?;

        let mut input = String::new();
        if reader.read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input == STOP_WORD {
            break;
        }
        if input.is_empty() {
            continue;
        }

        match process(input) {
            Ok(()) => done += 1,
            Err(e) => tracing::error!("Query failed: {}", e),
        }
    }
    Ok(done)
}

fn process_lines<F>(lines: &[String], mut process: F) -> usize
where
    F: FnMut(&str) -> crate::Result<()>,
{
    let queries: Vec<&str> = lines.iter().map(|l| l.trim()).filter(|l| !l.is_empty()).collect();

    let pb = ProgressBar::new(queries.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} queries")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut done = 0;
    for (i, query) in queries.iter().enumerate() {
        match process(query) {
            Ok(()) => done += 1,
            Err(e) => tracing::error!("Query {} failed: {}", i + 1, e),
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    tracing::info!("Processed {}/{} queries", done, queries.len());
    done
}
