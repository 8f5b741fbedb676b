//! glm - launcher for GLM-130B inference runs
//!
//! Composes the distributed launch command from a profile, runs it with its
//! output teed into a timestamped log, and inspects checkpoints and
//! evaluation tasks.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use glm_launch::{
    config::Overrides,
    evaluation::{EvaluationTask, GenerationDataset, MultiChoiceDataset, TaskConfig, TaskType},
    launch::{self, check_checkpoint, LaunchPlan},
    utils::{format_bytes, format_count, MemoryEstimate},
    Profile,
};

#[derive(Parser)]
#[command(name = "glm")]
#[command(author, version, about = "Launch and inspect GLM-130B inference runs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the inference entry point under the distributed launcher
    Launch {
        /// Profile file (.toml or .json); built-in GLM-130B defaults if omitted
        #[arg(short, long, env = "GLM_PROFILE")]
        profile: Option<PathBuf>,

        #[command(flatten)]
        overrides: OverrideArgs,

        /// Print the composed command instead of running it
        #[arg(long)]
        dry_run: bool,

        /// Extra arguments passed verbatim to the entry point
        #[arg(last = true)]
        extra: Vec<String>,
    },

    /// Show the model shape, memory estimate and composed command
    Info {
        #[arg(short, long, env = "GLM_PROFILE")]
        profile: Option<PathBuf>,
    },

    /// Validate the profile and verify the checkpoint shards
    Check {
        #[arg(short, long, env = "GLM_PROFILE")]
        profile: Option<PathBuf>,
    },

    /// List the data files and datasets of an evaluation task
    InspectTask {
        /// Task file (.toml or .json)
        #[arg(short, long)]
        task: PathBuf,

        /// Profile supplying the command token ids
        #[arg(short, long, env = "GLM_PROFILE")]
        profile: Option<PathBuf>,
    },
}

#[derive(Args, Default)]
struct OverrideArgs {
    /// Checkpoint directory
    #[arg(long, env = "GLM_CHECKPOINT_PATH")]
    checkpoint_path: Option<PathBuf>,

    /// Number of model-parallel partitions
    #[arg(long)]
    model_parallel_size: Option<usize>,

    /// Decoding strategy (BaseStrategy or BeamSearchStrategy)
    #[arg(long)]
    strategy: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Top-k sampling (0 = disabled)
    #[arg(long)]
    top_k: Option<usize>,

    /// Top-p sampling threshold
    #[arg(long)]
    top_p: Option<f32>,

    /// Beam count for beam search
    #[arg(long)]
    num_beams: Option<usize>,

    /// Total sequence length including the context
    #[arg(long)]
    out_seq_length: Option<usize>,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Query file, or `interactive`
    #[arg(long)]
    input_source: Option<String>,

    /// Directory for answer files
    #[arg(long)]
    output_path: Option<PathBuf>,

    /// Rendezvous port (random if unset)
    #[arg(long, env = "MASTER_PORT")]
    master_port: Option<u16>,

    /// Directory for launch logs
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl OverrideArgs {
    fn into_overrides(self, extra_args: Vec<String>) -> anyhow::Result<Overrides> {
        let strategy = self.strategy.map(|s| s.parse()).transpose()?;
        Ok(Overrides {
            checkpoint_path: self.checkpoint_path,
            model_parallel_size: self.model_parallel_size,
            strategy,
            temperature: self.temperature,
            top_k: self.top_k,
            top_p: self.top_p,
            num_beams: self.num_beams,
            out_seq_length: self.out_seq_length,
            seed: self.seed,
            input_source: self.input_source,
            output_path: self.output_path,
            master_port: self.master_port,
            log_dir: self.log_dir,
            extra_args,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("glm_launch=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Launch {
            profile,
            overrides,
            dry_run,
            extra,
        } => {
            let mut profile = load_profile(profile.as_deref())?;
            overrides.into_overrides(extra)?.apply(&mut profile);
            profile.validate()?;

            let code = launch_profile(&profile, dry_run).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }

        Commands::Info { profile } => {
            show_info(&load_profile(profile.as_deref())?)?;
        }

        Commands::Check { profile } => {
            check(&load_profile(profile.as_deref())?)?;
        }

        Commands::InspectTask { task, profile } => {
            let profile = load_profile(profile.as_deref())?;
            inspect_task(&task, &profile)?;
        }
    }

    Ok(())
}

fn load_profile(path: Option<&Path>) -> anyhow::Result<Profile> {
    match path {
        Some(path) => Ok(Profile::from_file(path)?),
        None => {
            tracing::debug!("No profile given, using built-in defaults");
            Ok(Profile::default())
        }
    }
}

async fn launch_profile(profile: &Profile, dry_run: bool) -> anyhow::Result<i32> {
    let plan = LaunchPlan::prepare(profile, std::env::var("PYTHONPATH").ok())?;

    if dry_run {
        println!("{}", plan.render());
        return Ok(0);
    }

    tracing::info!(
        "Launching '{}' with {} worker(s) on master port {}",
        profile.name,
        profile.launch.workers(profile.model.model_parallel_size),
        plan.master_port().unwrap_or_default()
    );
    tracing::debug!("Command: {}", plan.command);

    let outcome = launch::run(&plan, chrono::Local::now()).await?;
    let elapsed = outcome.elapsed.as_secs_f64();

    if outcome.success() {
        tracing::info!("Finished in {:.1}s, log at {:?}", elapsed, outcome.log_path);
    } else {
        tracing::error!(
            "Launcher exited with code {} after {:.1}s, see {:?}",
            outcome.exit_code(),
            elapsed,
            outcome.log_path
        );
    }
    Ok(outcome.exit_code())
}

fn show_info(profile: &Profile) -> anyhow::Result<()> {
    let model = &profile.model;
    let estimate = MemoryEstimate::for_model(model);

    println!("Profile: {}", profile.name);
    println!("=================");
    println!("Checkpoint: {}", model.checkpoint_path.display());
    println!("Model parallel size: {}", model.model_parallel_size);
    println!("Num layers: {}", model.num_layers);
    println!("Hidden size: {}", model.hidden_size);
    println!("Inner hidden size: {}", model.inner_hidden_size);
    println!("Num attention heads: {}", model.num_attention_heads);
    println!("Head dim: {}", model.head_dim());
    println!("Vocab size: {}", model.vocab_size);
    println!("Max sequence length: {}", model.max_sequence_length);
    println!("Layernorm order: {}", model.layernorm_order.as_str());
    println!("Tokenizer: {}", model.tokenizer_type);

    println!("\nEstimated Parameters");
    println!("====================");
    println!("Per layer: {}", format_count(estimate.parameters_per_layer));
    println!("Total: {}", format_count(estimate.parameters));
    println!("Weights: {}", format_bytes(estimate.total_bytes));
    println!("Per partition: {}", format_bytes(estimate.partition_bytes));

    println!("\nDecoding");
    println!("========");
    println!("Strategy: {}", profile.sampling.strategy.as_str());
    println!("Input source: {}", profile.sampling.input_source);
    println!("Output path: {}", profile.sampling.output_path.display());

    match profile.validate() {
        Ok(()) => {
            let plan = LaunchPlan::prepare(profile, std::env::var("PYTHONPATH").ok())?;
            println!("\nCommand");
            println!("=======");
            println!("{}", plan.render());
        }
        Err(e) => println!("\nProfile is invalid: {}", e),
    }

    Ok(())
}

fn check(profile: &Profile) -> anyhow::Result<()> {
    profile.validate()?;
    println!("Profile '{}' is valid", profile.name);

    let layout = check_checkpoint(&profile.model)?;
    let on_disk = layout.total_bytes()?;
    let expected = MemoryEstimate::for_model(&profile.model).total_bytes;

    println!("Checkpoint iteration: {}", layout.iteration);
    for shard in &layout.shards {
        println!("  {}", shard.display());
    }
    println!("Shards on disk: {} (estimated weights {})", format_bytes(on_disk), format_bytes(expected));

    if on_disk < expected / 2 {
        tracing::warn!("Checkpoint is much smaller than the configured model shape suggests");
    }
    Ok(())
}

fn inspect_task(path: &Path, profile: &Profile) -> anyhow::Result<()> {
    let config = TaskConfig::from_file(path)?;
    let task = EvaluationTask::new(config, profile.commands)?;
    let config = task.config();

    println!("Task: {} ({:?})", config.name, config.task_type);
    println!(
        "Metrics: {}",
        config.metrics().iter().map(|m| m.name()).collect::<Vec<_>>().join(", ")
    );
    println!("Max sequence length: {}", config.max_seq_length);

    for (group, files) in task.file_groups() {
        println!("\nGroup {} ({} files)", group, files.len());
        for file in files {
            let full = config.path.join(file);
            let summary = match config.task_type {
                TaskType::Generation => {
                    GenerationDataset::load(&full, config, profile.commands).map(|d| format!("{} items", d.len()))
                }
                TaskType::Multichoice => MultiChoiceDataset::load(&full, config, profile.commands).map(|d| {
                    let mode = if d.is_single_token() { ", single token" } else { "" };
                    format!("{} items{}", d.len(), mode)
                }),
            };
            match summary {
                Ok(summary) => println!("  {}: {}", file.display(), summary),
                Err(e) => println!("  {}: error: {}", file.display(), e),
            }
        }
    }

    Ok(())
}
