// Timeline build command
//
// Reads analysis outputs from the input directory, generates narration
// through the configured endpoint (or templates when offline), and writes
// the per-half CSVs plus schedule.json.

use anyhow::{Context, Result};
use castline_core::{
    write_schedule, CommentaryPipeline, FileCacheFactory, GenerationReport, LlmProvider,
    PromptBuilder, RawEventProvider, SourceCategory,
};
use castline_openai::OpenAiProvider;
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::output::{print_field, print_table_header, print_table_row, OutputFormat};
use crate::provider::{load_rounds, JsonFileProvider, ROUNDS_FILE};

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Directory holding <category>.json files and rounds.json
    #[arg(long, short)]
    pub input: PathBuf,

    /// Directory for the half CSVs and schedule.json
    #[arg(long, short, default_value = "output")]
    pub output: PathBuf,

    /// Generation cache directory (default: <output>/cache)
    #[arg(long)]
    pub cache: Option<PathBuf>,

    /// Round timing table (default: <input>/rounds.json)
    #[arg(long)]
    pub rounds: Option<PathBuf>,

    /// Map name passed to the prompts
    #[arg(long)]
    pub map: Option<String>,

    /// Maximum concurrent generation calls
    #[arg(long)]
    pub workers: Option<usize>,

    /// Template narration only, no text-generation calls
    #[arg(long)]
    pub offline: bool,
}

impl RunArgs {
    fn cache_dir(&self) -> PathBuf {
        self.cache.clone().unwrap_or_else(|| self.output.join("cache"))
    }

    fn rounds_path(&self) -> PathBuf {
        self.rounds.clone().unwrap_or_else(|| self.input.join(ROUNDS_FILE))
    }
}

/// What a run produced
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub generation: Vec<(SourceCategory, GenerationReport)>,
    pub unavailable: Vec<SourceCategory>,
    pub upper_slots: usize,
    pub lower_slots: usize,
    pub dropped: usize,
    pub files: Vec<PathBuf>,
}

pub async fn run(args: RunArgs, config: AppConfig, format: OutputFormat) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight generation calls");
            let _ = shutdown_tx.send(true);
        }
    });

    let summary = execute(&args, config, shutdown_rx).await?;

    if format.is_text() {
        print_table_header(&[("SOURCE", 14), ("TOTAL", 6), ("CACHED", 7), ("GENERATED", 10), ("FALLBACK", 8)]);
        for (category, report) in &summary.generation {
            print_table_row(&[
                (category.as_str(), 14),
                (&report.total.to_string(), 6),
                (&report.cached.to_string(), 7),
                (&report.generated.to_string(), 10),
                (&report.fallback.to_string(), 8),
            ]);
        }
        println!();
        if !summary.unavailable.is_empty() {
            let names: Vec<&str> = summary.unavailable.iter().map(|c| c.as_str()).collect();
            print_field("Unavailable", &names.join(", "));
        }
        print_field("Upper half", &format!("{} slots", summary.upper_slots));
        print_field("Lower half", &format!("{} slots", summary.lower_slots));
        print_field("Dropped", &summary.dropped.to_string());
        for file in &summary.files {
            print_field("Wrote", &file.display().to_string());
        }
    } else {
        format.print_value(&summary)?;
    }
    Ok(())
}

/// Run the pipeline over `args.input` and write the schedule
pub async fn execute(
    args: &RunArgs,
    mut config: AppConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<RunSummary> {
    if let Some(workers) = args.workers {
        config.pipeline.generator.workers = workers;
    }

    let provider: Option<Arc<dyn LlmProvider>> = if args.offline {
        info!("Offline run, narration comes from templates");
        None
    } else {
        let api_key = config.require_api_key()?;
        Some(Arc::new(OpenAiProvider::with_base_url(api_key, &config.llm.base_url)))
    };

    let rounds = load_rounds(&args.rounds_path())?;

    let mut prompts = PromptBuilder::new(config.pipeline.half_boundary_round);
    if let Some(map) = &args.map {
        prompts = prompts.with_map(map.clone());
    }

    let caches = Arc::new(FileCacheFactory::new(args.cache_dir()));
    let pipeline = CommentaryPipeline::new(config.pipeline, provider, caches).with_prompts(prompts);

    let sources: Vec<Box<dyn RawEventProvider>> = SourceCategory::ALL
        .iter()
        .map(|&category| Box::new(JsonFileProvider::new(&args.input, category)) as Box<dyn RawEventProvider>)
        .collect();

    let output = pipeline
        .run(sources, &rounds, shutdown)
        .await
        .context("Pipeline run failed")?;
    let files = write_schedule(&output.schedule, &args.output)
        .with_context(|| format!("Failed to write schedule to {}", args.output.display()))?;

    Ok(RunSummary {
        upper_slots: output.schedule.upper.len(),
        lower_slots: output.schedule.lower.len(),
        dropped: output.schedule.dropped.len(),
        generation: output.generation,
        unavailable: output.unavailable,
        files,
    })
}
