use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use lecturebook::io::parse_subtitle_file;
use lecturebook::models::format_clock;
use lecturebook::{
    discover_sources, export, load_document, read_textbook, BatchOutcome, BatchReport, Document, ExportFormat,
    HttpModelClient, JsonFileStore, LanguageModel, MemoryStore, ModelConfig, OfflineModel, Pipeline, PipelineConfig,
    ProgressStore, RetryPolicy,
};

#[derive(Parser)]
#[command(name = "lecturebook")]
#[command(author, version, about = "Turn lecture subtitles into a structured textbook", long_about = None)]
struct Cli {
    /// Directory of the progress store
    #[arg(long, global = true, env = "KL_STORE", default_value = ".lecturebook")]
    store: PathBuf,

    /// Keep progress in memory only (no resume, nothing written to --store)
    #[arg(long, global = true)]
    no_store: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract knowledge points from a single subtitle file
    Process {
        /// Subtitle (.srt) or transcript (.txt) file
        file: PathBuf,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Process every subtitle file in a directory, optionally building a textbook
    Batch {
        /// Directory containing .srt / .txt files
        directory: PathBuf,

        /// Documents processed concurrently
        #[arg(short, long, default_value = "3")]
        workers: usize,

        /// Cluster, fuse and export a textbook after processing
        #[arg(short, long)]
        build: bool,

        /// Export format
        #[arg(short, long, value_enum, default_value = "markdown")]
        format: FormatArg,

        /// Output directory for exports
        #[arg(short, long, default_value = "./exports")]
        output: PathBuf,

        /// Reuse stored results of documents already processed
        #[arg(long)]
        resume: bool,

        /// Minimum similarity for two points to be checked as duplicates (0-1)
        #[arg(long, default_value = "0.6")]
        similarity_threshold: f64,

        /// Write the batch report as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Re-export a textbook saved as JSON
    Export {
        /// Textbook JSON written by `batch --format json`
        input: PathBuf,

        #[arg(short, long, value_enum, default_value = "markdown")]
        format: FormatArg,

        #[arg(short, long, default_value = "./exports")]
        output: PathBuf,
    },

    /// Show processing state recorded in the progress store
    Status,

    /// Parse a subtitle file and preview its entries
    Parse {
        file: PathBuf,
    },
}

#[derive(clap::Args)]
struct ModelArgs {
    /// Use the deterministic offline model instead of calling an API
    #[arg(long)]
    offline: bool,

    /// Retries per model call
    #[arg(long, default_value = "3")]
    retries: u32,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Markdown,
    Html,
    Epub,
    Json,
    All,
}

impl FormatArg {
    fn formats(self) -> Vec<ExportFormat> {
        match self {
            FormatArg::Markdown => vec![ExportFormat::Markdown],
            FormatArg::Html => vec![ExportFormat::Html],
            FormatArg::Epub => vec![ExportFormat::Epub],
            FormatArg::Json => vec![ExportFormat::Json],
            FormatArg::All => ExportFormat::ALL.to_vec(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    let store_dir = if cli.no_store { None } else { Some(cli.store.as_path()) };

    match cli.command {
        Commands::Process { file, model } => process_file(file, store_dir, model).await,
        Commands::Batch {
            directory,
            workers,
            build,
            format,
            output,
            resume,
            similarity_threshold,
            report,
            model,
        } => {
            let mut config = PipelineConfig::default().with_retry(retry_policy(&model));
            config.worker_limit = workers;
            config.runner.resume = resume;
            config.fusion.similarity_threshold = similarity_threshold;

            let options = BatchOptions {
                build,
                formats: format.formats(),
                output,
                report,
            };
            run_batch(directory, store_dir, model, config, options).await
        }
        Commands::Export { input, format, output } => export_textbook(input, format, output),
        Commands::Status => show_status(&cli.store).await,
        Commands::Parse { file } => parse_file(file),
    }
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn retry_policy(args: &ModelArgs) -> RetryPolicy {
    RetryPolicy {
        max_retries: args.retries,
        ..RetryPolicy::default()
    }
}

fn build_model(args: &ModelArgs) -> Result<Arc<dyn LanguageModel>> {
    if args.offline {
        warn!("Offline mode: using deterministic placeholder responses, no API calls");
        return Ok(Arc::new(OfflineModel::new()));
    }
    let config = ModelConfig::from_env().context("Model configuration missing (set KL_API_KEY or use --offline)")?;
    info!(model = %config.model, base_url = %config.base_url, "Using model");
    Ok(Arc::new(HttpModelClient::new(config)?))
}

async fn open_store(store_dir: Option<&Path>) -> Result<Arc<dyn ProgressStore>> {
    let Some(dir) = store_dir else {
        return Ok(Arc::new(MemoryStore::new()));
    };
    let store = JsonFileStore::open(dir)
        .await
        .with_context(|| format!("Failed to open progress store: {:?}", dir))?;
    Ok(Arc::new(store))
}

async fn open_pipeline(store_dir: Option<&Path>, model: &ModelArgs, config: PipelineConfig) -> Result<Pipeline> {
    let store = open_store(store_dir).await?;
    Ok(Pipeline::new(build_model(model)?, store, config)?)
}

/// Token cancelled on Ctrl-C
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing running stages");
            token.cancel();
        }
    });
    cancel
}

fn load_or_placeholder(path: &Path) -> Document {
    match load_document(path) {
        Ok(document) => document,
        Err(e) => {
            warn!("Could not read {:?}: {:#}", path, e);
            let mut document = Document::from_path(path, Vec::new());
            document.warn(format!("unreadable input: {:#}", e));
            document
        }
    }
}

async fn process_file(file: PathBuf, store_dir: Option<&Path>, model: ModelArgs) -> Result<()> {
    let config = PipelineConfig::default().with_retry(retry_policy(&model));
    let pipeline = open_pipeline(store_dir, &model, config).await?;

    info!("Processing {:?}", file);
    let document = load_document(&file)?;
    let cancel = cancel_on_interrupt();

    let BatchOutcome::Finished(report) = pipeline.process(vec![document], &cancel).await else {
        bail!("Nothing to process");
    };
    print!("{}", report.render());

    let points = report.knowledge_points();
    println!("Knowledge points: {}", points.len());
    for (i, point) in points.iter().take(3).enumerate() {
        let preview: String = point.content.chars().take(100).collect();
        println!("\n{}. {}\n   {}...", i + 1, point.title, preview);
    }
    Ok(())
}

struct BatchOptions {
    build: bool,
    formats: Vec<ExportFormat>,
    output: PathBuf,
    report: Option<PathBuf>,
}

async fn run_batch(
    directory: PathBuf,
    store_dir: Option<&Path>,
    model: ModelArgs,
    config: PipelineConfig,
    options: BatchOptions,
) -> Result<()> {
    let pipeline = open_pipeline(store_dir, &model, config).await?;
    let sources = discover_sources(&directory)?;
    info!("Found {} source files in {:?}", sources.len(), directory);

    let documents: Vec<Document> = sources.iter().map(|p| load_or_placeholder(p)).collect();
    let cancel = cancel_on_interrupt();

    let report = match pipeline.process(documents, &cancel).await {
        BatchOutcome::NoInput => bail!("No .srt or .txt files found in {:?}", directory),
        BatchOutcome::Finished(report) => report,
    };
    print!("{}", report.render());
    if let Some(path) = &options.report {
        write_report(&report, path)?;
        info!("Batch report written to {:?}", path);
    }

    if !options.build {
        println!("Knowledge points: {}", report.knowledge_points().len());
        return Ok(());
    }
    if cancel.is_cancelled() {
        warn!("Batch was interrupted, skipping textbook build");
        return Ok(());
    }

    let points = report.knowledge_points();
    if points.is_empty() {
        warn!("No knowledge points extracted, nothing to build");
        return Ok(());
    }

    let build = pipeline.build_course(&points).await;
    let textbook = &build.textbook;
    println!(
        "\nCourse: {} ({} chapters, {} entries from {} points)",
        textbook.name,
        textbook.chapters.len(),
        textbook.entry_count(),
        points.len()
    );
    if build.structure.fallback {
        println!("  note: clustering fell back to a single chapter");
    }
    for warning in &textbook.warnings {
        println!("  warning: {}", warning);
    }

    for path in export(textbook, &options.output, &options.formats)? {
        println!("  wrote {}", path.display());
    }
    Ok(())
}

fn write_report(report: &BatchReport, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path).with_context(|| format!("Failed to create file: {:?}", path))?;
    serde_json::to_writer_pretty(file, report).context("Failed to write JSON")?;
    Ok(())
}

fn export_textbook(input: PathBuf, format: FormatArg, output: PathBuf) -> Result<()> {
    let textbook = read_textbook(&input)?;
    for path in export(&textbook, &output, &format.formats())? {
        println!("wrote {}", path.display());
    }
    Ok(())
}

async fn show_status(store_dir: &Path) -> Result<()> {
    let store = JsonFileStore::open(store_dir)
        .await
        .with_context(|| format!("Failed to open progress store: {:?}", store_dir))?;
    let mut records = store.list().await?;

    let mut by_stage: BTreeMap<String, usize> = BTreeMap::new();
    for record in &records {
        *by_stage.entry(format!("{:?}", record.stage).to_lowercase()).or_default() += 1;
    }

    println!("Documents: {}", records.len());
    for (stage, count) in &by_stage {
        println!("  {:<12} {}", stage, count);
    }
    let degraded = records.iter().filter(|r| r.degraded).count();
    if degraded > 0 {
        println!("  degraded     {}", degraded);
    }

    records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    println!("\nRecent:");
    for record in records.iter().take(5) {
        let detail = record.error.as_deref().unwrap_or("");
        println!(
            "  {} {:?} ({} points, {} retries) {}",
            record.source_id,
            record.stage,
            record.knowledge_points.len(),
            record.retries,
            detail
        );
    }
    Ok(())
}

fn parse_file(file: PathBuf) -> Result<()> {
    let entries = parse_subtitle_file(&file)?;
    println!("Parsed {} entries", entries.len());
    for entry in entries.iter().take(5) {
        let preview: String = entry.text.chars().take(50).collect();
        println!("[{}] {}", format_clock(entry.start_ms), preview);
    }
    Ok(())
}
