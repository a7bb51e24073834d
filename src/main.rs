#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result, anyhow};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, error, info, warn};
use std::io::Write;
use std::path::PathBuf;

use tmqe::app_config::{Config, ConfigStore, LogLevel};
use tmqe::app_controller::{Controller, DocumentJob};

/// CLI wrapper for LogLevel
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => LogLevel::Error,
            CliLogLevel::Warn => LogLevel::Warn,
            CliLogLevel::Info => LogLevel::Info,
            CliLogLevel::Debug => LogLevel::Debug,
            CliLogLevel::Trace => LogLevel::Trace,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "tmqe", version, about = "Translation memory and quality estimation pipeline")]
struct CommandLineOptions {
    /// Configuration file, used instead of the profile store
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Named profile from the profile store
    #[arg(short, long, global = true, env = "TMQE_PROFILE")]
    profile: Option<String>,

    /// Set logging level
    #[arg(short, long, global = true, value_enum)]
    log_level: Option<CliLogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Translate one or more JSON documents
    Translate(TranslateArgs),

    /// Score a single candidate translation
    Score(ScoreArgs),

    /// Show device memory and loaded models
    Resources,

    /// Manage cached models
    Models {
        #[command(subcommand)]
        action: ModelsAction,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser, Debug)]
struct TranslateArgs {
    /// Documents to translate
    #[arg(value_name = "DOCUMENT", required = true)]
    inputs: Vec<PathBuf>,

    /// Source language code (e.g. 'en', 'en-US')
    #[arg(short, long)]
    source_language: String,

    /// Target language code
    #[arg(short, long)]
    target_language: String,

    /// Translation memory (TMX or JSON)
    #[arg(long)]
    tmx: Option<PathBuf>,

    /// Termbase (TBX or JSON)
    #[arg(long)]
    tbx: Option<PathBuf>,

    /// Output path, only valid with a single document
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Segments per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Segments between checkpoints
    #[arg(long)]
    save_interval: Option<usize>,

    /// Start over even when a checkpoint exists
    #[arg(long)]
    no_resume: bool,
}

#[derive(Parser, Debug)]
struct ScoreArgs {
    /// Candidate translation
    #[arg(long)]
    candidate: String,

    /// Source text
    #[arg(long)]
    source: String,

    /// Reference translation
    #[arg(long)]
    reference: Option<String>,
}

#[derive(Subcommand, Debug)]
enum ModelsAction {
    /// List catalogued and downloaded models
    List,
    /// Download a catalogued model
    Download { model_id: String },
    /// Delete a downloaded model
    Delete { model_id: String },
}

// @struct: Colourised stderr logger; verbosity follows `log::max_level`
struct CustomLogger;

impl CustomLogger {
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(CustomLogger))?;
        log::set_max_level(level);
        Ok(())
    }

    fn colour(level: Level) -> &'static str {
        match level {
            Level::Error => "1;31",
            Level::Warn => "1;33",
            Level::Info => "1;32",
            Level::Debug => "1;36",
            Level::Trace => "1;35",
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let _ = writeln!(
                std::io::stderr(),
                "\x1B[{}m{} {:<5} {}\x1B[0m",
                Self::colour(record.level()),
                now,
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Explicit file first, then the profile store
fn load_config(options: &CommandLineOptions) -> Result<Config> {
    let mut config = match &options.config {
        Some(path) => Config::from_file(path)?,
        None => ConfigStore::default_location()?
            .load(options.profile.as_deref())
            .context("Failed to load configuration")?,
    };
    if let Some(level) = &options.log_level {
        config.log_level = level.clone().into();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    CustomLogger::init(LevelFilter::Info)?;

    let cli = CommandLineOptions::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = CommandLineOptions::command();
        generate(*shell, &mut cmd, "tmqe", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = load_config(&cli)?;
    log::set_max_level(config.log_level.to_level_filter());

    match cli.command {
        Commands::Translate(args) => {
            if args.no_resume {
                config.workflow.resume = false;
            }
            run_translate(config, args).await
        }
        Commands::Score(args) => {
            let controller = Controller::with_config(config)?;
            let result = controller
                .score_segment(&args.candidate, &args.source, args.reference.as_deref())
                .await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Commands::Resources => {
            let controller = Controller::with_config(config)?;
            match controller.get_resource_summary() {
                Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
                None => println!("No device memory information available"),
            }
            for model in controller.resources().loaded_models() {
                println!("loaded: {} ({:.2} GB since {})", model.model_id, model.estimated_gb, model.loaded_at);
            }
            Ok(())
        }
        Commands::Models { action } => {
            let controller = Controller::with_config(config)?;
            match action {
                ModelsAction::List => {
                    for model in controller.list_models() {
                        let size = model.size_gb.map(|s| format!("{:.2} GB", s)).unwrap_or_else(|| "-".to_string());
                        let status = if model.downloaded { "downloaded" } else { "available" };
                        println!("{:<40} {:<10} {:<11} {}", model.model_id, model.kind.to_string(), status, size);
                    }
                }
                ModelsAction::Download { model_id } => {
                    let path = controller.download_model(&model_id).await?;
                    println!("{}", path.display());
                }
                ModelsAction::Delete { model_id } => {
                    if controller.delete_model(&model_id).await? {
                        println!("Deleted {}", model_id);
                    } else {
                        println!("{} was not downloaded", model_id);
                    }
                }
            }
            Ok(())
        }
        Commands::Completions { .. } => Ok(()),
    }
}

async fn run_translate(config: Config, args: TranslateArgs) -> Result<()> {
    if args.output.is_some() && args.inputs.len() > 1 {
        return Err(anyhow!("--output can only be used with a single document"));
    }
    let batch_size = args.batch_size.unwrap_or(config.workflow.batch_size);
    let save_interval = args.save_interval.unwrap_or(config.workflow.save_interval);

    let controller = Controller::with_config(config)?;

    let cancel = controller.cancellation().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current segment");
            cancel.cancel();
        }
    });

    let jobs: Vec<DocumentJob> = args
        .inputs
        .iter()
        .map(|input| {
            let mut job = DocumentJob::new(input, &args.source_language, &args.target_language);
            job.output = args.output.clone();
            job.tmx = args.tmx.clone();
            job.tbx = args.tbx.clone();
            job
        })
        .collect();

    let results = controller.translate_documents(jobs, batch_size, save_interval).await;

    let mut failures = 0;
    for (input, result) in args.inputs.iter().zip(results) {
        match result {
            Ok(stats) => info!("{}: {}", input.display(), stats),
            Err(e) => {
                error!("{}: {:#}", input.display(), e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        return Err(anyhow!("{} of {} documents failed", failures, args.inputs.len()));
    }
    Ok(())
}
