//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mangaroo_core::{
    ChapterOutcome, HarvestOrchestrator, HarvestOutcome, HarvestResult, ProgressReporter,
};
use mangaroo_harvester::{ChromeOptions, ChromeSession};
use mangaroo_shared::{
    AppConfig, ArchiveBackend, HarvestConfig, init_config, load_config, load_config_from,
    work_id_from_url,
};
use mangaroo_storage::open_archive;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// mangaroo: harvest manga chapters into a document archive.
#[derive(Parser)]
#[command(
    name = "mangaroo",
    version,
    about = "Harvest a manga's chapters with a headless browser and archive every page.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Read configuration from this file instead of ~/.mangaroo/mangaroo.toml.
    #[arg(long, global = true, env = "MANGAROO_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Archive selection flags shared by `harvest` and `ping`.
#[derive(Args, Debug)]
pub(crate) struct ArchiveArgs {
    /// Archive backend: libsql, elasticsearch (es), or none.
    #[arg(long, value_parser = str::parse::<ArchiveBackend>)]
    pub backend: Option<ArchiveBackend>,

    /// Elasticsearch endpoint.
    #[arg(long, env = "MANGAROO_ES_URL")]
    pub es_url: Option<String>,

    /// Database file for the libsql backend.
    #[arg(long)]
    pub db: Option<String>,
}

/// Arguments for `mangaroo harvest`.
#[derive(Args, Debug)]
pub(crate) struct HarvestArgs {
    /// Work page URL (e.g. https://mangakatana.com/manga/one-piece.123).
    pub url: String,

    /// Work id (defaults to the URL path after the work marker).
    #[arg(long)]
    pub id: Option<String>,

    /// Staging directory for downloaded images.
    #[arg(short, long)]
    pub out: Option<String>,

    /// User agent for the browser and image requests.
    #[arg(long, env = "MANGAROO_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Show the browser window.
    #[arg(long)]
    pub headful: bool,

    #[command(flatten)]
    pub archive: ArchiveArgs,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Harvest every chapter of a work.
    Harvest(HarvestArgs),

    /// Check that the archive backend is reachable.
    Ping(ArchiveArgs),

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "mangaroo=info",
        1 => "mangaroo=debug",
        _ => "mangaroo=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Harvest(args) => cmd_harvest(config_path, args).await,
        Command::Ping(args) => cmd_ping(config_path, args).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn resolve_config(path: Option<PathBuf>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(&path)?,
        None => load_config()?,
    };
    Ok(config)
}

/// Fold archive flags into the loaded config.
fn apply_archive_args(config: &mut AppConfig, args: &ArchiveArgs) {
    if let Some(backend) = args.backend {
        config.archive.backend = backend;
    }
    if let Some(url) = &args.es_url {
        config.archive.url = url.clone();
    }
    if let Some(db) = &args.db {
        config.archive.path = db.clone();
    }
}

/// Fold harvest flags into the loaded config.
fn apply_harvest_args(config: &mut AppConfig, args: &HarvestArgs) {
    if let Some(out) = &args.out {
        config.defaults.output_dir = out.clone();
    }
    if let Some(ua) = &args.user_agent {
        config.browser.user_agent = ua.clone();
    }
    if args.headful {
        config.browser.headless = false;
    }
    apply_archive_args(config, &args.archive);
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_harvest(config_path: Option<PathBuf>, args: HarvestArgs) -> Result<()> {
    let mut config = resolve_config(config_path)?;
    apply_harvest_args(&mut config, &args);

    let url = args.url.trim().to_string();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(eyre!("invalid work URL '{url}': expected http(s)"));
    }
    let work_id = args
        .id
        .clone()
        .unwrap_or_else(|| work_id_from_url(&url, &config.site.work_path_marker));

    let archive = open_archive(&config.archive).await?;
    if let Some(archive) = &archive {
        archive
            .ping()
            .await
            .map_err(|e| eyre!("archive backend '{}' is unreachable: {e}", archive.name()))?;
    } else {
        warn!("no archive backend configured, staged files will be kept");
    }

    let harvest_config = HarvestConfig::from(&config);
    let output_dir = harvest_config.output_dir.clone();
    info!(
        url = %url,
        work = %work_id,
        backend = ?config.archive.backend,
        out = %output_dir.display(),
        "harvesting work"
    );

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after the current step");
                cancel.cancel();
            }
        }
    });

    let reporter = Arc::new(CliProgress::new());
    let session = ChromeSession::new(ChromeOptions::from(&harvest_config));
    let mut orchestrator =
        HarvestOrchestrator::from_config(session, archive, harvest_config, reporter.clone())?;

    let outcome = orchestrator.harvest(&url, &work_id, &cancel).await;
    orchestrator.close().await;

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            reporter.abandon();
            return Err(e.into());
        }
    };

    print_summary(&result, &output_dir);
    Ok(())
}

fn print_summary(result: &HarvestResult, output_dir: &std::path::Path) {
    let heading = match result.outcome() {
        HarvestOutcome::Complete => "Harvest complete",
        HarvestOutcome::Partial => "Harvest finished with failures",
        HarvestOutcome::Cancelled => "Harvest cancelled",
    };

    println!();
    println!("  {heading}");
    println!("  Title:      {}", result.title);
    println!("  Status:     {}", result.status);
    println!("  Collection: {}", result.collection);
    println!(
        "  Chapters:   {} of {} attempted ({} ok, {} partial, {} failed)",
        result.chapters.len(),
        result.chapter_count,
        result.chapters_succeeded(),
        result.chapters_partial(),
        result.chapters_failed(),
    );
    println!("  Images:     {} archived", result.images_archived());
    println!("  Staging:    {}", output_dir.display());
    println!("  Time:       {:.1}s", result.elapsed.as_secs_f64());

    for chapter in &result.chapters {
        match chapter.outcome {
            ChapterOutcome::Succeeded => {}
            ChapterOutcome::Partial => println!(
                "    c{}: {}/{} images archived, {} staged",
                chapter.number, chapter.images_archived, chapter.images_found, chapter.images_staged
            ),
            ChapterOutcome::Failed => println!(
                "    c{}: failed{}",
                chapter.number,
                chapter
                    .error
                    .as_deref()
                    .map(|e| format!(" ({e})"))
                    .unwrap_or_default()
            ),
        }
    }
    println!();
}

async fn cmd_ping(config_path: Option<PathBuf>, args: ArchiveArgs) -> Result<()> {
    let mut config = resolve_config(config_path)?;
    apply_archive_args(&mut config, &args);

    let Some(archive) = open_archive(&config.archive).await? else {
        println!("archive backend is disabled (backend = none)");
        return Ok(());
    };

    archive
        .ping()
        .await
        .map_err(|e| eyre!("archive backend '{}' is unreachable: {e}", archive.name()))?;
    println!("{}: ok", archive.name());
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<PathBuf>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn abandon(&self) {
        self.spinner.abandon();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn chapter_started(&self, number: u32, total: u32) {
        self.spinner
            .set_message(format!("Chapter [{number}/{total}] extracting images"));
    }

    fn image_done(&self, chapter: u32, index: u32, total: usize) {
        self.spinner
            .set_message(format!("Chapter {chapter}: image [{index}/{total}]"));
    }

    fn done(&self, _result: &HarvestResult) {
        self.spinner.finish_and_clear();
    }
}
