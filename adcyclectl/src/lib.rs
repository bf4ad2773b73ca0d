use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use adcycle_core::ad::{AdInventory, FileStore, SelectionError, StoreError};
use adcycle_core::browser::{PageError, TelemetryError};
use adcycle_core::{load_app_config, AppConfig};

pub mod commands;

use commands::publish::PublishArgs;
use commands::select::SelectArgs;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] adcycle_core::ConfigError),
    #[error("ad store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid selection: {0}")]
    Selection(#[from] SelectionError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("browser error: {0}")]
    Browser(#[from] PageError),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{0} ad(s) failed validation")]
    InvalidAds(usize),
    #[error("captcha requires manual action: solve it in the browser, then run publish again")]
    ManualPause,
}

impl AppError {
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::ManualPause => 2,
            _ => 1,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Republishing control for marketplace ads", long_about = None)]
pub struct Cli {
    /// Path of the configuration document (.yaml, .json or .toml)
    #[arg(long, default_value = "config.yaml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the configuration and every ad file
    Verify,
    /// Show which ads a selection expression picks and at what price
    Select(SelectArgs),
    /// Publish the selected ads
    Publish(PublishArgs),
    /// Print the resolved timeout table
    Timeouts,
    /// Show update-check state and recorded operation timings
    Status,
}

pub fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Verify => {
            let report = commands::verify::execute(&context)?;
            render(&report, cli.format)?;
            if report.invalid > 0 {
                return Err(AppError::InvalidAds(report.invalid));
            }
        }
        Commands::Select(args) => {
            let report = commands::select::execute(&context, args)?;
            render(&report, cli.format)?;
        }
        Commands::Publish(args) => {
            let summary = commands::publish::execute(&context, args)?;
            render(&summary, cli.format)?;
            if summary.paused() {
                return Err(AppError::ManualPause);
            }
        }
        Commands::Timeouts => {
            let table = commands::timeouts::execute(&context);
            render(&table, cli.format)?;
        }
        Commands::Status => {
            let status = commands::status::execute(&context)?;
            render(&status, cli.format)?;
        }
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

pub(crate) trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
pub struct AppContext {
    config_path: PathBuf,
    config: AppConfig,
    store: FileStore,
}

impl AppContext {
    pub fn new(cli: &Cli) -> Result<Self> {
        Self::load(&cli.config)
    }

    pub fn load(config_path: &std::path::Path) -> Result<Self> {
        let config = load_app_config(config_path)?;
        let store = FileStore::from_config(&config);
        Ok(Self {
            config_path: config_path.to_path_buf(),
            config,
            store,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    fn load_ads(&self) -> Result<AdInventory> {
        let inventory = self.store.load_ads()?;
        for issue in &inventory.issues {
            tracing::warn!(path = %issue.path.display(), error = %issue.message, "ad file ignored");
        }
        Ok(inventory)
    }
}
