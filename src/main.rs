//! Drift analytics - main entry point
//!
//! This binary provides three subcommands:
//! - report: Build the market report and save its charts
//! - export: Download SPL transfer histories to CSV
//! - visualize: Summarize previously exported transfer CSVs

use anyhow::Result;
use clap::{Parser, Subcommand};
use drift_analytics::Config;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "drift-analytics")]
#[command(about = "Drift market reports and SPL transfer history exports", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (defaults are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the market report from an account snapshot and save the charts
    Report {
        /// Account snapshot JSON (overrides config)
        #[arg(short, long)]
        snapshot: Option<PathBuf>,

        /// Directory for chart images (overrides config)
        #[arg(short, long)]
        images: Option<PathBuf>,
    },

    /// Download SPL transfer histories for the tracked accounts
    Export {
        /// Only export these account names (repeatable). E.g., "--account orca"
        #[arg(short, long)]
        account: Vec<String>,

        /// Window start (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// Window end (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,

        /// Output directory for CSV files
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Summarize exported transfer CSVs
    Visualize {
        /// Directory holding the exported CSV files (defaults to the export output directory)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // Log file naming pattern: {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Filter out noisy HTTP crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    // Same format without ANSI colors
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());

    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Report { .. } => "report",
        Commands::Export { .. } => "export",
        Commands::Visualize { .. } => "visualize",
    };

    setup_logging(cli.verbose, command_name)?;

    let config = Config::load(cli.config.as_deref())?;
    if let Some(path) = &cli.config {
        info!("Loaded configuration from: {}", path.display());
    }

    match cli.command {
        Commands::Report { snapshot, images } => commands::report::run(config, snapshot, images),

        Commands::Export {
            account,
            from,
            to,
            output,
        } => commands::export::run(config, account, from, to, output),

        Commands::Visualize { input } => commands::visualize::run(config, input),
    }
}
