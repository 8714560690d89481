use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use navcast::cli::settings::SettingsChanges;
use navcast::core::fund::EstimateSource;
use navcast::core::log::init_logging;
use navcast::settings::ValuationMode;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the example configuration (to --config-path when given)
    Setup,
    /// Manage tracked funds
    Funds {
        #[command(subcommand)]
        action: FundsAction,
    },
    /// Show or change settings
    Settings {
        /// Estimate to display: official, holdings or smart
        #[arg(long, value_parser = parse_mode)]
        mode: Option<ValuationMode>,
        /// Decimal places for estimates (0-6)
        #[arg(long)]
        decimals: Option<u8>,
        /// Refresh interval in seconds (5-3600)
        #[arg(long)]
        refresh: Option<u32>,
        /// Enable or disable auto refresh
        #[arg(long)]
        auto_refresh: Option<bool>,
    },
    /// Display a fund's valuation snapshot and live estimate
    Valuation { code: String },
    /// Display today's intraday estimate series
    Intraday { code: String },
    /// Record one intraday estimate point for today
    Record {
        code: String,
        /// Exchange-local time, HH:MM
        time: String,
        /// Estimated return in percent
        #[arg(allow_negative_numbers = true)]
        value: f64,
        #[arg(long, default_value = "holdings", value_parser = parse_source)]
        source: EstimateSource,
    },
    /// Show the more accurate estimate source for a fund
    BestSource { code: String },
    /// Backtest the estimation strategy over tracked funds
    Backtest {
        /// Discard today's cached results and run again
        #[arg(long)]
        force: bool,
    },
    /// Record intraday estimates during market hours until interrupted
    Track,
}

#[derive(Subcommand)]
enum FundsAction {
    /// List tracked funds
    List,
    /// Start tracking funds
    Add {
        #[arg(required = true)]
        codes: Vec<String>,
    },
    /// Stop tracking funds
    Remove {
        #[arg(required = true)]
        codes: Vec<String>,
    },
}

fn parse_mode(s: &str) -> Result<ValuationMode, String> {
    s.parse().map_err(|e: navcast::core::ValuationError| e.to_string())
}

fn parse_source(s: &str) -> Result<EstimateSource, String> {
    s.parse().map_err(|e: navcast::core::ValuationError| e.to_string())
}

impl From<Commands> for navcast::AppCommand {
    fn from(cmd: Commands) -> navcast::AppCommand {
        match cmd {
            Commands::Funds { action } => match action {
                FundsAction::List => navcast::AppCommand::FundsList,
                FundsAction::Add { codes } => navcast::AppCommand::FundsAdd(codes),
                FundsAction::Remove { codes } => navcast::AppCommand::FundsRemove(codes),
            },
            Commands::Settings {
                mode,
                decimals,
                refresh,
                auto_refresh,
            } => navcast::AppCommand::Settings(SettingsChanges {
                mode,
                decimals,
                refresh_interval_sec: refresh,
                auto_refresh,
            }),
            Commands::Valuation { code } => navcast::AppCommand::Valuation(code),
            Commands::Intraday { code } => navcast::AppCommand::Intraday(code),
            Commands::Record {
                code,
                time,
                value,
                source,
            } => navcast::AppCommand::Record {
                code,
                time,
                value,
                source,
            },
            Commands::BestSource { code } => navcast::AppCommand::BestSource(code),
            Commands::Backtest { force } => navcast::AppCommand::Backtest { force },
            Commands::Track => navcast::AppCommand::Track,
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => {
            navcast::cli::setup::setup(cli.config_path.as_deref()).map(|_| ())
        }
        Some(cmd) => navcast::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
