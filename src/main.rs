/// `smoke_ews` command-line entry point.
///
/// Loads `.env`, the TOML config (`--config`, `EWS_CONFIG` or
/// `data/ews.toml`) and the regression tables, then runs one command and
/// prints its result as JSON on stdout. Logs go to stderr.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use smoke_ews_service::config::{config_path_from_env, load_config};
use smoke_ews_service::demo::ALL_SCENARIO;
use smoke_ews_service::logging;
use smoke_ews_service::service::EarlyWarningService;

/// Wildfire smoke PM2.5 early warning for Canadian cities
#[derive(Parser, Debug)]
#[command(name = "smoke_ews", version)]
#[command(about = "Wildfire smoke PM2.5 early-warning engine", long_about = None)]
struct Cli {
    /// Config file (defaults to EWS_CONFIG, then data/ews.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List catalog stations grouped by city
    Stations,
    /// Evaluate a synthetic smoke episode
    Demo {
        /// City key, or "all" for every demo city
        scenario: Option<String>,
    },
    /// Latest results, served from cache within the TTL
    Live {
        /// Limit to one city (all declared cities when omitted)
        city: Option<String>,
    },
    /// Force a refresh regardless of the TTL
    Refresh {
        /// Limit to one city (all declared cities when omitted)
        city: Option<String>,
    },
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = load_config(cli.config.unwrap_or_else(config_path_from_env))?;
    logging::init_from_config(&config.logging);
    let service = EarlyWarningService::from_config(&config)?;

    match cli.command {
        Command::Stations => print_json(&service.get_stations()),
        Command::Demo { scenario } => {
            print_json(&service.get_demo(scenario.as_deref().unwrap_or(ALL_SCENARIO))?)
        }
        Command::Live { city } => print_json(&service.get_live(city.as_deref())?),
        Command::Refresh { city } => print_json(&service.refresh(city.as_deref())?),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
