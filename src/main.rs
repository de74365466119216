mod commands;

use std::path::PathBuf;

use almanac_core::config::AlmanacConfig;
use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "almanac")]
#[command(about = "Query and import events in your local calendar directories")]
struct Cli {
    /// Log debug output (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List events in a date range
    List {
        /// Start and optional end or delta, e.g. "today", "tomorrow 3d",
        /// "2024-05-01 2024-05-07"
        range: Vec<String>,

        /// Event line format (defaults to view.event_format from config)
        #[arg(long)]
        format: Option<String>,

        /// Day header format; pass "" to leave out headers
        #[arg(long)]
        day_format: Option<String>,

        /// Only list events from this calendar
        #[arg(short, long)]
        calendar: Option<String>,
    },
    /// Import events from an .ics file
    Import {
        file: PathBuf,

        /// Import everything without asking
        #[arg(long)]
        batch: bool,

        /// Calendar to import into (defaults to default_calendar from config)
        #[arg(short, long)]
        calendar: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = AlmanacConfig::load()?;
    tracing::debug!(calendars = config.calendars.len(), "Loaded config");

    match cli.command {
        Commands::List {
            range,
            format,
            day_format,
            calendar,
        } => {
            require_calendars(&config)?;
            let calendar = resolve_calendar(&config, calendar.as_deref())?;
            commands::list::run(&config, &range, format, day_format, calendar)
        }
        Commands::Import {
            file,
            batch,
            calendar,
        } => {
            require_calendars(&config)?;
            let calendar = match resolve_calendar(&config, calendar.as_deref())? {
                Some(calendar) => calendar,
                None => config
                    .default_calendar()
                    .map(str::to_string)
                    .ok_or_else(|| anyhow::anyhow!("No calendar to import into"))?,
            };
            commands::import::run(&config, &file, &calendar, batch)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn require_calendars(config: &AlmanacConfig) -> Result<()> {
    if config.calendars.is_empty() {
        let path = AlmanacConfig::config_path()?;
        anyhow::bail!(
            "No calendars configured.\n\n\
            Add one to {}:\n\n  \
            [calendars.personal]\n  \
            path = \"~/.calendars/personal\"",
            path.display()
        );
    }

    Ok(())
}

fn resolve_calendar(config: &AlmanacConfig, calendar: Option<&str>) -> Result<Option<String>> {
    match calendar {
        Some(name) if config.calendars.contains_key(name) => Ok(Some(name.to_string())),
        Some(name) => {
            let available: Vec<_> = config.calendars.keys().cloned().collect();
            anyhow::bail!(
                "Calendar '{}' not found. Available: {}",
                name,
                available.join(", ")
            );
        }
        None => Ok(None),
    }
}
