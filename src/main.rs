//! CLI entry point for the bus tracker.
//!
//! Provides subcommands for listing the live fleet, listing routes, looking
//! up one bus's timing status, and polling the feed continuously.

use anyhow::{Context, Result};
use bus_tracker::{
    bus::Bus,
    config::{FeedConfig, TrackerConfig},
    coordinator::{TimingLookup, TrackingCoordinator},
    filter::{BusFilter, OccupancyFilter},
    infra::gocoach::GoCoachClient,
    timing::TimingStatus,
};
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const DEFAULT_LOG_PATH: &str = "logs/bus_tracker.log";

#[derive(Parser)]
#[command(name = "bus_tracker")]
#[command(about = "Live bus positions and timings from the Go Coach feed", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the feed once and print the matching buses
    List {
        /// Only show these routes (repeatable)
        #[arg(short, long = "route")]
        routes: Vec<String>,

        /// Only show buses at this occupancy level
        #[arg(short, long, value_enum, default_value_t = OccupancyFilter::All)]
        occupancy: OccupancyFilter,

        /// Text to match against route, title and destination
        #[arg(short, long, default_value = "")]
        search: String,

        /// Print buses as JSON instead of one line each
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print the routes currently in service
    Routes,
    /// Look up the timing status of one bus
    Timing {
        /// Bus id as printed by `list`
        #[arg(value_name = "BUS_ID")]
        bus_id: String,
    },
    /// Keep refreshing the feed until Ctrl+C
    Watch {
        /// Seconds between refreshes (defaults to BUS_REFRESH_INTERVAL_SECS or 30)
        #[arg(short, long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    let _log_guard = init_tracing()?;

    let cli = Cli::parse();

    let feed_config = FeedConfig::from_env()?;
    let tracker_config = TrackerConfig::from_env()?;
    let client = GoCoachClient::new(&feed_config)?;
    let tracker = Arc::new(TrackingCoordinator::new(client, &tracker_config));

    match cli.command {
        Commands::List {
            routes,
            occupancy,
            search,
            json,
        } => {
            refresh_or_bail(&tracker).await?;
            let filter = BusFilter {
                routes: routes.into_iter().collect(),
                occupancy,
                search,
            };
            let buses = tracker.filtered_buses(&filter);

            info!(
                shown = buses.len(),
                total = tracker.buses().len(),
                filtered = filter.is_active(),
                "Bus list"
            );
            if json {
                println!("{}", serde_json::to_string_pretty(&buses)?);
            } else {
                for bus in &buses {
                    println!("{}", summary_line(bus));
                }
            }
        }
        Commands::Routes => {
            refresh_or_bail(&tracker).await?;
            for route in tracker.routes() {
                println!("{route}");
            }
        }
        Commands::Timing { bus_id } => {
            refresh_or_bail(&tracker).await?;
            let bus = tracker
                .bus(&bus_id)
                .with_context(|| format!("no bus with id '{bus_id}' in the current feed"))?;

            let lookup = tracker.fetch_timing_status(&bus).await;
            if lookup == TimingLookup::Failed {
                warn!(bus_id = %bus_id, error = ?tracker.error_message(), "Timing lookup failed");
            }
            let status = tracker.timing_status(bus.id()).unwrap_or(TimingStatus::UNKNOWN);
            println!("{} → {}: {}", bus.title(), bus.destination_label(), status.description());
        }
        Commands::Watch { interval } => {
            let interval = interval
                .map(Duration::from_secs)
                .unwrap_or(tracker_config.refresh_interval);
            let refresh_loop = tracker.start_refresh_loop(interval);

            info!("Watching feed. Press Ctrl+C to stop.");
            tokio::signal::ctrl_c().await?;

            refresh_loop.stop().await;
            info!(buses = tracker.buses().len(), "Stopped watching");
        }
    }

    Ok(())
}

/// Installs a human-readable stderr layer and a JSON file layer that rolls
/// daily. The returned guard flushes the file writer when dropped.
fn init_tracing() -> Result<WorkerGuard> {
    let log_path = PathBuf::from(
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| DEFAULT_LOG_PATH.to_string()),
    );
    let (dir, prefix) = log_location(&log_path);
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, prefix));

    let console = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));
    let json_file = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(file_writer)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(console)
        .with(json_file)
        .init();
    Ok(guard)
}

/// Splits a log path into the rolling appender's directory and file prefix.
fn log_location(path: &Path) -> (&Path, &OsStr) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let prefix = path.file_name().unwrap_or(OsStr::new("bus_tracker.log"));
    (dir, prefix)
}

/// Runs one refresh and turns a recorded feed error into a CLI error.
async fn refresh_or_bail(tracker: &TrackingCoordinator<GoCoachClient>) -> Result<()> {
    tracker.refresh().await;
    if let Some(message) = tracker.error_message() {
        error!(error = %message, "Could not load buses");
        anyhow::bail!(message);
    }
    Ok(())
}

fn summary_line(bus: &Bus) -> String {
    let route = bus.line_badge_text().unwrap_or_else(|| bus.title().to_string());
    let position = bus
        .coordinate()
        .map(|c| format!("{:.5},{:.5}", c.latitude, c.longitude))
        .unwrap_or_else(|| "no position".to_string());
    format!(
        "{:<24} {:<5} {:<32} {:<22} {}",
        bus.id(),
        route,
        bus.destination_label(),
        bus.occupancy_description(),
        position
    )
}
