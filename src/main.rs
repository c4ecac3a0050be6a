//! CLI entry point for the fleet dashboard core.
//!
//! Provides subcommands for watching live metrics from a document store,
//! running a synthetic motion demo, and scrubbing through a recorded path.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use fleet_live::clock::{Clock, SystemClock};
use fleet_live::config::{Settings, SettingsArgs};
use fleet_live::fetch::{BasicClient, HttpClient, auth::ApiKey};
use fleet_live::geocode::{GeocodeCache, Geocoding, HttpGeocoder, ReverseGeocoder};
use fleet_live::metrics::FleetMetrics;
use fleet_live::motion::{
    PlaybackController, PlaybackState, SimulationConfig, SimulationController, Waypoint,
};
use fleet_live::output::{MetricsRow, append_record, log_summary, print_json};
use fleet_live::runtime::{Dashboard, RuntimeOptions};
use fleet_live::stream::PollingStore;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "fleet_live")]
#[command(about = "Live fleet metrics and map motion", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: SettingsArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to the document store and report metrics as they change
    Watch {
        /// CSV file to append a metrics row to on every change
        #[arg(short, long)]
        output: Option<String>,

        /// Log the full metrics as JSON instead of a one-line summary
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Run a synthetic motion demo from a JSON array of simulation configs
    Simulate {
        /// Path to the config file
        #[arg(value_name = "FILE")]
        config: String,
    },
    /// Play back a recorded path from a JSON array of waypoints
    Playback {
        /// Path to the waypoint file
        #[arg(value_name = "FILE")]
        path: String,

        /// Playback speed multiplier (1, 2 or 4)
        #[arg(short, long, default_value_t = 1)]
        speed: u32,

        /// Label for the entity being played back
        #[arg(long, default_value = "recorded")]
        subject: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/fleet_live.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("fleet_live.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("RUST_LOG")
                .from_env_lossy(),
        );

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::DEBUG.into())
                .with_env_var("RUST_LOG_JSON")
                .from_env_lossy(),
        );

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let settings = Settings::try_from(cli.settings)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli.command {
        Commands::Watch { output, json } => watch_metrics(&settings, clock, output, json).await?,
        Commands::Simulate { config } => simulate(&settings, clock, &config).await?,
        Commands::Playback {
            path,
            speed,
            subject,
        } => playback(&settings, clock, &path, speed, &subject).await?,
    }

    Ok(())
}

/// Builds the store transport, adding bearer auth when a token is configured.
fn store_client(settings: &Settings) -> Result<Box<dyn HttpClient>> {
    let basic = BasicClient::with_timeout(Duration::from_secs(30))?;
    Ok(match &settings.store_token {
        Some(token) => Box::new(ApiKey::bearer(basic, token)?),
        None => Box::new(basic),
    })
}

fn geocoding(
    settings: &Settings,
    clock: Arc<dyn Clock>,
) -> Result<Option<Geocoding<Box<dyn ReverseGeocoder>>>> {
    let Some(url) = &settings.geocoder_url else {
        return Ok(None);
    };
    let geocoder: Box<dyn ReverseGeocoder> = Box::new(HttpGeocoder::new(BasicClient::new(), url)?);
    Ok(Some(Geocoding::new(
        geocoder,
        GeocodeCache::with_default_ttl(clock),
        settings.geocode_timeout,
    )))
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

/// Runs the dashboard loop until Ctrl+C, reporting every metrics change.
#[tracing::instrument(skip(settings, clock), fields(store_url = tracing::field::Empty))]
async fn watch_metrics(
    settings: &Settings,
    clock: Arc<dyn Clock>,
    output: Option<String>,
    json: bool,
) -> Result<()> {
    let store_url = settings.store_url()?;
    tracing::Span::current().record("store_url", store_url);

    let store = PollingStore::new(store_client(settings)?, store_url, settings.poll_interval)?;
    let mut dashboard = Dashboard::new(store, clock.clone(), RuntimeOptions::from(settings));
    if let Some(geocoding) = geocoding(settings, clock.clone())? {
        info!("Reverse geocoding enabled");
        dashboard = dashboard.with_geocoding(geocoding);
    }

    let reporter = tokio::spawn(report_metrics(dashboard.metrics(), clock, output, json));

    info!("Watching fleet metrics. Press Ctrl+C to stop.");
    dashboard.run(ctrl_c()).await?;

    reporter.abort();
    Ok(())
}

async fn report_metrics(
    mut rx: watch::Receiver<FleetMetrics>,
    clock: Arc<dyn Clock>,
    output: Option<String>,
    json: bool,
) {
    while rx.changed().await.is_ok() {
        let metrics = rx.borrow_and_update().clone();
        if json {
            if let Err(e) = print_json(&metrics) {
                warn!(error = %e, "Failed to serialize metrics");
            }
        } else {
            log_summary(&metrics);
        }

        if let Some(path) = &output {
            let row = MetricsRow::from_metrics(&metrics, clock.now());
            if let Err(e) = append_record(path, &row) {
                error!(error = %e, path = %path, "Failed to write metrics row");
            }
        }
    }
}

/// Drives a simulation batch to completion on the configured tick.
#[tracing::instrument(skip(settings, clock))]
async fn simulate(settings: &Settings, clock: Arc<dyn Clock>, config: &str) -> Result<()> {
    let raw = std::fs::read_to_string(config).with_context(|| format!("reading {config}"))?;
    let configs: Vec<SimulationConfig> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {config}"))?;

    let mut controller = SimulationController::new(clock);
    let started = controller.start(&configs);
    if started == 0 {
        bail!("no valid simulation configs in {config}");
    }
    info!(started, skipped = configs.len() - started, "Simulation started");

    let mut ticker = tokio::time::interval(settings.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                warn!("Interrupted");
                controller.stop();
                break;
            }
            _ = ticker.tick() => {
                let frame = controller.tick();
                for entity in &frame.positions {
                    info!(
                        entity = %entity.entity_id,
                        lat = entity.position.lat,
                        lng = entity.position.lng,
                        "Position"
                    );
                }
                info!(progress = frame.progress, "Simulation frame");
                if controller.is_finished() {
                    info!("Simulation complete");
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Plays a recorded path at a fixed speed and logs the marker each tick.
#[tracing::instrument(skip(settings, clock))]
async fn playback(
    settings: &Settings,
    clock: Arc<dyn Clock>,
    path: &str,
    speed: u32,
    subject: &str,
) -> Result<()> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let waypoints: Vec<Waypoint> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?;

    let mut controller = PlaybackController::new(clock);
    controller.select(subject, waypoints)?;
    controller.set_speed(speed)?;
    controller.play()?;

    let mut ticker = tokio::time::interval(settings.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                warn!("Interrupted");
                controller.pause()?;
                break;
            }
            _ = ticker.tick() => {
                let progress = controller.advance()?;
                let pos = controller.current_position()?;
                info!(progress, lat = pos.lat, lng = pos.lng, "Playback");
                if controller.state() == PlaybackState::Paused {
                    info!("Playback reached the end of the path");
                    break;
                }
            }
        }
    }
    controller.close();
    Ok(())
}
