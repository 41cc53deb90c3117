use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use metrics::{describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use ppsclock_time::{SyncMetrics, SyncStatus, TimeSync, TimezoneDbClient};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod host;
mod settings;
mod version;

use host::{HostLinkMonitor, LoggingTimeService, StaticFix, SystemPulse};
use settings::{load_config_with_overrides, AppConfig};
use version::{git_commit_hash, PPSCLOCK_VERSION};

const STATUS_INTERVAL: Duration = Duration::from_secs(10);
const LINK_EVENT_BUFFER: usize = 16;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("ppsclock-node")
        .version(PPSCLOCK_VERSION)
        .about("PPS-disciplined local time reference")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Override the configured log level")
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["pretty", "json"])
                .help("Override the configured log format")
                .global(true),
        )
        .arg(
            Arg::new("api-key")
                .long("api-key")
                .value_name("KEY")
                .help("Timezone service API key")
                .global(true),
        )
        .arg(
            Arg::new("disable-metrics")
                .long("disable-metrics")
                .action(ArgAction::SetTrue)
                .help("Disable the Prometheus metrics endpoint")
                .global(true),
        )
        .subcommand(
            Command::new("check-config")
                .about("Load and validate the configuration, print it and exit"),
        )
        .get_matches();

    if let Some(check_matches) = matches.subcommand_matches("check-config") {
        let config = load_config_with_overrides(check_matches)?;
        if let Some(path) = &config.config_path {
            println!("# loaded from {}", path.display());
        }
        print!("{}", config.to_redacted_toml()?);
        return Ok(());
    }

    let config = load_config_with_overrides(&matches)?;
    init_logging(&config)?;

    info!(
        version = PPSCLOCK_VERSION,
        commit = git_commit_hash(),
        hostname = %config.hostname,
        "starting ppsclock node"
    );

    let metrics_enabled = init_metrics(&config);

    let lookup = TimezoneDbClient::new(
        &config.tz_api_url,
        config.tz_api_key.clone(),
        config.request_timeout(),
    )
    .context("failed to build timezone client")?;

    let engine = TimeSync::new(
        config.sync_config(),
        StaticFix::new(config.fix_latitude, config.fix_longitude),
        Arc::new(lookup),
        Arc::new(LoggingTimeService),
    );

    let pulse = SystemPulse::spawn(engine.pps_edge());

    let (link_tx, link_rx) = mpsc::channel(LINK_EVENT_BUFFER);
    let link = HostLinkMonitor::new(config.hostname.clone(), link_tx).spawn();

    let reporter = spawn_status_reporter(engine.subscribe(), engine.metrics(), metrics_enabled);

    engine
        .run(link_rx, async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutdown signal received"),
                Err(err) => warn!("failed to listen for ctrl-c: {}", err),
            }
        })
        .await;

    pulse.abort();
    link.abort();
    reporter.abort();
    info!("ppsclock node stopped");
    Ok(())
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()?;
    }

    Ok(())
}

/// Installs the Prometheus exporter. Returns whether gauges should be
/// mirrored.
fn init_metrics(config: &AppConfig) -> bool {
    if !config.metrics_enabled {
        info!("Prometheus metrics exporter disabled via configuration");
        return false;
    }

    let addr = match config.metrics_addr() {
        Ok(addr) => addr,
        Err(err) => {
            warn!("Invalid metrics listen address: {:#}", err);
            return false;
        }
    };

    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            info!(%addr, "Prometheus metrics exporter listening");
            describe_gauge!("ppsclock_pulses", "Pulse edges observed");
            describe_gauge!(
                "ppsclock_anchors_dropped",
                "Pulse edges whose anchor was dropped on store contention"
            );
            describe_gauge!("ppsclock_anchors_published", "Reference anchors published");
            describe_gauge!("ppsclock_lookups_failed", "Timezone lookups that failed");
            describe_gauge!("ppsclock_dst_toggles", "Optimistic DST toggles applied");
            describe_gauge!("ppsclock_feed_pushes", "Reference times pushed to the time service");
            describe_gauge!("ppsclock_backoff_seconds", "Current timezone lookup backoff delay");
            describe_gauge!("ppsclock_tz_offset_seconds", "Active timezone offset");
            describe_gauge!("ppsclock_tz_confirmed", "1 once timezone parameters are confirmed");
            true
        }
        Err(err) => {
            warn!("Failed to install Prometheus metrics exporter: {}", err);
            false
        }
    }
}

fn spawn_status_reporter(
    mut status: watch::Receiver<SyncStatus>,
    metrics: Arc<SyncMetrics>,
    mirror_gauges: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATUS_INTERVAL);
        loop {
            ticker.tick().await;
            let current = *status.borrow_and_update();
            let counters = metrics.snapshot();

            info!(
                state = %current.state,
                link = %current.link,
                tz = %current.tz,
                backoff_secs = current.backoff_delay.as_secs(),
                local = ?current.local_reference().map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
                capture_ratio = counters.capture_ratio(),
                "time sync status"
            );

            if mirror_gauges {
                gauge!("ppsclock_pulses").set(counters.pulses as f64);
                gauge!("ppsclock_anchors_dropped").set(counters.anchors_dropped as f64);
                gauge!("ppsclock_anchors_published").set(counters.anchors_published as f64);
                gauge!("ppsclock_lookups_failed").set(counters.lookups_failed as f64);
                gauge!("ppsclock_dst_toggles").set(counters.dst_toggles as f64);
                gauge!("ppsclock_feed_pushes").set(counters.feed_pushes as f64);
                gauge!("ppsclock_backoff_seconds").set(current.backoff_delay.as_secs_f64());
                gauge!("ppsclock_tz_offset_seconds").set(current.tz.offset_seconds() as f64);
                gauge!("ppsclock_tz_confirmed").set(if current.tz_confirmed() { 1.0 } else { 0.0 });
            }
        }
    })
}
