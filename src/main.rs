//! Beacon demo: emits a heartbeat through the instrument registry and the
//! scoped activity wrapper until interrupted.
//!
//! # Usage
//!
//! ```bash
//! beacon --service-name orders --otel-endpoint http://localhost:4317 --interval-ms 500
//! ```
//!
//! Environment variables can also be used:
//! - `OTEL_SERVICE_NAME`: Service name
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: Collector endpoint
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use std::time::{Duration, Instant};

use anyhow::Context as _;
use beacon::logging::init_tracing_with_otel;
use beacon::{
    ActivityContext, CancellationToken, KeyValue, Observation, SpanKind, Telemetry,
    TelemetryConfig,
};
use clap::Parser;
use uuid::Uuid;

const HEARTBEAT_TOTAL: &str = "beacon_heartbeat_total";
const TICK_DURATION: &str = "beacon_tick_duration_seconds";
const UPTIME: &str = "beacon_uptime_seconds";

/// Beacon: OpenTelemetry heartbeat emitter.
#[derive(Parser, Debug)]
#[command(name = "beacon")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    telemetry: TelemetryConfig,

    /// Milliseconds between heartbeats
    #[arg(long, env = "BEACON_INTERVAL_MS", default_value_t = 1000)]
    interval_ms: u64,

    /// Print declared instruments as JSON after startup
    #[arg(long)]
    list_instruments: bool,
}

/// Print startup banner with version and configuration.
fn print_banner(config: &TelemetryConfig, interval_ms: u64) {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        r#"
  Beacon v{} - OpenTelemetry heartbeat

  Configuration:
    Service:    {} {}
    Endpoint:   {}
    Sampling:   {}
    Interval:   {}ms

  Press Ctrl+C to shutdown gracefully.
"#,
        version,
        config.service_name,
        config.service_version.as_deref().unwrap_or(""),
        config.otel_endpoint.as_deref().unwrap_or("(none, recording only)"),
        config.sample_ratio,
        interval_ms,
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let telemetry = Telemetry::init(&cli.telemetry).context("failed to initialize telemetry")?;
    init_tracing_with_otel(&cli.telemetry.log_level, telemetry.tracer().clone());
    telemetry.log_startup();

    print_banner(&cli.telemetry, cli.interval_ms);

    let started = Instant::now();
    let metrics = telemetry.metrics();
    metrics.create_counter::<u64>(HEARTBEAT_TOTAL, Some("1"), Some("Heartbeats emitted"))?;
    metrics.create_histogram::<f64>(TICK_DURATION, Some("s"), Some("Time spent per heartbeat"))?;
    metrics.create_observable_gauge(
        UPTIME,
        move || vec![Observation::new(started.elapsed().as_secs_f64())],
        Some("s"),
        Some("Seconds since startup"),
    )?;

    if cli.list_instruments {
        let listing = serde_json::json!({
            "counters": metrics.counters(),
            "histograms": metrics.histograms(),
            "observable_gauges": metrics.observable_gauges(),
        });
        println!("{}", serde_json::to_string_pretty(&listing)?);
    }

    // Cancelled on SIGINT/SIGTERM.
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {
                            tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                        }
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, initiating shutdown...");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    tracing::info!("Received Ctrl+C, initiating shutdown...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }

        signal_token.cancel();
    });

    let tenant_id = Uuid::now_v7();
    let service_tag = KeyValue::new("service", cli.telemetry.service_name.clone());
    let mut ticker = tokio::time::interval(Duration::from_millis(cli.interval_ms.max(1)));
    let mut beat: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        beat += 1;

        let context = ActivityContext::new(Uuid::now_v7(), tenant_id)
            .with_source_platform(std::env::consts::OS);
        let tick_started = Instant::now();
        let tags = [service_tag.clone()];

        let result = telemetry
            .traces()
            .start_activity_async_with_input(
                "Heartbeat",
                SpanKind::Internal,
                &context,
                beat,
                shutdown.clone(),
                |beat, activity, _cancel| async move {
                    activity.set_tag("heartbeat.sequence", beat as i64);
                    metrics.increment_counter(HEARTBEAT_TOTAL, 1u64, &tags)
                },
            )
            .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, beat, "Heartbeat failed");
        }
        metrics.record_histogram(TICK_DURATION, tick_started.elapsed().as_secs_f64(), &[])?;
        tracing::debug!(beat, "Heartbeat emitted");
    }

    telemetry.shutdown()?;
    tracing::info!(beats = beat, "Beacon shutdown complete");
    Ok(())
}
