//! Structured logging setup.
//!
//! Configures `tracing` with:
//! - Console output with target, thread ids and source locations
//! - Environment-based filter (via RUST_LOG), falling back to the given level
//! - Optional export of `tracing` spans through an OpenTelemetry tracer

use opentelemetry::trace::Tracer;
use tracing_opentelemetry::PreSampledTracer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn fmt_layer<S>() -> tracing_subscriber::fmt::Layer<S> {
    tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
}

/// Initialize console logging.
///
/// # Panics
///
/// Panics if a global subscriber has already been installed.
pub fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(fmt_layer())
        .init();

    tracing::info!(level = log_level, "Logging initialized");
}

/// Initialize console logging and bridge `tracing` spans into `tracer`.
///
/// # Panics
///
/// Panics if a global subscriber has already been installed.
pub fn init_tracing_with_otel<T>(log_level: &str, tracer: T)
where
    T: Tracer + PreSampledTracer + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(fmt_layer())
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .init();

    tracing::info!(level = log_level, "Logging initialized with OpenTelemetry export");
}

/// Initialize logging for tests (only logs errors).
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("error")
        .with_test_writer()
        .try_init();
}
