//! Beacon: instrument registry and scoped activity tracing over OpenTelemetry.
//!
//! Beacon puts a small facade in front of the OpenTelemetry SDK:
//! - declare counters, histograms and observable gauges once by name, then
//!   record against them by name
//! - run any unit of work inside a traced activity that is tagged with
//!   correlation data and always ends with the right status
//!
//! Sampling, aggregation and export stay with the SDK.
//!
//! # Modules
//!
//! - [`config`]: CLI and environment configuration
//! - [`error`]: Registry and setup errors
//! - [`logging`]: `tracing` subscriber setup
//! - [`metrics`]: Instrument registry
//! - [`telemetry`]: Provider ownership, startup and shutdown
//! - [`testing`]: In-memory meter and tracer doubles
//! - [`trace`]: Scoped activity wrapper
//!
//! # Example
//!
//! ```
//! use beacon::{ActivityContext, SpanKind, Telemetry, TelemetryConfig};
//! use uuid::Uuid;
//!
//! let telemetry = Telemetry::init(&TelemetryConfig::for_service("orders")).unwrap();
//!
//! let metrics = telemetry.metrics();
//! metrics.create_counter::<u64>("requests_total", Some("1"), None).unwrap();
//! metrics.increment_counter("requests_total", 1u64, &[]).unwrap();
//!
//! let context = ActivityContext::new(Uuid::now_v7(), Uuid::now_v7());
//! telemetry
//!     .traces()
//!     .start_activity("ProcessOrder", SpanKind::Internal, &context, |activity| {
//!         activity.set_tag("order.lines", 3i64);
//!         Ok::<_, std::io::Error>(())
//!     })
//!     .unwrap();
//!
//! telemetry.shutdown().unwrap();
//! ```

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions, // metrics::MetricsManager is fine
    clippy::must_use_candidate,      // Not all functions need #[must_use]
    clippy::missing_errors_doc,      // Error docs can be verbose
    clippy::missing_panics_doc       // Panic docs can be verbose
)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod telemetry;
pub mod testing;
pub mod trace;

pub use config::TelemetryConfig;
pub use error::TelemetryError;
pub use metrics::{InstrumentDescriptor, MetricsManager, Observation};
pub use opentelemetry::KeyValue;
pub use telemetry::Telemetry;
pub use trace::{Activity, ActivityContext, ActivityStatus, SpanKind, TraceManager};
pub use tokio_util::sync::CancellationToken;
