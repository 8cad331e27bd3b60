//! Process-wide telemetry context.
//!
//! [`Telemetry`] is built once at startup from a [`TelemetryConfig`] and owns
//! the SDK providers together with the [`MetricsManager`] and [`TraceManager`]
//! built on them. Components receive these by reference or `Arc` clone; nothing
//! is installed globally. [`Telemetry::shutdown`] flushes pending exports.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::metrics::{Meter, MeterProvider as _};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{Protocol, WithExportConfig};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{self as sdktrace, Sampler, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};

use crate::config::TelemetryConfig;
use crate::error::TelemetryError;
use crate::metrics::MetricsManager;
use crate::trace::TraceManager;

const SERVICE_NAME: &str = "service.name";
const SERVICE_VERSION: &str = "service.version";

/// Owner of the tracer and meter providers and the facades built on them.
pub struct Telemetry {
    config: TelemetryConfig,
    tracer_provider: TracerProvider,
    meter_provider: SdkMeterProvider,
    tracer: sdktrace::Tracer,
    meter: Meter,
    metrics: Arc<MetricsManager>,
    traces: Arc<TraceManager>,
}

impl Telemetry {
    /// Build providers, tracer, meter, registry and activity wrapper.
    ///
    /// With an OTLP endpoint configured the exporters use the Tokio runtime,
    /// so this must be called from within one.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an invalid configuration and `Exporter`
    /// when the OTLP pipelines cannot be built.
    pub fn init(config: &TelemetryConfig) -> Result<Self, TelemetryError> {
        config.validate()?;

        let resource = build_resource(config);
        let tracer_provider = build_tracer_provider(config, resource.clone())?;
        let meter_provider = build_meter_provider(config, resource)?;

        let mut tracer_builder = tracer_provider.tracer_builder(config.service_name.clone());
        if let Some(version) = &config.service_version {
            tracer_builder = tracer_builder.with_version(version.clone());
        }
        let tracer = tracer_builder.build();

        let meter = meter_provider.versioned_meter(
            leak(&config.service_name),
            config.service_version.as_deref().map(leak),
            None,
            None,
        );

        let metrics = Arc::new(MetricsManager::from_meter(meter.clone()));
        let traces = Arc::new(TraceManager::from_tracer(tracer.clone()));

        Ok(Self {
            config: config.clone(),
            tracer_provider,
            meter_provider,
            tracer,
            meter,
            metrics,
            traces,
        })
    }

    /// Log the active telemetry configuration.
    ///
    /// [`init`](Self::init) logs nothing; call this once a subscriber is
    /// installed.
    pub fn log_startup(&self) {
        let config = &self.config;
        tracing::info!(
            service = %config.service_name,
            version = config.service_version.as_deref().unwrap_or("unversioned"),
            sample_ratio = config.sample_ratio,
            "Telemetry initialized"
        );
        match config.otel_endpoint.as_deref() {
            Some(endpoint) => tracing::info!(
                endpoint,
                export_interval_secs = config.export_interval_secs,
                "OTLP trace and metrics exporters configured"
            ),
            None => tracing::info!("No OTLP endpoint, telemetry is recorded but not exported"),
        }
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// The instrument registry.
    pub fn metrics(&self) -> &Arc<MetricsManager> {
        &self.metrics
    }

    /// The scoped activity wrapper.
    pub fn traces(&self) -> &Arc<TraceManager> {
        &self.traces
    }

    /// The scoped tracer, e.g. for bridging `tracing` spans.
    pub fn tracer(&self) -> &sdktrace::Tracer {
        &self.tracer
    }

    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    /// Flush pending exports and shut both providers down.
    ///
    /// Both providers are shut down even if the first one fails; the first
    /// failure is reported.
    pub fn shutdown(self) -> Result<(), TelemetryError> {
        for result in self.tracer_provider.force_flush() {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Failed to flush spans");
            }
        }
        if let Err(e) = self.meter_provider.force_flush() {
            tracing::warn!(error = %e, "Failed to flush metrics");
        }

        let traces = self
            .tracer_provider
            .shutdown()
            .map_err(|e| TelemetryError::Shutdown(format!("tracer provider: {e}")));
        let metrics = self
            .meter_provider
            .shutdown()
            .map_err(|e| TelemetryError::Shutdown(format!("meter provider: {e}")));

        tracing::info!(service = %self.config.service_name, "Telemetry shut down");
        traces.and(metrics)
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

/// Meter scope names must be `'static`; leaked once per [`Telemetry::init`].
fn leak(value: &str) -> &'static str {
    Box::leak(value.to_owned().into_boxed_str())
}

fn build_resource(config: &TelemetryConfig) -> Resource {
    let mut attributes = vec![KeyValue::new(SERVICE_NAME, config.service_name.clone())];
    if let Some(version) = &config.service_version {
        attributes.push(KeyValue::new(SERVICE_VERSION, version.clone()));
    }
    Resource::new(attributes)
}

fn sampler(ratio: f64) -> Sampler {
    if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(ratio)
    }
}

fn build_tracer_provider(
    config: &TelemetryConfig,
    resource: Resource,
) -> Result<TracerProvider, TelemetryError> {
    let trace_config = sdktrace::Config::default()
        .with_sampler(sampler(config.sample_ratio))
        .with_resource(resource);

    let Some(endpoint) = config.otel_endpoint.as_deref() else {
        // Spans are still started and sampled, just not exported.
        return Ok(TracerProvider::builder().with_config(trace_config).build());
    };

    let provider = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(trace_config)
        .install_batch(runtime::Tokio)
        .map_err(|e| TelemetryError::Exporter(format!("traces: {e}")))?;

    Ok(provider)
}

fn build_meter_provider(
    config: &TelemetryConfig,
    resource: Resource,
) -> Result<SdkMeterProvider, TelemetryError> {
    let Some(endpoint) = config.otel_endpoint.as_deref() else {
        // Manual reader: metrics are recorded but not exported.
        let reader = ManualReader::builder().build();
        return Ok(SdkMeterProvider::builder()
            .with_reader(reader)
            .with_resource(resource)
            .build());
    };

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .with_protocol(Protocol::Grpc);

    let provider = opentelemetry_otlp::new_pipeline()
        .metrics(runtime::Tokio)
        .with_exporter(exporter)
        .with_resource(resource)
        .with_period(Duration::from_secs(config.export_interval_secs))
        .build()
        .map_err(|e| TelemetryError::Exporter(format!("metrics: {e}")))?;

    Ok(provider)
}
