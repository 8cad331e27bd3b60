//! Meter seam between the registry and the OpenTelemetry SDK.

use std::sync::Arc;

use opentelemetry::metrics::{Counter, Histogram, Meter, ObservableGauge};
use opentelemetry::KeyValue;

use super::instrument::{InstrumentDescriptor, InstrumentKind, Measurement, MetricValue, NumberKind};
use crate::error::TelemetryError;

/// Callback polled by the SDK on every collection cycle of an observable gauge.
pub type GaugeCallback = Arc<dyn Fn() -> Vec<Measurement> + Send + Sync>;

/// Creates the underlying instruments for the registry.
///
/// The registry has already validated the name and the numeric kind when
/// these methods run.
pub trait MeterBackend: Send + Sync {
    fn counter(
        &self,
        descriptor: &InstrumentDescriptor,
    ) -> Result<Box<dyn SyncInstrument>, TelemetryError>;

    fn histogram(
        &self,
        descriptor: &InstrumentDescriptor,
    ) -> Result<Box<dyn SyncInstrument>, TelemetryError>;

    fn observable_gauge(
        &self,
        descriptor: &InstrumentDescriptor,
        callback: GaugeCallback,
    ) -> Result<Box<dyn ObservableInstrument>, TelemetryError>;
}

/// An instrument that accepts values pushed by the application.
pub trait SyncInstrument: Send + Sync {
    fn record(&self, value: MetricValue, attributes: &[KeyValue]);
}

/// Handle keeping an asynchronous instrument registered with its meter.
pub trait ObservableInstrument: Send + Sync {}

/// [`MeterBackend`] over an OpenTelemetry [`Meter`].
#[derive(Clone, Debug)]
pub struct OtelMeterBackend {
    meter: Meter,
}

impl OtelMeterBackend {
    pub fn new(meter: Meter) -> Self {
        Self { meter }
    }
}

fn unsupported(kind: InstrumentKind, number: NumberKind) -> TelemetryError {
    TelemetryError::UnsupportedKind { kind, number }
}

impl MeterBackend for OtelMeterBackend {
    fn counter(
        &self,
        descriptor: &InstrumentDescriptor,
    ) -> Result<Box<dyn SyncInstrument>, TelemetryError> {
        let d = descriptor.clone();
        let counter = match descriptor.number {
            NumberKind::U64 => {
                let mut builder = self.meter.u64_counter(d.name);
                if let Some(unit) = d.unit {
                    builder = builder.with_unit(unit);
                }
                if let Some(description) = d.description {
                    builder = builder.with_description(description);
                }
                OtelCounter::U64(builder.init())
            }
            NumberKind::F64 => {
                let mut builder = self.meter.f64_counter(d.name);
                if let Some(unit) = d.unit {
                    builder = builder.with_unit(unit);
                }
                if let Some(description) = d.description {
                    builder = builder.with_description(description);
                }
                OtelCounter::F64(builder.init())
            }
            NumberKind::I64 => return Err(unsupported(InstrumentKind::Counter, NumberKind::I64)),
        };
        Ok(Box::new(counter))
    }

    fn histogram(
        &self,
        descriptor: &InstrumentDescriptor,
    ) -> Result<Box<dyn SyncInstrument>, TelemetryError> {
        let d = descriptor.clone();
        let histogram = match descriptor.number {
            NumberKind::U64 => {
                let mut builder = self.meter.u64_histogram(d.name);
                if let Some(unit) = d.unit {
                    builder = builder.with_unit(unit);
                }
                if let Some(description) = d.description {
                    builder = builder.with_description(description);
                }
                OtelHistogram::U64(builder.init())
            }
            NumberKind::F64 => {
                let mut builder = self.meter.f64_histogram(d.name);
                if let Some(unit) = d.unit {
                    builder = builder.with_unit(unit);
                }
                if let Some(description) = d.description {
                    builder = builder.with_description(description);
                }
                OtelHistogram::F64(builder.init())
            }
            NumberKind::I64 => {
                return Err(unsupported(InstrumentKind::Histogram, NumberKind::I64))
            }
        };
        Ok(Box::new(histogram))
    }

    fn observable_gauge(
        &self,
        descriptor: &InstrumentDescriptor,
        callback: GaugeCallback,
    ) -> Result<Box<dyn ObservableInstrument>, TelemetryError> {
        let d = descriptor.clone();
        let gauge = match descriptor.number {
            NumberKind::U64 => {
                let mut builder = self
                    .meter
                    .u64_observable_gauge(d.name)
                    .with_callback(move |observer| {
                        for m in callback() {
                            if let MetricValue::U64(v) = m.value {
                                observer.observe(v, &m.attributes);
                            }
                        }
                    });
                if let Some(unit) = d.unit {
                    builder = builder.with_unit(unit);
                }
                if let Some(description) = d.description {
                    builder = builder.with_description(description);
                }
                OtelGauge::U64(builder.init())
            }
            NumberKind::I64 => {
                let mut builder = self
                    .meter
                    .i64_observable_gauge(d.name)
                    .with_callback(move |observer| {
                        for m in callback() {
                            if let MetricValue::I64(v) = m.value {
                                observer.observe(v, &m.attributes);
                            }
                        }
                    });
                if let Some(unit) = d.unit {
                    builder = builder.with_unit(unit);
                }
                if let Some(description) = d.description {
                    builder = builder.with_description(description);
                }
                OtelGauge::I64(builder.init())
            }
            NumberKind::F64 => {
                let mut builder = self
                    .meter
                    .f64_observable_gauge(d.name)
                    .with_callback(move |observer| {
                        for m in callback() {
                            if let MetricValue::F64(v) = m.value {
                                observer.observe(v, &m.attributes);
                            }
                        }
                    });
                if let Some(unit) = d.unit {
                    builder = builder.with_unit(unit);
                }
                if let Some(description) = d.description {
                    builder = builder.with_description(description);
                }
                OtelGauge::F64(builder.init())
            }
        };
        Ok(Box::new(gauge))
    }
}

enum OtelCounter {
    U64(Counter<u64>),
    F64(Counter<f64>),
}

impl SyncInstrument for OtelCounter {
    fn record(&self, value: MetricValue, attributes: &[KeyValue]) {
        match (self, value) {
            (Self::U64(c), MetricValue::U64(v)) => c.add(v, attributes),
            (Self::F64(c), MetricValue::F64(v)) => c.add(v, attributes),
            (_, other) => {
                tracing::warn!(value = ?other, "Dropping counter value of mismatched kind");
            }
        }
    }
}

enum OtelHistogram {
    U64(Histogram<u64>),
    F64(Histogram<f64>),
}

impl SyncInstrument for OtelHistogram {
    fn record(&self, value: MetricValue, attributes: &[KeyValue]) {
        match (self, value) {
            (Self::U64(h), MetricValue::U64(v)) => h.record(v, attributes),
            (Self::F64(h), MetricValue::F64(v)) => h.record(v, attributes),
            (_, other) => {
                tracing::warn!(value = ?other, "Dropping histogram value of mismatched kind");
            }
        }
    }
}

// Held only so the gauge stays registered for the registry's lifetime.
#[allow(dead_code)]
enum OtelGauge {
    U64(ObservableGauge<u64>),
    I64(ObservableGauge<i64>),
    F64(ObservableGauge<f64>),
}

impl ObservableInstrument for OtelGauge {}
