//! Instrument registry.
//!
//! [`MetricsManager`] keeps three name-keyed catalogs (counters, histograms,
//! observable gauges) layered over a single meter:
//! - an instrument is declared once per catalog and then recorded by name
//! - the numeric kind is fixed at declaration and checked on every record
//! - descriptors are listed in declaration order

mod backend;
mod instrument;

pub use backend::{GaugeCallback, MeterBackend, ObservableInstrument, OtelMeterBackend, SyncInstrument};
pub use instrument::{
    InstrumentDescriptor, InstrumentKind, Measurement, MetricNumber, MetricValue, NumberKind,
    Observation,
};

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use opentelemetry::metrics::Meter;
use opentelemetry::KeyValue;

use crate::error::TelemetryError;

struct Entry<H> {
    number: NumberKind,
    handle: H,
}

struct CatalogState<H> {
    entries: HashMap<String, Entry<H>>,
    declared: Vec<InstrumentDescriptor>,
}

/// One name-keyed catalog. The map and the ordered descriptor list share a
/// lock so they never disagree.
struct Catalog<H> {
    kind: InstrumentKind,
    state: RwLock<CatalogState<H>>,
}

impl<H> Catalog<H> {
    fn new(kind: InstrumentKind) -> Self {
        Self {
            kind,
            state: RwLock::new(CatalogState {
                entries: HashMap::new(),
                declared: Vec::new(),
            }),
        }
    }

    fn declare(
        &self,
        descriptor: InstrumentDescriptor,
        create: impl FnOnce(&InstrumentDescriptor) -> Result<H, TelemetryError>,
    ) -> Result<(), TelemetryError> {
        validate_name(&descriptor.name)?;
        if !self.kind.supports(descriptor.number) {
            return Err(TelemetryError::UnsupportedKind {
                kind: self.kind,
                number: descriptor.number,
            });
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.entries.contains_key(&descriptor.name) {
            return Err(TelemetryError::AlreadyExists {
                kind: self.kind,
                name: descriptor.name,
            });
        }

        let handle = create(&descriptor)?;
        tracing::debug!(
            instrument = %self.kind,
            name = %descriptor.name,
            number = %descriptor.number,
            "Instrument declared"
        );
        state.entries.insert(
            descriptor.name.clone(),
            Entry {
                number: descriptor.number,
                handle,
            },
        );
        state.declared.push(descriptor);
        Ok(())
    }

    fn list(&self) -> Vec<InstrumentDescriptor> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .declared
            .clone()
    }
}

impl Catalog<Box<dyn SyncInstrument>> {
    fn record(
        &self,
        name: &str,
        value: MetricValue,
        attributes: &[KeyValue],
    ) -> Result<(), TelemetryError> {
        validate_name(name)?;

        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let entry = state
            .entries
            .get(name)
            .ok_or_else(|| TelemetryError::NotFound {
                kind: self.kind,
                name: name.to_owned(),
            })?;

        if entry.number != value.kind() {
            return Err(TelemetryError::KindMismatch {
                kind: self.kind,
                name: name.to_owned(),
                declared: entry.number,
                recorded: value.kind(),
            });
        }

        entry.handle.record(value, attributes);
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<(), TelemetryError> {
    if name.trim().is_empty() {
        return Err(TelemetryError::empty_name());
    }
    Ok(())
}

/// Per-process registry of named metric instruments.
pub struct MetricsManager {
    backend: Arc<dyn MeterBackend>,
    counters: Catalog<Box<dyn SyncInstrument>>,
    histograms: Catalog<Box<dyn SyncInstrument>>,
    observable_gauges: Catalog<Box<dyn ObservableInstrument>>,
}

impl MetricsManager {
    /// Create a registry over any meter backend.
    pub fn new(backend: Arc<dyn MeterBackend>) -> Self {
        Self {
            backend,
            counters: Catalog::new(InstrumentKind::Counter),
            histograms: Catalog::new(InstrumentKind::Histogram),
            observable_gauges: Catalog::new(InstrumentKind::ObservableGauge),
        }
    }

    /// Create a registry over an OpenTelemetry meter.
    pub fn from_meter(meter: Meter) -> Self {
        Self::new(Arc::new(OtelMeterBackend::new(meter)))
    }

    /// Declare a counter with numeric type `T` (`u64` or `f64`).
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty name, `AlreadyExists` if a counter with
    /// this name was already declared, `UnsupportedKind` for `i64`.
    pub fn create_counter<T: MetricNumber>(
        &self,
        name: &str,
        unit: Option<&str>,
        description: Option<&str>,
    ) -> Result<(), TelemetryError> {
        let descriptor = InstrumentDescriptor::new(name, unit, description, T::KIND);
        self.counters
            .declare(descriptor, |d| self.backend.counter(d))
    }

    /// Add `delta` to a declared counter, with optional tags.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty name, `NotFound` if no counter has this
    /// name, `KindMismatch` if `T` differs from the declared type.
    pub fn increment_counter<T: MetricNumber>(
        &self,
        name: &str,
        delta: T,
        tags: &[KeyValue],
    ) -> Result<(), TelemetryError> {
        self.counters.record(name, delta.into_value(), tags)
    }

    /// Declared counters in declaration order.
    pub fn counters(&self) -> Vec<InstrumentDescriptor> {
        self.counters.list()
    }

    /// Declare a histogram with numeric type `T` (`u64` or `f64`).
    pub fn create_histogram<T: MetricNumber>(
        &self,
        name: &str,
        unit: Option<&str>,
        description: Option<&str>,
    ) -> Result<(), TelemetryError> {
        let descriptor = InstrumentDescriptor::new(name, unit, description, T::KIND);
        self.histograms
            .declare(descriptor, |d| self.backend.histogram(d))
    }

    /// Record `value` into a declared histogram, with optional tags.
    pub fn record_histogram<T: MetricNumber>(
        &self,
        name: &str,
        value: T,
        tags: &[KeyValue],
    ) -> Result<(), TelemetryError> {
        self.histograms.record(name, value.into_value(), tags)
    }

    /// Declared histograms in declaration order.
    pub fn histograms(&self) -> Vec<InstrumentDescriptor> {
        self.histograms.list()
    }

    /// Declare an observable gauge whose values come from `observe`.
    ///
    /// The callback runs on every collection cycle of the underlying meter;
    /// gauges have no direct record operation.
    pub fn create_observable_gauge<T, F>(
        &self,
        name: &str,
        observe: F,
        unit: Option<&str>,
        description: Option<&str>,
    ) -> Result<(), TelemetryError>
    where
        T: MetricNumber,
        F: Fn() -> Vec<Observation<T>> + Send + Sync + 'static,
    {
        let descriptor = InstrumentDescriptor::new(name, unit, description, T::KIND);
        let callback: GaugeCallback = Arc::new(move || {
            observe()
                .into_iter()
                .map(Observation::into_measurement)
                .collect()
        });
        self.observable_gauges
            .declare(descriptor, |d| self.backend.observable_gauge(d, callback))
    }

    /// Declared observable gauges in declaration order.
    pub fn observable_gauges(&self) -> Vec<InstrumentDescriptor> {
        self.observable_gauges.list()
    }
}

impl std::fmt::Debug for MetricsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsManager")
            .field("counters", &self.counters())
            .field("histograms", &self.histograms())
            .field("observable_gauges", &self.observable_gauges())
            .finish_non_exhaustive()
    }
}
