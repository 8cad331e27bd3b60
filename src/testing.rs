//! In-memory test doubles for the meter and tracer seams.
//!
//! [`RecordingMeter`] captures every value recorded through the registry and
//! can run gauge callbacks on demand. [`RecordingSpanSource`] captures finished
//! spans and can be switched to decline new spans, as a sampled-out tracer
//! would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use opentelemetry::trace::{SpanKind, Status};
use opentelemetry::KeyValue;

use crate::error::TelemetryError;
use crate::metrics::{
    GaugeCallback, InstrumentDescriptor, InstrumentKind, Measurement, MeterBackend, MetricValue,
    ObservableInstrument, SyncInstrument,
};
use crate::trace::{SpanRecorder, SpanSource};

/// A measurement captured by [`RecordingMeter`].
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedMeasurement {
    pub kind: InstrumentKind,
    pub instrument: String,
    pub measurement: Measurement,
}

#[derive(Default)]
struct MeterState {
    created: Vec<(InstrumentKind, InstrumentDescriptor)>,
    recorded: Vec<RecordedMeasurement>,
    gauges: Vec<(String, GaugeCallback)>,
}

/// Meter double that keeps everything in memory.
#[derive(Clone, Default)]
pub struct RecordingMeter {
    state: Arc<Mutex<MeterState>>,
}

impl RecordingMeter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MeterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Instruments created through this meter, in creation order.
    pub fn created(&self) -> Vec<(InstrumentKind, InstrumentDescriptor)> {
        self.lock().created.clone()
    }

    /// Every value recorded against any instrument.
    pub fn recorded(&self) -> Vec<RecordedMeasurement> {
        self.lock().recorded.clone()
    }

    /// Values recorded against the instrument called `name`.
    pub fn measurements(&self, name: &str) -> Vec<Measurement> {
        self.lock()
            .recorded
            .iter()
            .filter(|r| r.instrument == name)
            .map(|r| r.measurement.clone())
            .collect()
    }

    /// Sum of all counter increments recorded for `name`, as `f64`.
    pub fn counter_total(&self, name: &str) -> f64 {
        self.lock()
            .recorded
            .iter()
            .filter(|r| r.kind == InstrumentKind::Counter && r.instrument == name)
            .map(|r| match r.measurement.value {
                MetricValue::U64(v) => v as f64,
                MetricValue::I64(v) => v as f64,
                MetricValue::F64(v) => v,
            })
            .sum()
    }

    /// Run every gauge callback once, as a collection cycle would.
    pub fn collect_gauges(&self) -> Vec<(String, Measurement)> {
        // Callbacks run outside the lock; they may touch the registry.
        let gauges: Vec<_> = self.lock().gauges.clone();
        gauges
            .into_iter()
            .flat_map(|(name, callback)| {
                callback()
                    .into_iter()
                    .map(move |m| (name.clone(), m))
            })
            .collect()
    }

    fn sync_instrument(
        &self,
        kind: InstrumentKind,
        descriptor: &InstrumentDescriptor,
    ) -> Box<dyn SyncInstrument> {
        self.lock().created.push((kind, descriptor.clone()));
        Box::new(RecordingInstrument {
            kind,
            name: descriptor.name.clone(),
            state: Arc::clone(&self.state),
        })
    }
}

impl MeterBackend for RecordingMeter {
    fn counter(
        &self,
        descriptor: &InstrumentDescriptor,
    ) -> Result<Box<dyn SyncInstrument>, TelemetryError> {
        Ok(self.sync_instrument(InstrumentKind::Counter, descriptor))
    }

    fn histogram(
        &self,
        descriptor: &InstrumentDescriptor,
    ) -> Result<Box<dyn SyncInstrument>, TelemetryError> {
        Ok(self.sync_instrument(InstrumentKind::Histogram, descriptor))
    }

    fn observable_gauge(
        &self,
        descriptor: &InstrumentDescriptor,
        callback: GaugeCallback,
    ) -> Result<Box<dyn ObservableInstrument>, TelemetryError> {
        let mut state = self.lock();
        state
            .created
            .push((InstrumentKind::ObservableGauge, descriptor.clone()));
        state.gauges.push((descriptor.name.clone(), callback));
        Ok(Box::new(RecordingGauge))
    }
}

struct RecordingInstrument {
    kind: InstrumentKind,
    name: String,
    state: Arc<Mutex<MeterState>>,
}

impl SyncInstrument for RecordingInstrument {
    fn record(&self, value: MetricValue, attributes: &[KeyValue]) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recorded
            .push(RecordedMeasurement {
                kind: self.kind,
                instrument: self.name.clone(),
                measurement: Measurement {
                    value,
                    attributes: attributes.to_vec(),
                },
            });
    }
}

struct RecordingGauge;

impl ObservableInstrument for RecordingGauge {}

/// An event captured on a [`FinishedSpan`].
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedEvent {
    pub name: String,
    pub attributes: Vec<KeyValue>,
}

impl RecordedEvent {
    pub fn attribute(&self, key: &str) -> Option<String> {
        find_attribute(&self.attributes, key)
    }
}

fn find_attribute(attributes: &[KeyValue], key: &str) -> Option<String> {
    attributes
        .iter()
        .rev()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.as_str().into_owned())
}

/// A span captured by [`RecordingSpanSource`] once it ended.
#[derive(Clone, Debug, PartialEq)]
pub struct FinishedSpan {
    pub name: String,
    pub kind: SpanKind,
    pub attributes: Vec<KeyValue>,
    pub events: Vec<RecordedEvent>,
    pub status: Status,
}

impl FinishedSpan {
    /// Value of the attribute called `key`, rendered as a string.
    pub fn attribute(&self, key: &str) -> Option<String> {
        find_attribute(&self.attributes, key)
    }
}

/// Tracer double that records finished spans in memory.
#[derive(Clone)]
pub struct RecordingSpanSource {
    sampled: Arc<AtomicBool>,
    started: Arc<Mutex<usize>>,
    finished: Arc<Mutex<Vec<FinishedSpan>>>,
}

impl Default for RecordingSpanSource {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSpanSource {
    pub fn new() -> Self {
        Self {
            sampled: Arc::new(AtomicBool::new(true)),
            started: Arc::new(Mutex::new(0)),
            finished: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A source that declines every span.
    pub fn sampled_out() -> Self {
        let source = Self::new();
        source.set_sampled(false);
        source
    }

    pub fn set_sampled(&self, sampled: bool) {
        self.sampled.store(sampled, Ordering::SeqCst);
    }

    /// Number of spans handed out so far.
    pub fn started(&self) -> usize {
        *self.started.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn finished_spans(&self) -> Vec<FinishedSpan> {
        self.finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SpanSource for RecordingSpanSource {
    fn start(&self, name: &str, kind: SpanKind) -> Option<Box<dyn SpanRecorder>> {
        if !self.sampled.load(Ordering::SeqCst) {
            return None;
        }
        *self.started.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Some(Box::new(RecordingSpan {
            data: FinishedSpan {
                name: name.to_owned(),
                kind,
                attributes: Vec::new(),
                events: Vec::new(),
                status: Status::Unset,
            },
            ended: false,
            sink: Arc::clone(&self.finished),
        }))
    }
}

struct RecordingSpan {
    data: FinishedSpan,
    ended: bool,
    sink: Arc<Mutex<Vec<FinishedSpan>>>,
}

impl SpanRecorder for RecordingSpan {
    fn set_attribute(&mut self, attribute: KeyValue) {
        self.data.attributes.push(attribute);
    }

    fn add_event(&mut self, name: String, attributes: Vec<KeyValue>) {
        self.data.events.push(RecordedEvent { name, attributes });
    }

    fn set_status(&mut self, status: Status) {
        self.data.status = status;
    }

    fn end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.data.clone());
    }
}
