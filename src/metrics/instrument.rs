//! Instrument descriptors and the numeric value model.
//!
//! Every catalog entry remembers the [`NumberKind`] it was declared with, and
//! every recorded value travels as a [`MetricValue`]. Recording a value of a
//! different kind is rejected instead of being reinterpreted.

use std::fmt;

use opentelemetry::KeyValue;
use serde::Serialize;

/// The three instrument catalogs kept by the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    /// Monotonic sum of pushed increments
    Counter,
    /// Distribution of pushed values
    Histogram,
    /// Last value reported by a callback on each collection
    ObservableGauge,
}

impl InstrumentKind {
    /// Whether the SDK offers this instrument for the given numeric kind.
    pub fn supports(self, number: NumberKind) -> bool {
        match self {
            Self::Counter | Self::Histogram => {
                matches!(number, NumberKind::U64 | NumberKind::F64)
            }
            Self::ObservableGauge => true,
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Counter => "Counter",
            Self::Histogram => "Histogram",
            Self::ObservableGauge => "Observable gauge",
        })
    }
}

/// Numeric representation chosen when an instrument is declared.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberKind {
    /// Unsigned 64-bit integer
    U64,
    /// Signed 64-bit integer (observable gauges only)
    I64,
    /// 64-bit float
    F64,
}

impl fmt::Display for NumberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::U64 => "u64",
            Self::I64 => "i64",
            Self::F64 => "f64",
        })
    }
}

/// A single measurement value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MetricValue {
    U64(u64),
    I64(i64),
    F64(f64),
}

impl MetricValue {
    /// The numeric kind carried by this value.
    pub fn kind(&self) -> NumberKind {
        match self {
            Self::U64(_) => NumberKind::U64,
            Self::I64(_) => NumberKind::I64,
            Self::F64(_) => NumberKind::F64,
        }
    }
}

mod private {
    pub trait Sealed {}
    impl Sealed for u64 {}
    impl Sealed for i64 {}
    impl Sealed for f64 {}
}

/// Numeric types that can back an instrument.
///
/// Sealed: the registry only knows how to dispatch `u64`, `i64` and `f64`.
pub trait MetricNumber: Copy + Send + Sync + 'static + private::Sealed {
    /// Kind recorded on the catalog entry at declaration.
    const KIND: NumberKind;

    /// Wrap the number for dispatch to the backend.
    fn into_value(self) -> MetricValue;
}

impl MetricNumber for u64 {
    const KIND: NumberKind = NumberKind::U64;

    fn into_value(self) -> MetricValue {
        MetricValue::U64(self)
    }
}

impl MetricNumber for i64 {
    const KIND: NumberKind = NumberKind::I64;

    fn into_value(self) -> MetricValue {
        MetricValue::I64(self)
    }
}

impl MetricNumber for f64 {
    const KIND: NumberKind = NumberKind::F64;

    fn into_value(self) -> MetricValue {
        MetricValue::F64(self)
    }
}

/// Immutable record of a declared instrument, kept for introspection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InstrumentDescriptor {
    /// Unique name within its catalog
    pub name: String,
    /// UCUM unit (e.g. `s`, `By`, `1`), if given at declaration
    pub unit: Option<String>,
    /// Human-readable description, if given at declaration
    pub description: Option<String>,
    /// Numeric kind every recorded value must match
    pub number: NumberKind,
}

impl InstrumentDescriptor {
    pub(crate) fn new(
        name: &str,
        unit: Option<&str>,
        description: Option<&str>,
        number: NumberKind,
    ) -> Self {
        Self {
            name: name.to_owned(),
            unit: unit.map(str::to_owned),
            description: description.map(str::to_owned),
            number,
        }
    }
}

/// One value reported by an observable gauge callback.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation<T> {
    /// Observed value
    pub value: T,
    /// Attributes identifying the observed series
    pub attributes: Vec<KeyValue>,
}

impl<T: MetricNumber> Observation<T> {
    /// An observation without attributes.
    pub fn new(value: T) -> Self {
        Self {
            value,
            attributes: Vec::new(),
        }
    }

    /// An observation for the series identified by `attributes`.
    pub fn with_attributes(value: T, attributes: Vec<KeyValue>) -> Self {
        Self { value, attributes }
    }

    pub(crate) fn into_measurement(self) -> Measurement {
        Measurement {
            value: self.value.into_value(),
            attributes: self.attributes,
        }
    }
}

/// Type-erased observation handed to a [`MeterBackend`](super::MeterBackend).
#[derive(Clone, Debug, PartialEq)]
pub struct Measurement {
    /// Value tagged with its numeric kind
    pub value: MetricValue,
    /// Attributes identifying the series
    pub attributes: Vec<KeyValue>,
}
