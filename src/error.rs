//! Error types for instrument registration and telemetry setup.

use thiserror::Error;

use crate::metrics::{InstrumentKind, NumberKind};

/// Error type for registry, configuration and provider operations.
///
/// Failures raised by handlers wrapped in a scoped activity are not
/// represented here; they are returned to the caller unchanged.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TelemetryError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{kind} already exists [name:{name}]")]
    AlreadyExists { kind: InstrumentKind, name: String },

    #[error("{kind} not found [name:{name}]")]
    NotFound { kind: InstrumentKind, name: String },

    #[error("{kind} [name:{name}] was declared as {declared}, cannot record {recorded}")]
    KindMismatch {
        kind: InstrumentKind,
        name: String,
        declared: NumberKind,
        recorded: NumberKind,
    },

    #[error("{kind} does not support {number} values")]
    UnsupportedKind {
        kind: InstrumentKind,
        number: NumberKind,
    },

    #[error("Failed to build exporter pipeline: {0}")]
    Exporter(String),

    #[error("Failed to shut down telemetry providers: {0}")]
    Shutdown(String),
}

impl TelemetryError {
    pub(crate) fn empty_name() -> Self {
        Self::InvalidArgument("instrument name must not be empty".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_instrument() {
        let err = TelemetryError::AlreadyExists {
            kind: InstrumentKind::Counter,
            name: "requests_total".into(),
        };
        assert_eq!(err.to_string(), "Counter already exists [name:requests_total]");

        let err = TelemetryError::NotFound {
            kind: InstrumentKind::ObservableGauge,
            name: "queue_depth".into(),
        };
        assert_eq!(
            err.to_string(),
            "Observable gauge not found [name:queue_depth]"
        );
    }
}
