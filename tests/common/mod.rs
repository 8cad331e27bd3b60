//! Shared fixtures for integration tests.
//!
//! Provides:
//! - Registry and activity wrapper wired to in-memory doubles
//! - A handler error type with a plain message

#![allow(dead_code)]

use std::sync::Arc;

use beacon::testing::{RecordingMeter, RecordingSpanSource};
use beacon::{ActivityContext, MetricsManager, TraceManager};
use thiserror::Error;
use uuid::Uuid;

/// Error raised by test handlers.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{0}")]
pub struct ValueError(pub String);

/// Registry over a [`RecordingMeter`].
pub struct MetricsFixture {
    pub metrics: MetricsManager,
    pub meter: RecordingMeter,
}

impl MetricsFixture {
    pub fn new() -> Self {
        let meter = RecordingMeter::new();
        let metrics = MetricsManager::new(Arc::new(meter.clone()));
        Self { metrics, meter }
    }
}

/// Activity wrapper over a [`RecordingSpanSource`].
pub struct TraceFixture {
    pub traces: TraceManager,
    pub source: RecordingSpanSource,
}

impl TraceFixture {
    pub fn new() -> Self {
        let source = RecordingSpanSource::new();
        let traces = TraceManager::new(Arc::new(source.clone()));
        Self { traces, source }
    }

    pub fn sampled_out() -> Self {
        let fixture = Self::new();
        fixture.source.set_sampled(false);
        fixture
    }
}

/// Deterministic context: correlation `C1`, tenant `T1`.
pub fn context() -> ActivityContext {
    ActivityContext::new(Uuid::from_u128(0xC1), Uuid::from_u128(0x71))
}
