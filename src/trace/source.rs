//! Tracer seam between the activity wrapper and the OpenTelemetry SDK.

use opentelemetry::trace::{Span as _, SpanKind, Status, Tracer};
use opentelemetry::KeyValue;

/// Starts spans for scoped activities.
pub trait SpanSource: Send + Sync {
    /// Start a span, or return `None` when the tracer declines to record it
    /// (for example because it was sampled out).
    fn start(&self, name: &str, kind: SpanKind) -> Option<Box<dyn SpanRecorder>>;
}

/// Object-safe view of a live span.
pub trait SpanRecorder: Send + Sync {
    fn set_attribute(&mut self, attribute: KeyValue);

    fn add_event(&mut self, name: String, attributes: Vec<KeyValue>);

    fn set_status(&mut self, status: Status);

    fn end(&mut self);
}

/// [`SpanSource`] over any OpenTelemetry tracer.
///
/// Non-recording spans are treated as declined.
#[derive(Clone, Debug)]
pub struct OtelSpanSource<T> {
    tracer: T,
}

impl<T> OtelSpanSource<T> {
    pub fn new(tracer: T) -> Self {
        Self { tracer }
    }
}

impl<T> SpanSource for OtelSpanSource<T>
where
    T: Tracer + Send + Sync,
    T::Span: Send + Sync + 'static,
{
    fn start(&self, name: &str, kind: SpanKind) -> Option<Box<dyn SpanRecorder>> {
        let span = self
            .tracer
            .span_builder(name.to_owned())
            .with_kind(kind)
            .start(&self.tracer);

        if !span.is_recording() {
            return None;
        }
        Some(Box::new(OtelSpan(span)))
    }
}

struct OtelSpan<S>(S);

impl<S> SpanRecorder for OtelSpan<S>
where
    S: opentelemetry::trace::Span + Send + Sync,
{
    fn set_attribute(&mut self, attribute: KeyValue) {
        self.0.set_attribute(attribute);
    }

    fn add_event(&mut self, name: String, attributes: Vec<KeyValue>) {
        self.0.add_event(name, attributes);
    }

    fn set_status(&mut self, status: Status) {
        self.0.set_status(status);
    }

    fn end(&mut self) {
        self.0.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::trace::{Config, Sampler, TracerProvider};

    fn source(
        sampler: Sampler,
    ) -> (TracerProvider, OtelSpanSource<opentelemetry_sdk::trace::Tracer>) {
        let provider = TracerProvider::builder()
            .with_config(Config::default().with_sampler(sampler))
            .build();
        let source = OtelSpanSource::new(provider.tracer("beacon-test"));
        (provider, source)
    }

    #[test]
    fn test_sampled_span_is_started() {
        let (_provider, source) = source(Sampler::AlwaysOn);
        let mut span = source
            .start("ProcessOrder", SpanKind::Internal)
            .expect("span should be recording");
        span.set_attribute(KeyValue::new("tenant.id", "t1"));
        span.set_status(Status::Ok);
        span.end();
    }

    #[test]
    fn test_sampled_out_span_is_declined() {
        let (_provider, source) = source(Sampler::AlwaysOff);
        assert!(source.start("ProcessOrder", SpanKind::Server).is_none());
    }
}
