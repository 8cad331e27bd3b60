//! Scoped activity tracing.
//!
//! [`TraceManager`] wraps a unit of work in an activity:
//! - the span is started, tagged with the [`ActivityContext`] and marked `Ok`
//! - the handler runs with the activity (and input, and a cancellation token
//!   for the async shapes)
//! - a failing handler marks the activity `Error`, records an exception event
//!   and gets its error back unchanged; a panicking handler is recorded the
//!   same way before the panic resumes
//! - the span ends on every exit path
//!
//! When the tracer declines the span the handler is not run at all.

mod activity;
mod source;

pub use activity::{
    Activity, ActivityContext, ActivityStatus, CORRELATION_ID_TAG, EXCEPTION_EVENT,
    EXCEPTION_MESSAGE_ATTR, EXCEPTION_TYPE_ATTR, EXECUTION_USER_TAG, PANIC_EXCEPTION_TYPE,
    SOURCE_PLATFORM_TAG, TENANT_ID_TAG,
};
pub use opentelemetry::trace::SpanKind;
pub use source::{OtelSpanSource, SpanRecorder, SpanSource};

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use opentelemetry::trace::Tracer;
use tokio_util::sync::CancellationToken;

use activity::ActivityScope;

/// Runs handlers inside traced activities.
#[derive(Clone)]
pub struct TraceManager {
    source: Arc<dyn SpanSource>,
}

impl TraceManager {
    pub fn new(source: Arc<dyn SpanSource>) -> Self {
        Self { source }
    }

    /// Create a manager over an OpenTelemetry tracer.
    pub fn from_tracer<T>(tracer: T) -> Self
    where
        T: Tracer + Send + Sync + 'static,
        T::Span: Send + Sync + 'static,
    {
        Self::new(Arc::new(OtelSpanSource::new(tracer)))
    }

    fn begin(&self, name: &str, kind: SpanKind, context: &ActivityContext) -> Option<ActivityScope> {
        let Some(span) = self.source.start(name, kind) else {
            tracing::trace!(activity = name, "Activity not sampled, skipping handler");
            return None;
        };
        Some(ActivityScope::enter(Activity::new(name, span), context))
    }

    /// Run a synchronous handler inside an activity.
    ///
    /// Returns `Ok(None)` without calling `handler` when the tracer declines
    /// the activity. A handler error is recorded on the activity and returned
    /// unchanged.
    pub fn run_scoped<I, O, E, F>(
        &self,
        name: &str,
        kind: SpanKind,
        context: &ActivityContext,
        input: I,
        handler: F,
    ) -> Result<Option<O>, E>
    where
        F: FnOnce(I, &Activity) -> Result<O, E>,
        E: fmt::Display,
    {
        let Some(scope) = self.begin(name, kind, context) else {
            return Ok(None);
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(input, scope.activity())));
        match outcome {
            Ok(result) => scope.finish(result, false).map(Some),
            Err(payload) => scope.panicked(payload),
        }
    }

    /// Run an asynchronous handler inside an activity.
    ///
    /// The activity stays open until the handler's future resolves. If the
    /// handler fails after `cancel` fired, the activity ends `Cancelled`; if
    /// the returned future is dropped early, it ends `Cancelled` as well.
    pub async fn run_scoped_async<I, O, E, F, Fut>(
        &self,
        name: &str,
        kind: SpanKind,
        context: &ActivityContext,
        input: I,
        cancel: CancellationToken,
        handler: F,
    ) -> Result<Option<O>, E>
    where
        F: FnOnce(I, Activity, CancellationToken) -> Fut,
        Fut: Future<Output = Result<O, E>>,
        E: fmt::Display,
    {
        let Some(scope) = self.begin(name, kind, context) else {
            return Ok(None);
        };
        let pending = handler(input, scope.activity().clone(), cancel.clone());
        match AssertUnwindSafe(pending).catch_unwind().await {
            Ok(result) => scope.finish(result, cancel.is_cancelled()).map(Some),
            Err(payload) => scope.panicked(payload),
        }
    }

    pub fn start_activity<E, F>(
        &self,
        name: &str,
        kind: SpanKind,
        context: &ActivityContext,
        handler: F,
    ) -> Result<(), E>
    where
        F: FnOnce(&Activity) -> Result<(), E>,
        E: fmt::Display,
    {
        self.run_scoped(name, kind, context, (), |(), activity| handler(activity))
            .map(|_| ())
    }

    pub fn start_activity_with_input<I, E, F>(
        &self,
        name: &str,
        kind: SpanKind,
        context: &ActivityContext,
        input: I,
        handler: F,
    ) -> Result<(), E>
    where
        F: FnOnce(I, &Activity) -> Result<(), E>,
        E: fmt::Display,
    {
        self.run_scoped(name, kind, context, input, handler)
            .map(|_| ())
    }

    /// Returns `Ok(None)` when the activity was not sampled.
    pub fn start_activity_with_output<I, O, E, F>(
        &self,
        name: &str,
        kind: SpanKind,
        context: &ActivityContext,
        input: I,
        handler: F,
    ) -> Result<Option<O>, E>
    where
        F: FnOnce(I, &Activity) -> Result<O, E>,
        E: fmt::Display,
    {
        self.run_scoped(name, kind, context, input, handler)
    }

    pub async fn start_activity_async<E, F, Fut>(
        &self,
        name: &str,
        kind: SpanKind,
        context: &ActivityContext,
        cancel: CancellationToken,
        handler: F,
    ) -> Result<(), E>
    where
        F: FnOnce(Activity, CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: fmt::Display,
    {
        self.run_scoped_async(name, kind, context, (), cancel, |(), activity, cancel| {
            handler(activity, cancel)
        })
        .await
        .map(|_| ())
    }

    pub async fn start_activity_async_with_input<I, E, F, Fut>(
        &self,
        name: &str,
        kind: SpanKind,
        context: &ActivityContext,
        input: I,
        cancel: CancellationToken,
        handler: F,
    ) -> Result<(), E>
    where
        F: FnOnce(I, Activity, CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: fmt::Display,
    {
        self.run_scoped_async(name, kind, context, input, cancel, handler)
            .await
            .map(|_| ())
    }

    /// Returns `Ok(None)` when the activity was not sampled.
    pub async fn start_activity_async_with_output<I, O, E, F, Fut>(
        &self,
        name: &str,
        kind: SpanKind,
        context: &ActivityContext,
        input: I,
        cancel: CancellationToken,
        handler: F,
    ) -> Result<Option<O>, E>
    where
        F: FnOnce(I, Activity, CancellationToken) -> Fut,
        Fut: Future<Output = Result<O, E>>,
        E: fmt::Display,
    {
        self.run_scoped_async(name, kind, context, input, cancel, handler)
            .await
    }
}

impl fmt::Debug for TraceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSpanSource;
    use opentelemetry::trace::Status;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use thiserror::Error;
    use uuid::Uuid;

    #[derive(Debug, Error, PartialEq)]
    #[error("{0}")]
    struct OrderError(String);

    fn manager() -> (TraceManager, RecordingSpanSource) {
        let source = RecordingSpanSource::new();
        (TraceManager::new(Arc::new(source.clone())), source)
    }

    fn context() -> ActivityContext {
        ActivityContext::new(Uuid::now_v7(), Uuid::now_v7())
            .with_execution_user("alice")
            .with_source_platform("web")
    }

    #[test]
    fn test_successful_handler_ends_ok() {
        let (traces, source) = manager();
        let ctx = context();

        traces
            .start_activity("ProcessOrder", SpanKind::Internal, &ctx, |activity| {
                // Status is already Ok while the handler runs.
                assert_eq!(activity.status(), ActivityStatus::Ok);
                activity.set_tag("order.lines", 3i64);
                Ok::<_, OrderError>(())
            })
            .unwrap();

        let spans = source.finished_spans();
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert_eq!(span.name, "ProcessOrder");
        assert_eq!(span.kind, SpanKind::Internal);
        assert_eq!(span.status, Status::Ok);
        assert!(span.events.is_empty());
        assert_eq!(span.attribute(CORRELATION_ID_TAG), Some(ctx.correlation_id.to_string()));
        assert_eq!(span.attribute(TENANT_ID_TAG), Some(ctx.tenant_id.to_string()));
        assert_eq!(span.attribute(EXECUTION_USER_TAG).as_deref(), Some("alice"));
        assert_eq!(span.attribute(SOURCE_PLATFORM_TAG).as_deref(), Some("web"));
        assert_eq!(span.attribute("order.lines").as_deref(), Some("3"));
    }

    #[test]
    fn test_failing_handler_records_exception_and_returns_error() {
        let (traces, source) = manager();

        let err = traces
            .start_activity_with_input(
                "ProcessOrder",
                SpanKind::Server,
                &context(),
                17u32,
                |order_id, _activity| Err(OrderError(format!("bad order {order_id}"))),
            )
            .unwrap_err();
        assert_eq!(err, OrderError("bad order 17".into()));

        let span = &source.finished_spans()[0];
        assert_eq!(span.status, Status::error("bad order 17"));
        assert_eq!(span.events.len(), 1);
        assert_eq!(span.events[0].name, EXCEPTION_EVENT);
        assert_eq!(
            span.events[0].attribute(EXCEPTION_MESSAGE_ATTR).as_deref(),
            Some("bad order 17")
        );
        assert!(span.events[0]
            .attribute(EXCEPTION_TYPE_ATTR)
            .is_some_and(|ty| ty.ends_with("OrderError")));
    }

    #[test]
    fn test_output_shape_returns_handler_value() {
        let (traces, _) = manager();
        let total = traces
            .start_activity_with_output(
                "PriceOrder",
                SpanKind::Internal,
                &context(),
                vec![2u64, 5, 9],
                |lines, _| Ok::<_, OrderError>(lines.iter().sum::<u64>()),
            )
            .unwrap();
        assert_eq!(total, Some(16));
    }

    #[test]
    fn test_sampled_out_activity_skips_handler() {
        let source = RecordingSpanSource::sampled_out();
        let traces = TraceManager::new(Arc::new(source.clone()));
        let calls = AtomicUsize::new(0);

        traces
            .start_activity("Skipped", SpanKind::Internal, &context(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(OrderError("unreachable".into()))
            })
            .unwrap();
        let output = traces
            .start_activity_with_output("Skipped", SpanKind::Internal, &context(), (), |(), _| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, OrderError>(42)
            })
            .unwrap();

        assert_eq!(output, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(source.finished_spans().is_empty());
    }

    #[test]
    fn test_handler_can_override_status() {
        let (traces, source) = manager();
        traces
            .start_activity("Degraded", SpanKind::Internal, &context(), |activity| {
                activity.set_status(ActivityStatus::Error("partial result".into()));
                Ok::<_, OrderError>(())
            })
            .unwrap();
        assert_eq!(
            source.finished_spans()[0].status,
            Status::error("partial result")
        );
    }

    #[test]
    fn test_panicking_handler_records_panic_and_resumes() {
        let (traces, source) = manager();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            traces.start_activity(
                "Explodes",
                SpanKind::Internal,
                &context(),
                |_| -> Result<(), OrderError> { panic!("bad order") },
            )
        }));
        let payload = outcome.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"bad order"));

        let spans = source.finished_spans();
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert_eq!(span.status, Status::error("bad order"));
        assert_eq!(span.events.len(), 1);
        assert_eq!(span.events[0].name, EXCEPTION_EVENT);
        assert_eq!(
            span.events[0].attribute(EXCEPTION_TYPE_ATTR).as_deref(),
            Some(PANIC_EXCEPTION_TYPE)
        );
        assert_eq!(
            span.events[0].attribute(EXCEPTION_MESSAGE_ATTR).as_deref(),
            Some("bad order")
        );
    }

    #[tokio::test]
    async fn test_panicking_async_handler_records_panic() {
        let (traces, source) = manager();
        let outcome = AssertUnwindSafe(traces.start_activity_async_with_input(
            "Charge",
            SpanKind::Client,
            &context(),
            12u64,
            CancellationToken::new(),
            |amount, _activity, _token| async move {
                tokio::task::yield_now().await;
                if amount > 10 {
                    panic!("amount {amount} over limit");
                }
                Ok::<_, OrderError>(())
            },
        ))
        .catch_unwind()
        .await;
        assert!(outcome.is_err());

        let spans = source.finished_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, Status::error("amount 12 over limit"));
        assert_eq!(spans[0].events.len(), 1);
        assert_eq!(
            spans[0].events[0].attribute(EXCEPTION_MESSAGE_ATTR).as_deref(),
            Some("amount 12 over limit")
        );
    }

    #[tokio::test]
    async fn test_async_handler_receives_input_and_token() {
        let (traces, source) = manager();
        let cancel = CancellationToken::new();

        let echoed = traces
            .start_activity_async_with_output(
                "Echo",
                SpanKind::Client,
                &context(),
                "payload".to_string(),
                cancel.clone(),
                |input, activity, token| async move {
                    tokio::task::yield_now().await;
                    assert!(!activity.is_ended());
                    assert!(!token.is_cancelled());
                    Ok::<_, OrderError>(input.len())
                },
            )
            .await
            .unwrap();

        assert_eq!(echoed, Some(7));
        assert_eq!(source.finished_spans()[0].status, Status::Ok);
    }

    #[tokio::test]
    async fn test_async_failure_is_recorded() {
        let (traces, source) = manager();
        let err = traces
            .start_activity_async_with_input(
                "Charge",
                SpanKind::Client,
                &context(),
                99u64,
                CancellationToken::new(),
                |amount, _activity, _token| async move {
                    Err(OrderError(format!("declined {amount}")))
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.0, "declined 99");
        let span = &source.finished_spans()[0];
        assert_eq!(span.status, Status::error("declined 99"));
        assert_eq!(span.events.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_after_cancellation_ends_cancelled() {
        let (traces, source) = manager();
        let cancel = CancellationToken::new();

        let result = traces
            .start_activity_async("Sync", SpanKind::Internal, &context(), cancel.clone(), {
                let cancel = cancel.clone();
                move |_activity, token| async move {
                    cancel.cancel();
                    token.cancelled().await;
                    Err(OrderError("stopped".into()))
                }
            })
            .await;

        assert_eq!(result, Err(OrderError("stopped".into())));
        let span = &source.finished_spans()[0];
        assert_eq!(span.status, Status::error("cancelled"));
        assert_eq!(span.events.len(), 1);
    }

    #[tokio::test]
    async fn test_async_sampled_out_skips_handler() {
        let source = RecordingSpanSource::sampled_out();
        let traces = TraceManager::new(Arc::new(source));
        let result = traces
            .start_activity_async(
                "Skipped",
                SpanKind::Internal,
                &context(),
                CancellationToken::new(),
                |_activity, _token| async move { Err(OrderError("handler ran".into())) },
            )
            .await;
        assert_eq!(result, Ok(()));
    }
}
