//! Activity handle and its scope guard.

use std::any::{type_name, Any};
use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use opentelemetry::trace::Status;
use opentelemetry::{Key, KeyValue, Value};
use uuid::Uuid;

use super::source::SpanRecorder;

pub const CORRELATION_ID_TAG: &str = "correlation.id";
pub const TENANT_ID_TAG: &str = "tenant.id";
pub const EXECUTION_USER_TAG: &str = "execution.user";
pub const SOURCE_PLATFORM_TAG: &str = "source.platform";

pub const EXCEPTION_EVENT: &str = "exception";
pub const EXCEPTION_TYPE_ATTR: &str = "exception.type";
pub const EXCEPTION_MESSAGE_ATTR: &str = "exception.message";

/// `exception.type` recorded for a handler that panicked.
pub const PANIC_EXCEPTION_TYPE: &str = "panic";

/// Identity and correlation data attached to every activity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivityContext {
    pub correlation_id: Uuid,
    pub tenant_id: Uuid,
    pub execution_user: Option<String>,
    pub source_platform: Option<String>,
}

impl ActivityContext {
    pub fn new(correlation_id: Uuid, tenant_id: Uuid) -> Self {
        Self {
            correlation_id,
            tenant_id,
            execution_user: None,
            source_platform: None,
        }
    }

    pub fn with_execution_user(mut self, user: impl Into<String>) -> Self {
        self.execution_user = Some(user.into());
        self
    }

    pub fn with_source_platform(mut self, platform: impl Into<String>) -> Self {
        self.source_platform = Some(platform.into());
        self
    }

    fn tags(&self) -> Vec<KeyValue> {
        let mut tags = vec![
            KeyValue::new(CORRELATION_ID_TAG, self.correlation_id.to_string()),
            KeyValue::new(TENANT_ID_TAG, self.tenant_id.to_string()),
        ];
        if let Some(user) = &self.execution_user {
            tags.push(KeyValue::new(EXECUTION_USER_TAG, user.clone()));
        }
        if let Some(platform) = &self.source_platform {
            tags.push(KeyValue::new(SOURCE_PLATFORM_TAG, platform.clone()));
        }
        tags
    }
}

/// Status of an activity as seen by the wrapper.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ActivityStatus {
    #[default]
    Unset,
    Ok,
    Error(String),
    /// The handler failed or was abandoned after cancellation was requested.
    Cancelled,
}

impl ActivityStatus {
    fn to_otel(&self) -> Status {
        match self {
            Self::Unset => Status::Unset,
            Self::Ok => Status::Ok,
            Self::Error(message) => Status::error(message.clone()),
            Self::Cancelled => Status::error("cancelled"),
        }
    }
}

struct ActivityState {
    name: String,
    span: Box<dyn SpanRecorder>,
    status: ActivityStatus,
    ended: bool,
}

/// Handle to a running activity, given to handlers.
///
/// Clones refer to the same activity. Writes after the activity ended are
/// ignored.
#[derive(Clone)]
pub struct Activity {
    state: Arc<Mutex<ActivityState>>,
}

impl Activity {
    pub(crate) fn new(name: &str, span: Box<dyn SpanRecorder>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ActivityState {
                name: name.to_owned(),
                span,
                status: ActivityStatus::Unset,
                ended: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ActivityState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn status(&self) -> ActivityStatus {
        self.lock().status.clone()
    }

    pub fn is_ended(&self) -> bool {
        self.lock().ended
    }

    pub fn set_tag(&self, key: impl Into<Key>, value: impl Into<Value>) {
        let mut state = self.lock();
        if !state.ended {
            state.span.set_attribute(KeyValue::new(key, value));
        }
    }

    pub fn add_event(&self, name: impl Into<Cow<'static, str>>, attributes: Vec<KeyValue>) {
        let mut state = self.lock();
        if !state.ended {
            state.span.add_event(name.into().into_owned(), attributes);
        }
    }

    /// Override the status the activity will end with.
    pub fn set_status(&self, status: ActivityStatus) {
        let mut state = self.lock();
        if !state.ended {
            state.status = status;
        }
    }

    fn attach_tags(&self, tags: Vec<KeyValue>) {
        let mut state = self.lock();
        for tag in tags {
            state.span.set_attribute(tag);
        }
    }

    /// Mark the activity failed and record the failure as an exception event.
    fn record_failure<E: fmt::Display>(&self, error: &E, status: ActivityStatus) {
        self.record_exception(type_name::<E>(), error.to_string(), status);
    }

    fn record_exception(
        &self,
        exception_type: &'static str,
        message: String,
        status: ActivityStatus,
    ) {
        let mut state = self.lock();
        if state.ended {
            return;
        }
        state.span.add_event(
            EXCEPTION_EVENT.to_owned(),
            vec![
                KeyValue::new(EXCEPTION_TYPE_ATTR, exception_type),
                KeyValue::new(EXCEPTION_MESSAGE_ATTR, message),
            ],
        );
        state.status = status;
    }

    fn end(&self, fallback: Option<ActivityStatus>) {
        let mut state = self.lock();
        if state.ended {
            return;
        }
        if let Some(status) = fallback {
            state.status = status;
        }
        let status = state.status.to_otel();
        state.span.set_status(status);
        state.span.end();
        state.ended = true;
    }
}

impl fmt::Debug for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Activity")
            .field("name", &state.name)
            .field("status", &state.status)
            .field("ended", &state.ended)
            .finish()
    }
}

/// Owns one started activity and ends it on every exit path.
///
/// Handler panics are caught by the caller and passed to
/// [`panicked`](Self::panicked). A scope dropped without either ends its
/// activity as `Cancelled` (the owning future was dropped mid-flight), or as
/// `Error` if a panic escaped before the handler ran.
pub(crate) struct ActivityScope {
    activity: Activity,
    finished: bool,
}

impl ActivityScope {
    /// Attach the context tags and mark the activity `Ok` before the handler runs.
    pub(crate) fn enter(activity: Activity, context: &ActivityContext) -> Self {
        activity.attach_tags(context.tags());
        activity.set_status(ActivityStatus::Ok);
        Self {
            activity,
            finished: false,
        }
    }

    pub(crate) fn activity(&self) -> &Activity {
        &self.activity
    }

    /// End the activity with the handler's outcome and hand the outcome back.
    pub(crate) fn finish<T, E: fmt::Display>(
        self,
        result: Result<T, E>,
        cancelled: bool,
    ) -> Result<T, E> {
        if let Err(error) = &result {
            let status = if cancelled {
                ActivityStatus::Cancelled
            } else {
                ActivityStatus::Error(error.to_string())
            };
            tracing::debug!(
                activity = %self.activity.name(),
                error = %error,
                cancelled,
                "Activity handler failed"
            );
            self.activity.record_failure(error, status);
        }
        self.close();
        result
    }

    /// End the activity with the panic's message and resume unwinding.
    pub(crate) fn panicked(self, payload: Box<dyn Any + Send>) -> ! {
        let message = panic_message(payload.as_ref());
        tracing::debug!(
            activity = %self.activity.name(),
            panic = %message,
            "Activity handler panicked"
        );
        self.activity.record_exception(
            PANIC_EXCEPTION_TYPE,
            message.clone(),
            ActivityStatus::Error(message),
        );
        self.close();
        std::panic::resume_unwind(payload)
    }

    fn close(mut self) {
        self.finished = true;
        self.activity.end(None);
    }
}

impl Drop for ActivityScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let status = if std::thread::panicking() {
            ActivityStatus::Error("handler panicked".into())
        } else {
            ActivityStatus::Cancelled
        };
        tracing::debug!(
            activity = %self.activity.name(),
            status = ?status,
            "Activity scope abandoned"
        );
        self.activity.end(Some(status));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSpanSource;
    use crate::trace::SpanSource;
    use opentelemetry::trace::SpanKind;

    fn start(source: &RecordingSpanSource) -> Activity {
        let span = source.start("unit", SpanKind::Internal).unwrap();
        Activity::new("unit", span)
    }

    #[test]
    fn test_optional_tags_are_omitted() {
        let source = RecordingSpanSource::new();
        let context = ActivityContext::new(Uuid::nil(), Uuid::from_u128(1));
        let scope = ActivityScope::enter(start(&source), &context);
        scope.finish::<(), String>(Ok(()), false).unwrap();

        let span = &source.finished_spans()[0];
        assert_eq!(span.attributes.len(), 2);
        assert_eq!(
            span.attribute(TENANT_ID_TAG).as_deref(),
            Some("00000000-0000-0000-0000-000000000001")
        );
        assert_eq!(span.attribute(EXECUTION_USER_TAG), None);
    }

    #[test]
    fn test_writes_after_end_are_ignored() {
        let source = RecordingSpanSource::new();
        let context = ActivityContext::new(Uuid::nil(), Uuid::nil());
        let scope = ActivityScope::enter(start(&source), &context);
        let escaped = scope.activity().clone();
        scope.finish::<(), String>(Ok(()), false).unwrap();

        escaped.set_tag("late", "value");
        escaped.set_status(ActivityStatus::Error("late".into()));
        assert!(escaped.is_ended());
        assert_eq!(escaped.status(), ActivityStatus::Ok);
        assert_eq!(source.finished_spans()[0].attribute("late"), None);
    }

    #[test]
    fn test_panic_message_from_payload() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned 7")), "owned 7");
        assert_eq!(panic_message(&42u8), "handler panicked");
    }

    #[test]
    fn test_dropped_scope_ends_cancelled() {
        let source = RecordingSpanSource::new();
        let context = ActivityContext::new(Uuid::nil(), Uuid::nil());
        drop(ActivityScope::enter(start(&source), &context));

        let spans = source.finished_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, Status::error("cancelled"));
    }
}
