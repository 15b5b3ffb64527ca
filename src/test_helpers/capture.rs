//! Records `tracing` events so tests can assert on structured log fields.
//!
//! [`capture_events`] installs a recorder as the thread's default subscriber
//! until the returned [`CapturedEvents`] is dropped. On a current-thread
//! runtime this also covers the connection tasks a robot spawns.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use tracing::{
    Event,
    Level,
    Metadata,
    Subscriber,
    field::{Field, Visit},
    span,
    subscriber::DefaultGuard,
};

use crate::robot::lock;

/// One recorded event. Field values keep their `Debug` rendering, so
/// `%value` fields read as their `Display` text.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    level: Level,
    fields: HashMap<&'static str, String>,
}

impl RecordedEvent {
    /// Return the event level.
    #[must_use]
    pub const fn level(&self) -> Level { self.level }

    /// Return a field value by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> { self.fields.get(name).map(String::as_str) }

    /// Return the event message.
    #[must_use]
    pub fn message(&self) -> Option<&str> { self.field("message") }
}

impl Visit for RecordedEvent {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.fields.insert(field.name(), format!("{value:?}"));
    }
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<RecordedEvent>>>);

impl Subscriber for Recorder {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool { true }

    fn new_span(&self, _attrs: &span::Attributes<'_>) -> span::Id { span::Id::from_u64(1) }

    fn record(&self, _span: &span::Id, _values: &span::Record<'_>) {}

    fn record_follows_from(&self, _span: &span::Id, _follows: &span::Id) {}

    fn event(&self, event: &Event<'_>) {
        let mut recorded = RecordedEvent {
            level: *event.metadata().level(),
            fields: HashMap::new(),
        };
        event.record(&mut recorded);
        lock(&self.0).push(recorded);
    }

    fn enter(&self, _span: &span::Id) {}

    fn exit(&self, _span: &span::Id) {}
}

/// Events recorded while the capture is alive.
pub struct CapturedEvents {
    recorder: Recorder,
    _guard: DefaultGuard,
}

impl CapturedEvents {
    /// Drain the recorded events carrying `message`, discarding the rest.
    #[must_use]
    pub fn with_message(&self, message: &str) -> Vec<RecordedEvent> {
        std::mem::take(&mut *lock(&self.recorder.0))
            .into_iter()
            .filter(|event| event.message() == Some(message))
            .collect()
    }
}

impl fmt::Debug for CapturedEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedEvents").finish_non_exhaustive()
    }
}

/// Record every event on this thread until the capture is dropped.
#[must_use]
pub fn capture_events() -> CapturedEvents {
    let recorder = Recorder::default();
    let guard = tracing::subscriber::set_default(recorder.clone());
    CapturedEvents {
        recorder,
        _guard: guard,
    }
}
