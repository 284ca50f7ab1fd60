//! Lifecycle events

use std::sync::Arc;

use crate::emitter::EmitterEvent;
use crate::error::DispatchError;

/// Event emitted on the dispatcher's emitter surface
#[derive(Debug, Clone)]
pub enum DispatcherEvent {
    /// A submission was queued
    Enqueue,

    /// A run-closure was dequeued and its task is starting
    Execute,

    /// A task settled successfully
    Complete,

    /// A task settled (either way) and its slot freed
    Finish,

    /// The queue drained while not paused
    Empty,

    /// Queue drained and zero tasks in flight
    Idle,

    /// The dispatcher was paused
    Pause,

    /// The dispatcher was resumed
    Resume,

    /// A task failed; carries the failure value
    Error(Arc<DispatchError>),
}

/// Subscription channel discriminant
///
/// `ErrorMonitor` has no event variant of its own: it receives the
/// [`DispatcherEvent::Error`] value alongside every error emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Enqueue,
    Execute,
    Complete,
    Finish,
    Empty,
    Idle,
    Pause,
    Resume,
    Error,
    ErrorMonitor,
}

impl EmitterEvent for DispatcherEvent {
    type Kind = EventKind;

    fn kind(&self) -> EventKind {
        match self {
            DispatcherEvent::Enqueue => EventKind::Enqueue,
            DispatcherEvent::Execute => EventKind::Execute,
            DispatcherEvent::Complete => EventKind::Complete,
            DispatcherEvent::Finish => EventKind::Finish,
            DispatcherEvent::Empty => EventKind::Empty,
            DispatcherEvent::Idle => EventKind::Idle,
            DispatcherEvent::Pause => EventKind::Pause,
            DispatcherEvent::Resume => EventKind::Resume,
            DispatcherEvent::Error(_) => EventKind::Error,
        }
    }

    fn error_kind() -> Option<EventKind> {
        Some(EventKind::Error)
    }

    fn monitor_kind() -> Option<EventKind> {
        Some(EventKind::ErrorMonitor)
    }

    fn capture_listener_failure(failure: eyre::Report) -> Result<Self, eyre::Report> {
        Ok(DispatcherEvent::Error(Arc::new(DispatchError::task(failure))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(DispatcherEvent::Enqueue.kind(), EventKind::Enqueue);
        assert_eq!(DispatcherEvent::Idle.kind(), EventKind::Idle);
        let error = DispatcherEvent::Error(Arc::new(DispatchError::cancelled()));
        assert_eq!(error.kind(), EventKind::Error);
    }

    #[test]
    fn test_error_channel_is_distinguished() {
        assert_eq!(DispatcherEvent::error_kind(), Some(EventKind::Error));
        assert_eq!(DispatcherEvent::monitor_kind(), Some(EventKind::ErrorMonitor));
    }
}
