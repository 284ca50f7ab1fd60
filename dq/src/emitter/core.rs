//! Emitter implementation

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::EmitError;

use super::stream::{EventStream, StreamItem, StreamState};

/// Event type dispatched through an [`Emitter`]
///
/// `Kind` discriminates subscription channels. `error_kind` marks the
/// distinguished failure channel and `monitor_kind` the channel that fires
/// alongside it.
pub trait EmitterEvent: Clone + Send + fmt::Debug + 'static {
    type Kind: Copy + Eq + Hash + Send + fmt::Debug + Unpin + 'static;

    /// The channel this event is dispatched on
    fn kind(&self) -> Self::Kind;

    /// The distinguished error channel, if the event type has one
    fn error_kind() -> Option<Self::Kind> {
        None
    }

    /// Channel fired alongside every error emission, if any
    fn monitor_kind() -> Option<Self::Kind> {
        None
    }

    /// Convert a listener failure into an error event for the
    /// capture-failures channel; `Err` gives the failure back
    fn capture_listener_failure(failure: eyre::Report) -> Result<Self, eyre::Report> {
        Err(failure)
    }
}

/// Handle returned by listener registration, used for removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId<K> {
    kind: K,
    id: u64,
}

/// Failure modes of [`Emitter::once`]
#[derive(Debug, Error)]
pub enum OnceError<E: fmt::Debug> {
    #[error("wait cancelled before the event fired")]
    Cancelled,

    #[error("error event raised while waiting")]
    Error(E),
}

type ListenerFn<E> = Box<dyn FnMut(&E) -> eyre::Result<()> + Send>;

struct ListenerEntry<E> {
    id: u64,
    once: bool,
    func: Arc<Mutex<ListenerFn<E>>>,
}

struct Inner<E: EmitterEvent> {
    listeners: HashMap<E::Kind, Vec<ListenerEntry<E>>>,
    next_id: u64,
    capture_failures: bool,
}

/// Typed publish/subscribe hub; cheap to clone, all clones share listeners
pub struct Emitter<E: EmitterEvent> {
    inner: Arc<Mutex<Inner<E>>>,
}

impl<E: EmitterEvent> Clone for Emitter<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<E: EmitterEvent> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: EmitterEvent> Emitter<E> {
    /// Create an emitter without the capture-failures channel
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Create an emitter that redirects listener failures into the error
    /// channel instead of surfacing them to `emit`'s caller
    pub fn with_capture_failures() -> Self {
        Self::build(true)
    }

    fn build(capture_failures: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                listeners: HashMap::new(),
                next_id: 0,
                capture_failures,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a persistent listener; invoked for every emission of `kind`
    pub fn on_listener<F>(&self, kind: E::Kind, func: F) -> ListenerId<E::Kind>
    where
        F: FnMut(&E) -> eyre::Result<()> + Send + 'static,
    {
        self.register(kind, false, Box::new(func))
    }

    /// Attach a one-shot listener; unlinked before its single invocation
    pub fn once_listener<F>(&self, kind: E::Kind, func: F) -> ListenerId<E::Kind>
    where
        F: FnMut(&E) -> eyre::Result<()> + Send + 'static,
    {
        self.register(kind, true, Box::new(func))
    }

    fn register(&self, kind: E::Kind, once: bool, func: ListenerFn<E>) -> ListenerId<E::Kind> {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        debug!(?kind, id, once, "Emitter::register: adding listener");
        inner.listeners.entry(kind).or_default().push(ListenerEntry {
            id,
            once,
            func: Arc::new(Mutex::new(func)),
        });
        ListenerId { kind, id }
    }

    /// Remove a listener; returns false if it already fired or was removed
    pub fn remove_listener(&self, listener: ListenerId<E::Kind>) -> bool {
        let mut inner = self.lock();
        let Some(entries) = inner.listeners.get_mut(&listener.kind) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != listener.id);
        before != entries.len()
    }

    /// Number of listeners attached to `kind`
    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.lock().listeners.get(&kind).map_or(0, Vec::len)
    }

    /// Dispatch an event synchronously to its kind's listeners
    ///
    /// Emitting the error kind also fires the monitor kind first, and
    /// returns [`EmitError::UnhandledError`] when no error listener was
    /// attached.
    pub fn emit(&self, event: E) -> Result<(), EmitError> {
        let kind = event.kind();
        debug!(?kind, "Emitter::emit: called");

        if E::error_kind() == Some(kind) {
            if let Some(monitor) = E::monitor_kind() {
                self.dispatch(monitor, &event)?;
            }
            let observed = self.listener_count(kind) > 0;
            self.dispatch(kind, &event)?;
            if !observed {
                debug!(?kind, "Emitter::emit: error emission had no listeners");
                return Err(EmitError::UnhandledError);
            }
            return Ok(());
        }

        self.dispatch(kind, &event)
    }

    fn dispatch(&self, kind: E::Kind, event: &E) -> Result<(), EmitError> {
        let mut cursor = 0u64;
        loop {
            // Resolve the next listener under the lock; one-shot entries
            // unlink here, before they run.
            let next = {
                let mut inner = self.lock();
                inner.listeners.get_mut(&kind).and_then(|entries| {
                    let pos = entries.iter().position(|entry| entry.id >= cursor)?;
                    let id = entries[pos].id;
                    let func = Arc::clone(&entries[pos].func);
                    if entries[pos].once {
                        entries.remove(pos);
                    }
                    Some((id, func))
                })
            };
            let Some((id, func)) = next else {
                return Ok(());
            };
            cursor = id + 1;

            let result = {
                let mut guard = func.lock().unwrap_or_else(PoisonError::into_inner);
                (guard)(event)
            };

            if let Err(failure) = result {
                let capture = self.lock().capture_failures;
                let redirectable = capture
                    && E::error_kind().is_some()
                    && E::error_kind() != Some(kind)
                    && E::monitor_kind() != Some(kind);
                if redirectable {
                    match E::capture_listener_failure(failure) {
                        Ok(error_event) => {
                            debug!(?kind, id, "Emitter::dispatch: redirecting listener failure to error channel");
                            self.emit(error_event)?;
                            continue;
                        }
                        Err(failure) => return Err(EmitError::Listener(failure)),
                    }
                }
                return Err(EmitError::Listener(failure));
            }
        }
    }

    /// Pull-based single-pass view of one event channel
    ///
    /// Emissions buffer until the consumer pulls them. A cancelled token
    /// ends the stream; an error emission on another channel surfaces once
    /// as `Err` and then ends it. Subscriptions are removed on every exit
    /// path, including drop.
    pub fn on(&self, kind: E::Kind, token: Option<CancellationToken>) -> EventStream<E> {
        let state = Arc::new(StreamState::new());

        let listener = {
            let state = Arc::clone(&state);
            self.on_listener(kind, move |event: &E| {
                state.push(StreamItem::Event(event.clone()));
                Ok(())
            })
        };

        let monitor = match E::monitor_kind() {
            Some(monitor_kind) if monitor_kind != kind && E::error_kind() != Some(kind) => {
                let state = Arc::clone(&state);
                Some(self.on_listener(monitor_kind, move |event: &E| {
                    state.push(StreamItem::Error(event.clone()));
                    Ok(())
                }))
            }
            _ => None,
        };

        EventStream::new(self.clone(), listener, monitor, state, token)
    }

    /// Wait for a single event with the same cancellation/error semantics
    /// as [`Emitter::on`]
    pub async fn once(&self, kind: E::Kind, token: Option<CancellationToken>) -> Result<E, OnceError<E>> {
        let mut stream = self.on(kind, token);
        match stream.next().await {
            Some(Ok(event)) => Ok(event),
            Some(Err(event)) => Err(OnceError::Error(event)),
            None => Err(OnceError::Cancelled),
        }
    }

    /// Plain single-event wait with no error interference; used by the
    /// dispatcher's waiting primitives. The listener registers before the
    /// returned future is polled so no emission is missed, and unregisters
    /// if the wait is dropped unresolved.
    pub(crate) fn wait_next(&self, kind: E::Kind) -> EventWait<E> {
        let (tx, rx) = oneshot::channel();
        let mut slot = Some(tx);
        let id = self.once_listener(kind, move |event: &E| {
            if let Some(tx) = slot.take() {
                let _ = tx.send(event.clone());
            }
            Ok(())
        });
        EventWait {
            emitter: self.clone(),
            id: Some(id),
            rx,
        }
    }
}

/// Pending single-event wait; resolves to `None` only if the emitter side
/// goes away first
pub(crate) struct EventWait<E: EmitterEvent> {
    emitter: Emitter<E>,
    id: Option<ListenerId<E::Kind>>,
    rx: oneshot::Receiver<E>,
}

impl<E: EmitterEvent> Future for EventWait<E> {
    type Output = Option<E>;

    fn poll(self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<Self::Output> {
        let this = self.get_mut();
        match std::pin::Pin::new(&mut this.rx).poll(cx) {
            std::task::Poll::Ready(result) => {
                this.id = None;
                std::task::Poll::Ready(result.ok())
            }
            std::task::Poll::Pending => std::task::Poll::Pending,
        }
    }
}

impl<E: EmitterEvent> Drop for EventWait<E> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.emitter.remove_listener(id);
        }
    }
}
