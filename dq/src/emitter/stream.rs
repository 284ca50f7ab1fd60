//! Pull-based view of an event channel

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::queue::{FifoQueue, Queue};

use super::core::{Emitter, EmitterEvent, ListenerId};

/// Buffered item: a regular emission or an error-channel emission
pub(crate) enum StreamItem<E> {
    Event(E),
    Error(E),
}

/// Shared buffer between the emitter-side listeners and the consumer
pub(crate) struct StreamState<E> {
    buffer: Mutex<FifoQueue<StreamItem<E>>>,
    notify: Notify,
}

impl<E: Send> StreamState<E> {
    pub(crate) fn new() -> Self {
        Self {
            buffer: Mutex::new(FifoQueue::new()),
            notify: Notify::new(),
        }
    }

    pub(crate) fn push(&self, item: StreamItem<E>) {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .enqueue(item, 0);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<StreamItem<E>> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .dequeue()
    }
}

/// Single-pass, lazily pulled sequence of events of one kind
///
/// Ends when the supplied cancellation token fires or after an error
/// emission has been surfaced; unsubscribes from the emitter on every exit
/// path, including drop.
pub struct EventStream<E: EmitterEvent> {
    emitter: Emitter<E>,
    listener: Option<ListenerId<E::Kind>>,
    monitor: Option<ListenerId<E::Kind>>,
    state: Arc<StreamState<E>>,
    token: Option<CancellationToken>,
    done: bool,
}

impl<E: EmitterEvent> EventStream<E> {
    pub(crate) fn new(
        emitter: Emitter<E>,
        listener: ListenerId<E::Kind>,
        monitor: Option<ListenerId<E::Kind>>,
        state: Arc<StreamState<E>>,
        token: Option<CancellationToken>,
    ) -> Self {
        Self {
            emitter,
            listener: Some(listener),
            monitor,
            state,
            token,
            done: false,
        }
    }

    /// Pull the next buffered event, waiting if none is pending
    ///
    /// `Some(Err(_))` carries the error-channel event that ended the
    /// stream; `None` means the stream finished (cancelled or already
    /// ended).
    pub async fn next(&mut self) -> Option<Result<E, E>> {
        loop {
            if self.done {
                return None;
            }
            if let Some(item) = self.state.pop() {
                match item {
                    StreamItem::Event(event) => return Some(Ok(event)),
                    StreamItem::Error(event) => {
                        self.close();
                        return Some(Err(event));
                    }
                }
            }
            match &self.token {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            self.close();
                            return None;
                        }
                        _ = self.state.notify.notified() => {}
                    }
                }
                None => self.state.notify.notified().await,
            }
        }
    }

    fn close(&mut self) {
        if let Some(id) = self.listener.take() {
            self.emitter.remove_listener(id);
        }
        if let Some(id) = self.monitor.take() {
            self.emitter.remove_listener(id);
        }
        self.done = true;
    }
}

impl<E: EmitterEvent> Drop for EventStream<E> {
    fn drop(&mut self) {
        self.close();
    }
}
