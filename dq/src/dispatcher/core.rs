//! Dispatcher implementation

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::emitter::{Emitter, EventStream, OnceError};
use crate::error::{DispatchError, EmitError};
use crate::queue::Queue;
use crate::retry::{TaskContext, retry};

use super::config::{DispatchOptions, DispatcherConfig};
use super::events::{DispatcherEvent, EventKind};
use super::handle::DispatchHandle;

/// The only value type ever stored in the queue; invoking it starts the
/// task and decouples the queue from task/result typing
type RunClosure = Box<dyn FnOnce(Dispatcher) + Send>;

/// Result sender shared between the run-closure and the cancellation
/// watcher; whichever side settles first takes it
type ResultSlot<T> = Arc<Mutex<Option<oneshot::Sender<Result<T, DispatchError>>>>>;

fn take_sender<T>(slot: &ResultSlot<T>) -> Option<oneshot::Sender<Result<T, DispatchError>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Cancels the paired settlement token when the submission's lifetime
/// ends, invoked or not, so the cancellation watcher never outlives it
struct SettleGuard {
    settled: CancellationToken,
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        self.settled.cancel();
    }
}

struct State {
    queue: Box<dyn Queue<RunClosure> + Send>,

    /// Tasks dispatched and not yet finished
    pending_tasks: usize,

    /// Dispatch starts in the current rate window
    executed_tasks: u32,

    paused: bool,

    /// Reentrancy guard around the processing loop
    processing: bool,

    /// A drive request arrived while a pass was running; replay it
    repoll: bool,

    /// Recurring timer that rolls the rate window over
    window_timer: Option<JoinHandle<()>>,

    /// One-shot timer reviving a starved scheduler before the window
    /// timer first fires again
    wake_timer: Option<JoinHandle<()>>,

    /// Absolute close time of the current rate window
    window_deadline: Option<Instant>,
}

struct Shared {
    config: DispatcherConfig,
    emitter: Emitter<DispatcherEvent>,
    state: Mutex<State>,
}

/// Task scheduler with concurrency and rate ceilings, priority ordering,
/// retry-with-backoff, and lifecycle events
///
/// Cheap to clone; all clones drive the same queue. Must be used inside a
/// tokio runtime: tasks run on spawned tokio tasks.
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Clone for Dispatcher {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatcherConfig::default())
    }
}

impl Dispatcher {
    /// Create a dispatcher with the given configuration
    pub fn new(config: DispatcherConfig) -> Self {
        debug!(?config, "Dispatcher::new: called");
        let state = State {
            queue: config.queue_kind.build(),
            pending_tasks: 0,
            executed_tasks: 0,
            paused: config.paused,
            processing: false,
            repoll: false,
            window_timer: None,
            wake_timer: None,
            window_deadline: None,
        };
        Self {
            shared: Arc::new(Shared {
                config,
                emitter: Emitter::with_capture_failures(),
                state: Mutex::new(state),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Submit a task; the returned handle settles with its result
    ///
    /// The task is invoked with a [`TaskContext`] carrying its attempt
    /// number and cancellation token. A token cancelled before dispatch
    /// rejects the handle without ever invoking the task.
    pub fn enqueue<T, F, Fut>(&self, task: F, options: DispatchOptions) -> DispatchHandle<T>
    where
        F: FnMut(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = eyre::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        debug!(priority = options.priority, "Dispatcher::enqueue: called");
        let token = options.cancellation.clone().unwrap_or_default();
        if token.is_cancelled() {
            debug!("Dispatcher::enqueue: token already cancelled, rejecting");
            return DispatchHandle::settled(Err(DispatchError::cancelled()));
        }

        let policy = options.retry.clone().unwrap_or_else(|| self.shared.config.retry.clone());
        let (tx, rx) = oneshot::channel();
        let slot: ResultSlot<T> = Arc::new(Mutex::new(Some(tx)));
        let mut task = task;

        // A queued submission must reject the moment its token fires, not
        // when its closure is eventually dequeued. The watcher races the
        // token against settlement; the guard releases it either way.
        let guard = options.cancellation.as_ref().map(|_| {
            let settled = CancellationToken::new();
            let slot = Arc::clone(&slot);
            let token = token.clone();
            let watched = settled.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {
                        if let Some(tx) = take_sender(&slot) {
                            debug!("Dispatcher: token fired while queued, rejecting handle");
                            let _ = tx.send(Err(DispatchError::cancelled()));
                        }
                    }
                    _ = watched.cancelled() => {
                        // Settled or dropped; release the sender if unused
                        take_sender(&slot);
                    }
                }
            });
            SettleGuard { settled }
        });

        let run: RunClosure = Box::new(move |dispatcher: Dispatcher| {
            let Some(tx) = take_sender(&slot) else {
                // Rejected by cancellation before dispatch; the task was
                // never started, so no counters or events
                debug!("Dispatcher: submission already settled, skipping dispatch");
                return;
            };
            {
                let mut state = dispatcher.lock();
                state.executed_tasks += 1;
                state.pending_tasks += 1;
            }
            dispatcher.emit(DispatcherEvent::Execute);

            tokio::spawn(async move {
                let _guard = guard;
                let result = if token.is_cancelled() {
                    debug!("Dispatcher: token cancelled while queued, skipping task body");
                    Err(DispatchError::cancelled())
                } else {
                    let outcome = match policy.config() {
                        None => {
                            let context = TaskContext {
                                attempt: 0,
                                cancellation: token.clone(),
                            };
                            task(context).await
                        }
                        Some(config) => retry(&config, &token, |context| task(context)).await,
                    };
                    match outcome {
                        Ok(value) => Ok(value),
                        Err(report) if token.is_cancelled() => {
                            debug!(%report, "Dispatcher: task failed after cancellation, reporting cancellation");
                            Err(DispatchError::cancelled())
                        }
                        Err(report) => Err(DispatchError::task(report)),
                    }
                };

                match result {
                    Ok(value) => {
                        let _ = tx.send(Ok(value));
                        dispatcher.emit(DispatcherEvent::Complete);
                    }
                    Err(failure) => {
                        let _ = tx.send(Err(failure.clone()));
                        dispatcher.emit(DispatcherEvent::Error(Arc::new(failure)));
                    }
                }

                {
                    let mut state = dispatcher.lock();
                    state.pending_tasks -= 1;
                }
                dispatcher.emit(DispatcherEvent::Finish);
                dispatcher.drive();
            });
        });

        {
            let mut state = self.lock();
            state.queue.enqueue(run, options.priority);
        }
        self.emit(DispatcherEvent::Enqueue);
        self.drive();
        DispatchHandle::new(rx)
    }

    /// Submit several tasks with shared options; settles once all settle,
    /// failing as soon as any one fails
    pub fn enqueue_all<T, F, Fut>(&self, tasks: Vec<F>, options: DispatchOptions) -> DispatchHandle<Vec<T>>
    where
        F: FnMut(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = eyre::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        debug!(count = tasks.len(), "Dispatcher::enqueue_all: called");
        let handles: Vec<DispatchHandle<T>> = tasks
            .into_iter()
            .map(|task| self.enqueue(task, options.clone()))
            .collect();

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = futures::future::try_join_all(handles).await;
            let _ = tx.send(result);
        });
        DispatchHandle::new(rx)
    }

    /// Queued submissions not yet dispatched
    pub fn size(&self) -> usize {
        self.lock().queue.size()
    }

    /// Whether the backlog is empty
    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Tasks dispatched and not yet finished
    pub fn pending(&self) -> usize {
        self.lock().pending_tasks
    }

    /// Whether new dispatches are currently blocked
    pub fn paused(&self) -> bool {
        self.lock().paused
    }

    /// Zero queued and zero in-flight
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.pending_tasks == 0 && state.queue.is_empty()
    }

    /// Block new dispatches; in-flight tasks are unaffected. No-op when
    /// already paused.
    pub fn pause(&self) {
        debug!("Dispatcher::pause: called");
        {
            let mut state = self.lock();
            if state.paused {
                debug!("Dispatcher::pause: already paused");
                return;
            }
            state.paused = true;
            // No rate budget is consumed while paused
            if let Some(timer) = state.window_timer.take() {
                timer.abort();
            }
        }
        self.emit(DispatcherEvent::Pause);
    }

    /// Release dispatching again. No-op when not paused.
    pub fn resume(&self) {
        debug!("Dispatcher::resume: called");
        {
            let mut state = self.lock();
            if !state.paused {
                debug!("Dispatcher::resume: not paused");
                return;
            }
            state.paused = false;
        }
        self.drive();
        self.emit(DispatcherEvent::Resume);
    }

    /// The dispatcher's event surface
    pub fn events(&self) -> Emitter<DispatcherEvent> {
        self.shared.emitter.clone()
    }

    /// Pull-based view of one lifecycle event channel
    pub fn on(&self, kind: EventKind, token: Option<CancellationToken>) -> EventStream<DispatcherEvent> {
        self.shared.emitter.on(kind, token)
    }

    /// Wait for a single lifecycle event
    pub async fn once(
        &self,
        kind: EventKind,
        token: Option<CancellationToken>,
    ) -> Result<DispatcherEvent, OnceError<DispatcherEvent>> {
        self.shared.emitter.once(kind, token).await
    }

    /// Resolve once the backlog drops below `backlog`
    pub async fn on_available(&self, backlog: usize) {
        debug!(backlog, "Dispatcher::on_available: called");
        loop {
            let wait = self.shared.emitter.wait_next(EventKind::Finish);
            if self.size() < backlog {
                return;
            }
            if wait.await.is_none() {
                return;
            }
        }
    }

    /// Resolve once the backlog is empty
    pub async fn on_empty(&self) {
        debug!("Dispatcher::on_empty: called");
        let wait = self.shared.emitter.wait_next(EventKind::Empty);
        if self.is_empty() {
            return;
        }
        let _ = wait.await;
    }

    /// Resolve once zero queued and zero in-flight
    pub async fn on_idle(&self) {
        debug!("Dispatcher::on_idle: called");
        let wait = self.shared.emitter.wait_next(EventKind::Idle);
        if self.is_idle() {
            return;
        }
        let _ = wait.await;
    }

    fn emit(&self, event: DispatcherEvent) {
        if let Err(failure) = self.shared.emitter.emit(event) {
            match failure {
                EmitError::UnhandledError => {
                    // The handle already carries the failure; report loudly
                    // without aborting the host.
                    error!("task failure emitted with no error listeners");
                }
                EmitError::Listener(report) => {
                    error!(%report, "listener failed while handling a dispatcher event");
                }
            }
        }
    }

    /// Drive the processing loop until a pass takes no action
    ///
    /// The `processing` flag makes this a non-blocking try-lock: a call
    /// arriving while a pass runs marks `repoll` and returns, and the
    /// running pass replays it. Synchronous completions therefore never
    /// recurse into the loop.
    fn drive(&self) {
        loop {
            {
                let mut state = self.lock();
                if state.processing {
                    state.repoll = true;
                    return;
                }
                state.processing = true;
            }

            loop {
                let mut events = Vec::new();
                let stepped = self.process_next(&mut events);
                for event in events {
                    self.emit(event);
                }
                if !stepped {
                    break;
                }
            }

            let mut state = self.lock();
            state.processing = false;
            if !state.repoll {
                return;
            }
            state.repoll = false;
        }
    }

    /// One loop transition; true if a closure was dispatched
    fn process_next(&self, events: &mut Vec<DispatcherEvent>) -> bool {
        let config = &self.shared.config;
        let mut state = self.lock();

        if state.paused || state.queue.is_empty() {
            // Budget enforcement survives the stop: the deadline stays
            // set, and a dispatch attempt inside the old window falls
            // back to the wake timer
            if state.pending_tasks == 0 {
                if let Some(timer) = state.window_timer.take() {
                    debug!("Dispatcher::process_next: stopping idle window timer");
                    timer.abort();
                }
            }
            if !state.paused {
                events.push(DispatcherEvent::Empty);
                if state.pending_tasks == 0 {
                    events.push(DispatcherEvent::Idle);
                }
            }
            return false;
        }

        if config.rate_limiting_enabled() && state.window_timer.is_none() {
            let now = Instant::now();
            match state.window_deadline {
                Some(deadline) if now < deadline => {
                    if state.wake_timer.is_none() {
                        self.start_wake_timer(&mut state, deadline - now);
                    }
                }
                _ => {
                    state.executed_tasks = if config.pending_carryover {
                        state.pending_tasks as u32
                    } else {
                        0
                    };
                    self.start_window_timer(&mut state);
                }
            }
        }

        if state.pending_tasks >= config.concurrency() {
            debug!(pending = state.pending_tasks, "Dispatcher::process_next: concurrency exhausted");
            return false;
        }
        if config.rate_limiting_enabled() && state.executed_tasks >= config.rate_limit() {
            debug!(executed = state.executed_tasks, "Dispatcher::process_next: window budget exhausted");
            return false;
        }

        let Some(run) = state.queue.dequeue() else {
            return false;
        };
        drop(state);
        run(self.clone());
        true
    }

    fn start_window_timer(&self, state: &mut State) {
        let interval = self.shared.config.rate_interval();
        debug!(interval_ms = interval.as_millis() as u64, "Dispatcher::start_window_timer: opening window");
        state.window_deadline = Some(Instant::now() + interval);
        let dispatcher = self.clone();
        state.window_timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                dispatcher.on_window_tick();
            }
        }));
    }

    fn on_window_tick(&self) {
        debug!("Dispatcher::on_window_tick: window rolled over");
        {
            let mut state = self.lock();
            state.executed_tasks = if self.shared.config.pending_carryover {
                state.pending_tasks as u32
            } else {
                0
            };
            state.window_deadline = Some(Instant::now() + self.shared.config.rate_interval());
        }
        self.drive();
    }

    fn start_wake_timer(&self, state: &mut State, remaining: Duration) {
        debug!(remaining_ms = remaining.as_millis() as u64, "Dispatcher::start_wake_timer: scheduling wake");
        let dispatcher = self.clone();
        state.wake_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            dispatcher.lock().wake_timer = None;
            dispatcher.drive();
        }));
    }
}
