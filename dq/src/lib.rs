//! dispatchq - task-dispatching and concurrency-control engine
//!
//! A scheduler that accepts asynchronous units of work, queues them, and
//! releases them for execution under configurable concurrency limits,
//! rate windows, and priority ordering, with retry-with-backoff and
//! lifecycle-event signaling. Scheduling is cooperative: one non-reentrant
//! loop per dispatcher releases work as capacity frees up, and no
//! operation ever blocks a caller.
//!
//! # Modules
//!
//! - [`dispatcher`] - the scheduler: submissions, limits, pause/resume,
//!   lifecycle events
//! - [`emitter`] - typed publish/subscribe hub with push and pull
//!   consumption
//! - [`queue`] - the queue abstraction and its FIFO/priority
//!   implementations
//! - [`retry`] - retry-with-backoff helper
//! - [`error`] - error taxonomy

pub mod dispatcher;
pub mod emitter;
pub mod error;
pub mod queue;
pub mod retry;

// Re-export commonly used types
pub use dispatcher::{
    DispatchHandle, DispatchOptions, Dispatcher, DispatcherConfig, DispatcherEvent, EventKind, RetryPolicy,
};
pub use emitter::{Emitter, EmitterEvent, EventStream, ListenerId, OnceError};
pub use error::{DispatchError, EmitError};
pub use queue::{FifoQueue, PriorityNode, PriorityQueue, Queue, QueueKind};
pub use retry::{RetryConfig, RetryHooks, TaskContext, retry, retry_with};
