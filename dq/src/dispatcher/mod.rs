//! Task dispatcher
//!
//! Accepts asynchronous units of work, queues them as run-closures, and
//! releases them under a concurrency ceiling, a sliding rate window, and
//! priority ordering. A single cooperative processing loop, guarded
//! against reentrancy, drives dispatch; it never blocks a caller.
//!
//! Submissions settle a [`DispatchHandle`]; lifecycle transitions surface
//! on the emitter as [`DispatcherEvent`]s, with task failures carried on
//! the distinguished error channel.

mod config;
mod core;
mod events;
mod handle;

pub use config::{DispatchOptions, DispatcherConfig, RetryPolicy};
pub use core::Dispatcher;
pub use events::{DispatcherEvent, EventKind};
pub use handle::DispatchHandle;
