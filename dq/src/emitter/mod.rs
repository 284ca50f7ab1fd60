//! Typed publish/subscribe hub
//!
//! Listeners attach per event kind and are dispatched synchronously in
//! registration order. One-shot listeners unlink before they run, and
//! removal during dispatch is safe: the walk resolves its next listener
//! after every call, so a listener may remove itself or any listener not
//! yet visited.
//!
//! Emitting the distinguished error kind with zero error listeners comes
//! back as [`EmitError::UnhandledError`](crate::error::EmitError) so a
//! dropped failure is never silent. The monitor kind fires alongside every
//! error emission without counting as an error listener, which is what the
//! pull-based views use to observe failures without suppressing the loud
//! default.

mod core;
mod stream;

pub use core::{Emitter, EmitterEvent, ListenerId, OnceError};
pub use stream::EventStream;
