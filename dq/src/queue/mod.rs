//! Queue abstraction backing the dispatcher
//!
//! The dispatcher only ever stores run-closures, so the queue contract is
//! deliberately narrow: non-blocking, `None` on empty, priority optional.
//! [`FifoQueue`] ignores priority entirely; [`PriorityQueue`] orders by
//! `(priority, sequence)` so equal priorities keep submission order.

mod fifo;
mod priority;

pub use fifo::FifoQueue;
pub use priority::{PriorityNode, PriorityQueue};

use serde::{Deserialize, Serialize};

/// Ordered container contract consumed by the dispatcher
pub trait Queue<T>: Send {
    /// Number of queued values
    fn size(&self) -> usize;

    /// Whether the queue holds no values
    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Next value to be dequeued, if any
    fn peek(&self) -> Option<&T>;

    /// Remove and return the next value; `None` on empty, never an error
    fn dequeue(&mut self) -> Option<T>;

    /// Insert a value; `priority` is advisory (lower dequeues sooner)
    fn enqueue(&mut self, value: T, priority: i64);
}

/// Which queue implementation a dispatcher is built with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    /// Strict insertion order, priority ignored
    Fifo,

    /// Binary min-heap over `(priority, sequence)`
    #[default]
    Priority,
}

impl QueueKind {
    /// Build an empty queue of this kind
    pub fn build<T: Send + 'static>(self) -> Box<dyn Queue<T> + Send> {
        match self {
            QueueKind::Fifo => Box::new(FifoQueue::new()),
            QueueKind::Priority => Box::new(PriorityQueue::new()),
        }
    }
}
