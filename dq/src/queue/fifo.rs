//! Strict insertion-order queue

use std::collections::VecDeque;

use super::Queue;

/// FIFO queue with O(1) enqueue/dequeue; the priority argument is ignored
#[derive(Debug, Default)]
pub struct FifoQueue<T> {
    items: VecDeque<T>,
}

impl<T> FifoQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self { items: VecDeque::new() }
    }
}

impl<T: Send> Queue<T> for FifoQueue<T> {
    fn size(&self) -> usize {
        self.items.len()
    }

    fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    fn dequeue(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    fn enqueue(&mut self, value: T, _priority: i64) {
        self.items.push_back(value);
    }
}
