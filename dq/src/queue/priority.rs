//! Priority queue with FIFO tie-breaking

use std::collections::BinaryHeap;

use super::Queue;

/// Heap entry: `sequence` is assigned at enqueue time and breaks priority
/// ties so equal priorities dequeue in submission order
#[derive(Debug)]
pub struct PriorityNode<T> {
    pub value: T,
    pub priority: i64,
    pub sequence: u64,
}

impl<T> Eq for PriorityNode<T> {}

impl<T> PartialEq for PriorityNode<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl<T> Ord for PriorityNode<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed so the std max-heap pops the lowest (priority, sequence)
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl<T> PartialOrd for PriorityNode<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Binary min-heap keyed by `(priority, sequence)`; O(log n)
/// enqueue/dequeue, O(1) peek/size
#[derive(Debug, Default)]
pub struct PriorityQueue<T> {
    heap: BinaryHeap<PriorityNode<T>>,
    next_sequence: u64,
}

impl<T> PriorityQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_sequence: 0,
        }
    }
}

impl<T: Send> Queue<T> for PriorityQueue<T> {
    fn size(&self) -> usize {
        self.heap.len()
    }

    fn peek(&self) -> Option<&T> {
        self.heap.peek().map(|node| &node.value)
    }

    fn dequeue(&mut self) -> Option<T> {
        self.heap.pop().map(|node| node.value)
    }

    fn enqueue(&mut self, value: T, priority: i64) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(PriorityNode {
            value,
            priority,
            sequence,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_lower_priority_dequeues_first() {
        let mut queue = PriorityQueue::new();
        queue.enqueue("a", 3);
        queue.enqueue("b", 1);
        queue.enqueue("c", 2);

        assert_eq!(queue.dequeue(), Some("b"));
        assert_eq!(queue.dequeue(), Some("c"));
        assert_eq!(queue.dequeue(), Some("a"));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_equal_priorities_keep_submission_order() {
        let mut queue = PriorityQueue::new();
        queue.enqueue("first", 0);
        queue.enqueue("second", 0);
        queue.enqueue("third", 0);

        assert_eq!(queue.dequeue(), Some("first"));
        assert_eq!(queue.dequeue(), Some("second"));
        assert_eq!(queue.dequeue(), Some("third"));
    }

    #[test]
    fn test_later_higher_priority_overtakes() {
        let mut queue = PriorityQueue::new();
        queue.enqueue("slow", 5);
        queue.enqueue("urgent", -1);

        assert_eq!(queue.peek(), Some(&"urgent"));
        assert_eq!(queue.dequeue(), Some("urgent"));
        assert_eq!(queue.dequeue(), Some("slow"));
    }

    #[test]
    fn test_node_ordering_reversed_for_min_pop() {
        let a = PriorityNode { value: (), priority: 0, sequence: 0 };
        let b = PriorityNode { value: (), priority: 0, sequence: 1 };
        let c = PriorityNode { value: (), priority: 1, sequence: 0 };

        // The max-heap pops the greatest node, so "dequeues sooner" must
        // compare as greater
        assert!(a > b);
        assert!(a > c);
        assert!(b > c);
    }

    #[test]
    fn test_empty_queue() {
        let mut queue: PriorityQueue<u8> = PriorityQueue::new();
        assert!(queue.is_empty());
        assert!(queue.peek().is_none());
        assert_eq!(queue.dequeue(), None);
    }

    proptest! {
        #[test]
        fn prop_dequeue_is_stable_sort(entries in proptest::collection::vec((0u16..1000, -5i64..5), 0..200)) {
            let mut queue = PriorityQueue::new();
            for (index, (value, priority)) in entries.iter().enumerate() {
                queue.enqueue((*value, index), *priority);
            }

            let mut expected: Vec<_> = entries
                .iter()
                .enumerate()
                .map(|(index, (value, priority))| (*priority, index, *value))
                .collect();
            expected.sort();

            for (priority, index, value) in expected {
                let _ = priority;
                prop_assert_eq!(queue.dequeue(), Some((value, index)));
            }
            prop_assert!(queue.is_empty());
        }
    }
}
