//! Per-priority-class ready queues.

use alloc::collections::VecDeque;

use super::task::PriorityClass;

/// One FIFO per priority class; round-robin within a class falls out of
/// always pushing to the back and popping from the front.
pub struct ReadyQueues {
    queues: [VecDeque<usize>; PriorityClass::COUNT],
}

impl ReadyQueues {
    pub const fn new() -> Self {
        Self {
            queues: [VecDeque::new(), VecDeque::new(), VecDeque::new(), VecDeque::new()],
        }
    }

    pub fn push(&mut self, class: PriorityClass, slot: usize) {
        let q = &mut self.queues[class.index()];
        if !q.contains(&slot) {
            q.push_back(slot);
        }
    }

    pub fn remove(&mut self, class: PriorityClass, slot: usize) {
        self.queues[class.index()].retain(|&s| s != slot);
    }

    /// Pop the next task to run: the highest non-empty priority class,
    /// round-robin within it.
    pub fn pop_next(&mut self) -> Option<usize> {
        for i in (0..PriorityClass::COUNT).rev() {
            if let Some(slot) = self.queues[i].pop_front() {
                return Some(slot);
            }
        }
        None
    }
}
