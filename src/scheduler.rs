//! Cooperative task queues.
//!
//! Each physical core runs one single-threaded queue draining a priority
//! heap of `(due_ms, priority, seq)` entries. A task is a closure returning
//! the number of milliseconds until its next run; returning 0 retires it.
//! Deadlines are in whole milliseconds from the queue's epoch, so two tasks
//! landing on the same millisecond are ordered by priority (higher value
//! first). Tasks run to completion; there is no cancellation, and timeouts
//! live on lock acquisitions inside the tasks themselves.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// A scheduled task; returns ms until its next run, 0 to retire.
pub type TaskFn = Box<dyn FnMut() -> u64 + Send>;

struct Entry {
    due_ms: u64,
    priority: u8,
    seq: u64,
    label: &'static str,
    task: TaskFn,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due_ms == other.due_ms && self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert the deadline so the earliest one
        // pops first. Priority stays uninverted: the higher value wins ties.
        other
            .due_ms
            .cmp(&self.due_ms)
            .then_with(|| self.priority.cmp(&other.priority))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Single-threaded cooperative task queue; one instance per core.
pub struct TaskQueue {
    name: &'static str,
    epoch: Instant,
    heap: BinaryHeap<Entry>,
    seq: u64,
}

impl TaskQueue {
    /// An empty queue named after its core.
    pub fn new(name: &'static str) -> Self {
        TaskQueue {
            name,
            epoch: Instant::now(),
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Queue `task` to first run `delay_ms` from now.
    pub fn spawn(
        &mut self,
        label: &'static str,
        priority: u8,
        delay_ms: u64,
        task: impl FnMut() -> u64 + Send + 'static,
    ) {
        let seq = self.seq;
        self.seq += 1;
        let due_ms = self.now_ms() + delay_ms;
        self.heap.push(Entry {
            due_ms,
            priority,
            seq,
            label,
            task: Box::new(task),
        });
    }

    /// Drain the queue until every task has retired.
    pub fn run(mut self) {
        debug!(queue = self.name, "task queue running");
        while let Some(mut entry) = self.heap.pop() {
            let now = self.now_ms();
            if entry.due_ms > now {
                thread::sleep(Duration::from_millis(entry.due_ms - now));
            }
            let next = (entry.task)();
            trace!(
                queue = self.name,
                task = entry.label,
                next_ms = next,
                "task ran"
            );
            if next > 0 {
                entry.due_ms = self.now_ms() + next;
                entry.seq = self.seq;
                self.seq += 1;
                self.heap.push(entry);
            } else {
                debug!(queue = self.name, task = entry.label, "task retired");
            }
        }
        debug!(queue = self.name, "task queue drained");
    }

    /// Run the queue on its own named thread.
    pub fn start(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(self.name.to_string())
            .spawn(move || self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
    use std::sync::Arc;

    fn entry(due_ms: u64, priority: u8, seq: u64) -> Entry {
        Entry {
            due_ms,
            priority,
            seq,
            label: "test",
            task: Box::new(|| 0),
        }
    }

    #[test]
    fn earliest_deadline_pops_first() {
        let mut heap = BinaryHeap::new();
        heap.push(entry(30, 0, 0));
        heap.push(entry(5, 0, 1));
        heap.push(entry(20, 0, 2));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.due_ms)).collect();
        assert_eq!(order, vec![5, 20, 30]);
    }

    #[test]
    fn higher_priority_value_wins_same_millisecond() {
        let mut heap = BinaryHeap::new();
        heap.push(entry(10, 0, 0));
        heap.push(entry(10, 5, 1));

        let first = heap.pop().map(|e| e.priority);
        assert_eq!(first, Some(5));
    }

    #[test]
    fn tasks_run_in_deadline_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut queue = TaskQueue::new("test");

        let o = Arc::clone(&order);
        queue.spawn("late", 0, 30, move || {
            o.lock().push("late");
            0
        });
        let o = Arc::clone(&order);
        queue.spawn("early", 0, 5, move || {
            o.lock().push("early");
            0
        });
        queue.run();

        assert_eq!(*order.lock(), vec!["early", "late"]);
    }

    #[test]
    fn returning_a_delay_reschedules_until_retired() {
        let runs = Arc::new(AtomicU32::new(0));
        let mut queue = TaskQueue::new("test");

        let counter = Arc::clone(&runs);
        queue.spawn("ticker", 0, 0, move || {
            let n = counter.fetch_add(1, AtomicOrdering::SeqCst) + 1;
            if n < 3 {
                1
            } else {
                0
            }
        });
        queue.run();

        assert_eq!(runs.load(AtomicOrdering::SeqCst), 3);
    }
}
