//! The pending-task queue: priority-ordered, with lazy deletion so
//! cancelling a queued task never reshuffles the heap.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use time::OffsetDateTime;

use crate::task::TaskId;

#[derive(Debug, PartialEq, Eq)]
struct QueuedTask {
    priority: i32,
    created: OffsetDateTime,
    id: TaskId,
}

impl Ord for QueuedTask {
    /// Higher priority first; within a priority, earlier submission first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.created.cmp(&self.created))
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<QueuedTask>,
    /// Cancelled-while-pending ids, dropped when they surface in a pop.
    cancelled: HashSet<TaskId>,
}

/// Blocking priority queue shared between the submitting thread and the
/// worker pool. Popping waits with a bounded timeout so workers can observe
/// shutdown.
#[derive(Default)]
pub struct TaskQueue {
    inner: Mutex<Inner>,
    available: Condvar,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, id: TaskId, priority: i32, created: OffsetDateTime) {
        let mut inner = self.inner.lock().unwrap();
        inner.heap.push(QueuedTask {
            priority,
            created,
            id,
        });
        drop(inner);
        self.available.notify_one();
    }

    /// Next runnable task id, or `None` once `timeout` passes with nothing
    /// to run. Cancelled entries are discarded as they surface.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<TaskId> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            while let Some(top) = inner.heap.pop() {
                if inner.cancelled.remove(&top.id) {
                    continue;
                }
                return Some(top.id);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .available
                .wait_timeout(inner, deadline - now)
                .unwrap();
            inner = guard;
        }
    }

    /// Mark a pending task cancelled. `false` when the id is not queued,
    /// which means it already started or finished.
    pub fn cancel(&self, id: TaskId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let queued = inner.heap.iter().any(|task| task.id == id);
        if queued {
            inner.cancelled.insert(id);
        }
        queued
    }

    /// Pending entries, excluding those cancelled but not yet discarded.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .heap
            .iter()
            .filter(|task| !inner.cancelled.contains(&task.id))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POP: Duration = Duration::from_millis(10);

    fn push_all(queue: &TaskQueue, priorities: &[i32]) {
        let base = OffsetDateTime::now_utc();
        for (index, priority) in priorities.iter().enumerate() {
            queue.push(
                TaskId(index as u64),
                *priority,
                base + time::Duration::milliseconds(index as i64),
            );
        }
    }

    #[test]
    fn test_priority_then_submission_order() {
        let queue = TaskQueue::new();
        push_all(&queue, &[5, 1, 5]);
        assert_eq!(queue.pop_timeout(POP), Some(TaskId(0)));
        assert_eq!(queue.pop_timeout(POP), Some(TaskId(2)));
        assert_eq!(queue.pop_timeout(POP), Some(TaskId(1)));
        assert_eq!(queue.pop_timeout(POP), None);
    }

    #[test]
    fn test_cancelled_entry_never_pops() {
        let queue = TaskQueue::new();
        push_all(&queue, &[1, 9]);
        assert!(queue.cancel(TaskId(1)));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop_timeout(POP), Some(TaskId(0)));
        assert_eq!(queue.pop_timeout(POP), None);
    }

    #[test]
    fn test_cancel_unknown_id_reports_false() {
        let queue = TaskQueue::new();
        push_all(&queue, &[1]);
        assert!(!queue.cancel(TaskId(42)));
    }

    #[test]
    fn test_pop_wakes_on_push() {
        let queue = std::sync::Arc::new(TaskQueue::new());
        let popper = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.pop_timeout(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.push(TaskId(7), 0, OffsetDateTime::now_utc());
        assert_eq!(popper.join().unwrap(), Some(TaskId(7)));
    }
}
