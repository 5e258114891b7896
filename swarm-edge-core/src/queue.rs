//! Fair priority queue for pending tasks
//!
//! Ordering is explicit: higher [`TaskPriority`] first, then insertion sequence
//! (FIFO among equals). Deferred tasks go back in with their original sequence
//! number, so a deferral never costs a task its place among its peers.

use alloc::collections::BinaryHeap;
use alloc::vec::Vec;
use core::cmp::Ordering;

use crate::resource::ResourceSnapshot;
use crate::scheduler::{Action, AdaptiveScheduler, Decision, Task, TaskState};

#[derive(Debug, Clone)]
struct QueueEntry {
    seq: u64,
    task: Task,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // BinaryHeap is a max-heap: "greater" pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.task
            .priority
            .cmp(&other.task.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Result of admitting one queued task
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    /// The task with its post-decision state
    pub task: Task,
    /// The scheduler's decision
    pub decision: Decision,
}

/// Priority queue with FIFO tie-break
#[derive(Debug, Default)]
pub struct TaskQueue {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
}

impl TaskQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a task. Its state is reset to `Pending`.
    pub fn push(&mut self, mut task: Task) {
        task.state = TaskState::Pending;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueueEntry { seq, task });
    }

    /// Remove the next task in priority/FIFO order
    pub fn pop(&mut self) -> Option<Task> {
        self.heap.pop().map(|e| e.task)
    }

    /// Look at the next task without removing it
    pub fn peek(&self) -> Option<&Task> {
        self.heap.peek().map(|e| &e.task)
    }

    /// Number of queued tasks
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Run every queued task through `scheduler` once, in queue order.
    ///
    /// Executed and skipped tasks leave the queue; deferred tasks are re-queued
    /// with their original sequence number. Returns one [`Admission`] per task
    /// in the order they were decided.
    pub fn drain_admissions(
        &mut self,
        scheduler: &AdaptiveScheduler,
        snapshot: &ResourceSnapshot,
    ) -> Vec<Admission> {
        let mut admissions = Vec::with_capacity(self.heap.len());
        let mut deferred = Vec::new();

        while let Some(QueueEntry { seq, mut task }) = self.heap.pop() {
            let decision = scheduler.admit(&mut task, snapshot);
            if decision.action == Action::Defer {
                deferred.push(QueueEntry {
                    seq,
                    task: task.clone(),
                });
            }
            admissions.push(Admission { task, decision });
        }

        self.heap.extend(deferred);
        admissions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{SchedulerConfig, TaskPriority};
    use crate::traits::TaskId;

    fn ids(admissions: &[Admission]) -> Vec<u64> {
        admissions.iter().map(|a| a.task.id.0).collect()
    }

    #[test]
    fn pops_by_priority_then_fifo() {
        let mut q = TaskQueue::new();
        q.push(Task::new(1, TaskPriority::Low, 1.0, 0.1));
        q.push(Task::new(2, TaskPriority::High, 1.0, 0.1));
        q.push(Task::new(3, TaskPriority::Low, 1.0, 0.1));
        q.push(Task::new(4, TaskPriority::Critical, 1.0, 0.1));
        q.push(Task::new(5, TaskPriority::High, 1.0, 0.1));

        let order: Vec<u64> = core::iter::from_fn(|| q.pop()).map(|t| t.id.0).collect();
        assert_eq!(order, vec![4, 2, 5, 1, 3]);
        assert!(q.is_empty());
    }

    #[test]
    fn peek_matches_pop() {
        let mut q = TaskQueue::new();
        q.push(Task::new(10, TaskPriority::Normal, 1.0, 0.1));
        q.push(Task::new(11, TaskPriority::High, 1.0, 0.1));
        assert_eq!(q.peek().map(|t| t.id), Some(TaskId(11)));
        assert_eq!(q.pop().map(|t| t.id), Some(TaskId(11)));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn drain_requeues_deferred_in_original_order() {
        let scheduler = AdaptiveScheduler::new(SchedulerConfig::default()).unwrap();
        let snapshot = ResourceSnapshot::new(0.5, 0.5, 0.2, 0);

        let mut q = TaskQueue::new();
        q.push(Task::new(1, TaskPriority::Normal, 80.0, 4.0)); // deferred
        q.push(Task::new(2, TaskPriority::Normal, 0.5, 0.1)); // executed
        q.push(Task::new(3, TaskPriority::Normal, 90.0, 6.0)); // deferred
        q.push(Task::new(4, TaskPriority::Critical, 500.0, 60.0)); // executed

        let admissions = q.drain_admissions(&scheduler, &snapshot);
        assert_eq!(ids(&admissions), vec![4, 1, 2, 3]);
        assert_eq!(admissions[0].task.state, TaskState::Executed);
        assert_eq!(admissions[1].task.state, TaskState::Deferred);

        assert_eq!(q.len(), 2);
        q.push(Task::new(5, TaskPriority::Normal, 0.5, 0.1));
        let order: Vec<u64> = core::iter::from_fn(|| q.pop()).map(|t| t.id.0).collect();
        assert_eq!(order, vec![1, 3, 5]);
    }
}
