//! Per-task lifecycle (C8, §4.5): `waiting → ready → executing → memory`,
//! plus the terminal `released` state handled externally by the worker
//! (release removes the task from every map rather than flipping a flag).
//!
//! The "transitions table" design note is realized here as an exhaustive
//! match over `(from, to)` state pairs rather than a runtime dispatch table
//! keyed by a tuple.

use crate::key::{Key, Priority};
use bytes::Bytes;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Waiting,
    Ready,
    Executing,
    Memory,
}

#[derive(Debug, Clone)]
pub struct TaskPayload {
    pub func: Bytes,
    pub args: Bytes,
    pub kwargs: Bytes,
}

#[derive(Debug, Clone)]
pub struct Task {
    pub key: Key,
    pub payload: TaskPayload,
    pub priority: Priority,
    pub state: TaskState,
    pub dependencies: HashSet<Key>,
    pub waiting_for_data: HashSet<Key>,
}

impl Task {
    pub fn new(
        key: Key,
        payload: TaskPayload,
        priority: Priority,
        dependencies: HashSet<Key>,
    ) -> Self {
        let waiting_for_data = dependencies.clone();
        let state = if waiting_for_data.is_empty() {
            TaskState::Ready
        } else {
            TaskState::Waiting
        };
        Self {
            key,
            payload,
            priority,
            state,
            dependencies,
            waiting_for_data,
        }
    }

    /// Attempts `self.state -> to`. Returns whether the transition was
    /// legal; illegal pairs are logged no-ops (§4.5, design note on
    /// unknown-pair logging).
    pub fn transition(&mut self, to: TaskState) -> bool {
        use TaskState::*;
        let valid = matches!(
            (self.state, to),
            (Waiting, Ready) | (Waiting, Memory) | (Ready, Executing) | (Ready, Memory) | (Executing, Memory)
        );
        if valid {
            trace!("[task] {} {:?} -> {:?}", self.key, self.state, to);
            self.state = to;
        } else {
            warn!(
                "[task] ignoring illegal transition for {}: {:?} -> {:?}",
                self.key, self.state, to
            );
        }
        valid
    }

    /// Marks `dep` as satisfied; returns true once `waiting_for_data` is
    /// fully drained (the caller then transitions `waiting -> ready`).
    pub fn dependency_satisfied(&mut self, dep: &str) -> bool {
        self.waiting_for_data.remove(dep);
        self.waiting_for_data.is_empty()
    }
}

/// The ready priority queue (§4.5): smaller priority tuples win.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    heap: BinaryHeap<Reverse<(Priority, Key)>>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, priority: Priority, key: Key) {
        self.heap.push(Reverse((priority, key)));
    }

    pub fn pop(&mut self) -> Option<Key> {
        self.heap.pop().map(|Reverse((_, key))| key)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::PriorityCounter;

    fn payload() -> TaskPayload {
        TaskPayload {
            func: Bytes::from_static(b"func"),
            args: Bytes::from_static(b"args"),
            kwargs: Bytes::from_static(b"kwargs"),
        }
    }

    #[test]
    fn new_task_with_no_deps_starts_ready() {
        let task = Task::new(
            "A".to_string(),
            payload(),
            Priority {
                scheduler_priority: vec![0],
                counter: 0,
            },
            HashSet::new(),
        );
        assert_eq!(task.state, TaskState::Ready);
    }

    #[test]
    fn new_task_with_deps_starts_waiting() {
        let mut deps = HashSet::new();
        deps.insert("dep".to_string());
        let task = Task::new(
            "B".to_string(),
            payload(),
            Priority {
                scheduler_priority: vec![0],
                counter: 0,
            },
            deps,
        );
        assert_eq!(task.state, TaskState::Waiting);
        assert!(!task.waiting_for_data.is_empty());
    }

    #[test]
    fn legal_transitions_succeed_illegal_are_noops() {
        let mut task = Task::new(
            "A".to_string(),
            payload(),
            Priority {
                scheduler_priority: vec![0],
                counter: 0,
            },
            HashSet::new(),
        );
        assert!(task.transition(TaskState::Executing));
        assert_eq!(task.state, TaskState::Executing);

        // executing -> ready is not a legal pair; must be a no-op
        assert!(!task.transition(TaskState::Ready));
        assert_eq!(task.state, TaskState::Executing);

        assert!(task.transition(TaskState::Memory));
        assert_eq!(task.state, TaskState::Memory);
    }

    #[test]
    fn dependency_satisfied_reports_when_fully_drained() {
        let mut deps = HashSet::new();
        deps.insert("d1".to_string());
        deps.insert("d2".to_string());
        let mut task = Task::new(
            "C".to_string(),
            payload(),
            Priority {
                scheduler_priority: vec![0],
                counter: 0,
            },
            deps,
        );
        assert!(!task.dependency_satisfied("d1"));
        assert!(task.dependency_satisfied("d2"));
    }

    #[test]
    fn ready_queue_orders_by_priority_tuple() {
        let counter = PriorityCounter::new();
        let mut queue = ReadyQueue::new();
        queue.push(
            Priority {
                scheduler_priority: vec![5],
                counter: counter.next(),
            },
            "slow".to_string(),
        );
        queue.push(
            Priority {
                scheduler_priority: vec![1],
                counter: counter.next(),
            },
            "fast".to_string(),
        );
        assert_eq!(queue.pop().as_deref(), Some("fast"));
        assert_eq!(queue.pop().as_deref(), Some("slow"));
    }

    #[test]
    fn ready_queue_breaks_ties_with_later_arrival_first() {
        let counter = PriorityCounter::new();
        let mut queue = ReadyQueue::new();
        queue.push(
            Priority {
                scheduler_priority: vec![0],
                counter: counter.next(),
            },
            "first".to_string(),
        );
        queue.push(
            Priority {
                scheduler_priority: vec![0],
                counter: counter.next(),
            },
            "second".to_string(),
        );
        // later arrival (lower/more negative counter) sorts earlier
        assert_eq!(queue.pop().as_deref(), Some("second"));
        assert_eq!(queue.pop().as_deref(), Some("first"));
    }
}
