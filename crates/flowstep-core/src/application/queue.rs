//! Task queue
//!
//! Strict FIFO of work that is ready to run. Tasks are identified by their
//! id, never by content.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::domain::flow_state::FlowStateId;
use crate::domain::path::{ComponentRef, ConnectionRef};

/// Value object: Queue Task ID, increasing and never reused within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueTaskId(pub u64);

/// Run `component` in `flow_state`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTask {
    /// Identity of the task
    pub id: QueueTaskId,
    /// Flow state the component runs in
    pub flow_state: FlowStateId,
    /// Component to run
    pub component: ComponentRef,
    /// Connection line whose traversal produced this task
    pub connection_line: Option<ConnectionRef>,
}

/// FIFO of queue tasks
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: VecDeque<QueueTask>,
    next_id: u64,
}

impl TaskQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            tasks: VecDeque::new(),
            next_id: 1,
        }
    }

    /// Append a new task and return a copy of it
    pub fn push(
        &mut self,
        flow_state: FlowStateId,
        component: ComponentRef,
        connection_line: Option<ConnectionRef>,
    ) -> QueueTask {
        let task = QueueTask {
            id: QueueTaskId(self.next_id.max(1)),
            flow_state,
            component,
            connection_line,
        };
        self.next_id = task.id.0 + 1;
        self.tasks.push_back(task.clone());
        task
    }

    /// Append a task that already has an id, as when restoring a snapshot
    pub fn push_restored(&mut self, task: QueueTask) {
        self.next_id = self.next_id.max(task.id.0 + 1);
        self.tasks.push_back(task);
    }

    /// Remove and return the head task
    #[inline]
    pub fn pop_front(&mut self) -> Option<QueueTask> {
        self.tasks.pop_front()
    }

    /// Put tasks back at the head, keeping their relative order
    pub fn requeue_front(&mut self, tasks: Vec<QueueTask>) {
        for task in tasks.into_iter().rev() {
            self.tasks.push_front(task);
        }
    }

    /// Head task
    #[inline]
    pub fn front(&self) -> Option<&QueueTask> {
        self.tasks.front()
    }

    /// Remove a task by id
    pub fn remove(&mut self, id: QueueTaskId) -> Option<QueueTask> {
        let position = self.tasks.iter().position(|t| t.id == id)?;
        self.tasks.remove(position)
    }

    /// Remove every task of a flow state; returns how many were removed
    pub fn remove_for_flow_state(&mut self, flow_state: &FlowStateId) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|t| &t.flow_state != flow_state);
        before - self.tasks.len()
    }

    /// Number of queued tasks of a flow state
    pub fn count_for(&self, flow_state: &FlowStateId) -> usize {
        self.tasks.iter().filter(|t| &t.flow_state == flow_state).count()
    }

    /// Queued tasks, head first
    pub fn iter(&self) -> impl Iterator<Item = &QueueTask> {
        self.tasks.iter()
    }

    /// Number of queued tasks
    #[inline]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the queue is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Drop every task; ids keep increasing
    pub fn clear(&mut self) {
        self.tasks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::path::FlowRef;

    fn component(index: usize) -> ComponentRef {
        ComponentRef::new(FlowRef(0), index)
    }

    #[test]
    fn test_push_assigns_increasing_ids() {
        let mut queue = TaskQueue::new();
        let fs = FlowStateId::new();
        let a = queue.push(fs.clone(), component(0), None);
        let b = queue.push(fs, component(1), None);
        assert!(b.id > a.id);
        assert_eq!(queue.front(), Some(&a));
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = TaskQueue::new();
        let fs = FlowStateId::new();
        let pushed: Vec<QueueTaskId> = (0..5).map(|i| queue.push(fs.clone(), component(i), None).id).collect();
        let popped: Vec<QueueTaskId> = std::iter::from_fn(|| queue.pop_front()).map(|t| t.id).collect();
        assert_eq!(pushed, popped);
    }

    #[test]
    fn test_requeue_front_keeps_order() {
        let mut queue = TaskQueue::new();
        let fs = FlowStateId::new();
        let a = queue.push(fs.clone(), component(0), None);
        let b = queue.push(fs.clone(), component(1), None);
        let c = queue.push(fs, component(2), None);

        let first = queue.pop_front().unwrap();
        let second = queue.pop_front().unwrap();
        queue.requeue_front(vec![first, second]);

        let order: Vec<QueueTaskId> = queue.iter().map(|t| t.id).collect();
        assert_eq!(order, vec![a.id, b.id, c.id]);
    }

    #[test]
    fn test_remove_for_flow_state() {
        let mut queue = TaskQueue::new();
        let keep = FlowStateId::new();
        let drop = FlowStateId::new();
        queue.push(drop.clone(), component(0), None);
        queue.push(keep.clone(), component(1), None);
        queue.push(drop.clone(), component(2), None);

        assert_eq!(queue.remove_for_flow_state(&drop), 2);
        assert_eq!(queue.count_for(&keep), 1);
        assert_eq!(queue.count_for(&drop), 0);
    }

    #[test]
    fn test_restored_ids_are_not_reused() {
        let mut queue = TaskQueue::new();
        let fs = FlowStateId::new();
        queue.push_restored(QueueTask {
            id: QueueTaskId(40),
            flow_state: fs.clone(),
            component: component(0),
            connection_line: None,
        });
        let next = queue.push(fs, component(1), None);
        assert_eq!(next.id, QueueTaskId(41));
        assert!(queue.remove(QueueTaskId(40)).is_some());
        assert_eq!(queue.len(), 1);
    }
}
