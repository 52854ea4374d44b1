//! Per-worker task queues.
//!
//! One contract, multiple backings, chosen per instance: a rotating FIFO
//! whose head advances on every read (so repeated peeks walk the whole
//! queue), a uniform-random selector, or a caller-supplied backend for
//! custom scheduling policies.

use std::collections::VecDeque;

use thiserror::Error;

use crate::task::{Task, TaskRef};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue backing store cannot grow")]
    OutOfMemory,
    #[error("queue is empty")]
    Empty,
    #[error("task not present in queue")]
    NotFound,
}

/// Selection policy for the built-in backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// Head rotates by one position on each peek; k consecutive peeks on a
    /// static queue of size k visit every element once.
    #[default]
    RoundRobin,
    /// Peek returns an element at a uniformly chosen index.
    Random,
}

/// Capability set every queue backing must provide. Removal compares task
/// allocation identity, never payloads.
pub trait QueueBackend: Send {
    fn push(&mut self, task: TaskRef) -> Result<(), QueueError>;
    fn remove(&mut self, task: &TaskRef) -> Result<TaskRef, QueueError>;
    fn peek(&mut self) -> Option<TaskRef>;
    fn len(&self) -> usize;
    fn for_each(&self, visit: &mut dyn FnMut(&TaskRef));
}

/// Policy-tagged queue handed to each worker record.
pub struct TaskQueue {
    inner: Box<dyn QueueBackend>,
}

impl TaskQueue {
    pub fn new(policy: Policy) -> Self {
        let inner: Box<dyn QueueBackend> = match policy {
            Policy::RoundRobin => Box::new(RotatingQueue::default()),
            Policy::Random => Box::new(RandomQueue::default()),
        };
        Self { inner }
    }

    /// Installs a caller-supplied backend instead of a built-in policy.
    pub fn with_backend(inner: Box<dyn QueueBackend>) -> Self {
        Self { inner }
    }

    pub fn push(&mut self, task: TaskRef) -> Result<(), QueueError> {
        self.inner.push(task)
    }

    pub fn remove(&mut self, task: &TaskRef) -> Result<TaskRef, QueueError> {
        self.inner.remove(task)
    }

    pub fn peek(&mut self) -> Option<TaskRef> {
        self.inner.peek()
    }

    /// Peek-then-remove: takes one task according to the backing policy.
    pub fn pop(&mut self) -> Option<TaskRef> {
        let task = self.inner.peek()?;
        self.inner.remove(&task).ok()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    pub fn for_each(&self, visit: &mut dyn FnMut(&TaskRef)) {
        self.inner.for_each(visit)
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue").field("len", &self.len()).finish()
    }
}

/// FIFO with a rotating head: enqueue at the tail, and every peek returns
/// the current head then sends it to the back. Dispatch pairs peek with
/// remove, which yields head-rotating pops without a cursor.
#[derive(Default)]
pub struct RotatingQueue {
    items: VecDeque<TaskRef>,
}

impl QueueBackend for RotatingQueue {
    fn push(&mut self, task: TaskRef) -> Result<(), QueueError> {
        self.items
            .try_reserve(1)
            .map_err(|_| QueueError::OutOfMemory)?;
        self.items.push_back(task);
        Ok(())
    }

    fn remove(&mut self, task: &TaskRef) -> Result<TaskRef, QueueError> {
        if self.items.is_empty() {
            return Err(QueueError::Empty);
        }
        let index = self
            .items
            .iter()
            .position(|t| Task::same(t, task))
            .ok_or(QueueError::NotFound)?;
        self.items.remove(index).ok_or(QueueError::NotFound)
    }

    fn peek(&mut self) -> Option<TaskRef> {
        let head = self.items.front()?.clone();
        self.items.rotate_left(1);
        Some(head)
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn for_each(&self, visit: &mut dyn FnMut(&TaskRef)) {
        for task in &self.items {
            visit(task);
        }
    }
}

/// Array-backed queue whose peek picks a uniformly random element.
#[derive(Default)]
pub struct RandomQueue {
    items: Vec<TaskRef>,
}

impl QueueBackend for RandomQueue {
    fn push(&mut self, task: TaskRef) -> Result<(), QueueError> {
        self.items
            .try_reserve(1)
            .map_err(|_| QueueError::OutOfMemory)?;
        self.items.push(task);
        Ok(())
    }

    fn remove(&mut self, task: &TaskRef) -> Result<TaskRef, QueueError> {
        if self.items.is_empty() {
            return Err(QueueError::Empty);
        }
        let index = self
            .items
            .iter()
            .position(|t| Task::same(t, task))
            .ok_or(QueueError::NotFound)?;
        Ok(self.items.remove(index))
    }

    fn peek(&mut self) -> Option<TaskRef> {
        if self.items.is_empty() {
            return None;
        }
        let index = fastrand::usize(..self.items.len());
        Some(self.items[index].clone())
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn for_each(&self, visit: &mut dyn FnMut(&TaskRef)) {
        for task in &self.items {
            visit(task);
        }
    }
}
