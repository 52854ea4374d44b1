//! The unit of work the broker moves around.

use std::sync::Arc;

use bytes::Bytes;

/// An accepted client request. Both fields are carried verbatim from the
/// frontend envelope to the dispatch envelope; the broker never rewrites
/// them.
#[derive(Debug)]
pub struct Task {
    pub client_id: Bytes,
    pub request: Bytes,
}

/// Shared handle to a task. A task lives in exactly one queue or is
/// in flight to exactly one worker; the handle's allocation identity is what
/// queue removal compares, so two tasks with identical payloads never alias.
pub type TaskRef = Arc<Task>;

impl Task {
    pub fn new(client_id: Bytes, request: Bytes) -> TaskRef {
        Arc::new(Task { client_id, request })
    }

    /// Identity comparison: same allocation, not same payload.
    pub fn same(a: &TaskRef, b: &TaskRef) -> bool {
        Arc::ptr_eq(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_payloads_are_distinct_tasks() {
        let a = Task::new(Bytes::from_static(b"client_a"), Bytes::from_static(b"ls"));
        let b = Task::new(Bytes::from_static(b"client_a"), Bytes::from_static(b"ls"));
        assert!(Task::same(&a, &a.clone()));
        assert!(!Task::same(&a, &b));
    }
}
