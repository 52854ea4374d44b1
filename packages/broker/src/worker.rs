//! Worker records: identity, lifecycle state, queue, and ledger.

use std::fmt::Write as _;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};

use crate::queue::{Policy, TaskQueue};
use crate::stats::WorkerStats;
use crate::task::TaskRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Registered and able to take a dispatch.
    Available,
    /// Exactly one task in flight; no further dispatch until the reply.
    Busy,
    /// Out of service; the slot may be reused by a new registration.
    Dead,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            WorkerStatus::Available => "available",
            WorkerStatus::Busy => "busy",
            WorkerStatus::Dead => "dead",
        };
        f.write_str(label)
    }
}

/// One worker as the broker sees it. The identity is fixed at registration;
/// everything else mutates under the record's own lock.
pub struct Worker {
    identity: Bytes,
    inner: Mutex<WorkerInner>,
}

pub struct WorkerInner {
    pub status: WorkerStatus,
    pub tasks: TaskQueue,
    pub stats: WorkerStats,
    /// The dispatched task awaiting its reply while the worker is BUSY.
    pub in_flight: Option<TaskRef>,
}

impl Worker {
    pub fn new(identity: Bytes, policy: Policy) -> Arc<Self> {
        Arc::new(Self {
            identity,
            inner: Mutex::new(WorkerInner {
                status: WorkerStatus::Available,
                tasks: TaskQueue::new(policy),
                stats: WorkerStats::default(),
                in_flight: None,
            }),
        })
    }

    pub fn identity(&self) -> &Bytes {
        &self.identity
    }

    /// Locks the record. Callers must already hold the registry lock or be
    /// otherwise outside any registry scan (lock order: registry first).
    pub fn lock(&self) -> MutexGuard<'_, WorkerInner> {
        self.inner.lock()
    }
}

impl WorkerInner {
    pub fn is_live(&self) -> bool {
        self.status != WorkerStatus::Dead
    }

    pub fn runtime_load(&self) -> f64 {
        self.stats.runtime_load()
    }

    pub fn runtime_effort(&self) -> f64 {
        self.stats.runtime_effort(self.status == WorkerStatus::Busy)
    }

    /// Human-readable record state for the diagnostic snapshot.
    pub fn describe(&self, identity: &Bytes, out: &mut String) {
        let _ = writeln!(
            out,
            "  worker {} status {}",
            String::from_utf8_lossy(identity),
            self.status
        );
        let _ = writeln!(
            out,
            "  assigned tasks {}, completed tasks {}",
            self.stats.assigned_tasks, self.stats.completed_tasks
        );
        let _ = writeln!(
            out,
            "  load cpu {:.4} memory {:.4} network {:.4}",
            self.stats.cpu_load, self.stats.memory_load, self.stats.network_load
        );
        let _ = writeln!(out, "  pending tasks");
        self.tasks.for_each(&mut |task| {
            let _ = writeln!(
                out,
                "    client {} request |{}|",
                String::from_utf8_lossy(&task.client_id),
                String::from_utf8_lossy(&task.request)
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::task::Task;

    #[test]
    fn new_worker_starts_available_and_idle() {
        let worker = Worker::new(Bytes::from_static(b"server_fresh01"), Policy::RoundRobin);
        let inner = worker.lock();
        assert_eq!(inner.status, WorkerStatus::Available);
        assert!(inner.tasks.is_empty());
        assert!(inner.in_flight.is_none());
        assert_eq!(inner.runtime_load(), 0.0);
    }

    #[test]
    fn describe_lists_pending_tasks() {
        let worker = Worker::new(Bytes::from_static(b"server_dump001"), Policy::RoundRobin);
        {
            let mut inner = worker.lock();
            let task = Task::new(Bytes::from_static(b"client_x"), Bytes::from_static(b"ls"));
            inner.tasks.push(task.clone()).unwrap();
            inner.stats.charge(&task.request);
        }
        let mut out = String::new();
        worker.lock().describe(worker.identity(), &mut out);
        assert!(out.contains("server_dump001"));
        assert!(out.contains("request |ls|"));
        assert!(out.contains("assigned tasks 1"));
    }
}
