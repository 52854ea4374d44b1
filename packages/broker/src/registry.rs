//! The worker registry: a fixed-capacity slot table plus the selection
//! scans that drive placement and dispatch.
//!
//! Locking: the table lock is always taken before any worker record lock,
//! and every scan skips DEAD slots. Slots are never deleted; a DEAD slot is
//! reused by the next registration before the high-water mark grows.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info};
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::Notify;

use crate::error::BrokerError;
use crate::queue::Policy;
use crate::task::TaskRef;
use crate::worker::{Worker, WorkerStatus};

/// Hard cap on tracked workers.
pub const MAX_WORKERS: usize = 1024;

/// How a new request is mapped onto a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlacementStrategy {
    /// Spread by effort score alone.
    UniformDistribution,
    /// Prefer the least-loaded worker that is already warm; fall back to
    /// effort when every live worker is idle or saturated.
    #[default]
    ResourcesManagement,
}

impl std::fmt::Display for PlacementStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PlacementStrategy::UniformDistribution => "uniform-distribution",
            PlacementStrategy::ResourcesManagement => "resources-management",
        };
        f.write_str(label)
    }
}

pub struct Registry {
    slots: Mutex<Vec<Arc<Worker>>>,
    strategy: PlacementStrategy,
    queue_policy: Policy,
    /// Woken whenever dispatchable work may exist: enqueue, completion,
    /// registration, relocation.
    dispatch_wakeup: Notify,
}

impl Registry {
    pub fn new(strategy: PlacementStrategy, queue_policy: Policy) -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            strategy,
            queue_policy,
            dispatch_wakeup: Notify::new(),
        }
    }

    pub fn strategy(&self) -> PlacementStrategy {
        self.strategy
    }

    /// High-water mark of used slots, DEAD ones included.
    pub fn worker_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Workers currently AVAILABLE or BUSY.
    pub fn live_count(&self) -> usize {
        self.slots
            .lock()
            .iter()
            .filter(|w| w.lock().is_live())
            .count()
    }

    pub fn get(&self, slot: usize) -> Option<Arc<Worker>> {
        self.slots.lock().get(slot).cloned()
    }

    pub(crate) fn lock_slots(&self) -> MutexGuard<'_, Vec<Arc<Worker>>> {
        self.slots.lock()
    }

    /// Signals the dispatch loop that work may be waiting.
    pub fn notify_dispatch(&self) {
        self.dispatch_wakeup.notify_one();
    }

    /// Parks the dispatch loop until the next `notify_dispatch`, bounded by
    /// a 1 ms fallback sleep so a missed wakeup cannot stall dispatch.
    pub async fn dispatch_parked(&self) {
        let _ = tokio::time::timeout(
            Duration::from_millis(1),
            self.dispatch_wakeup.notified(),
        )
        .await;
    }

    /// Admits a worker. A DEAD slot carrying the same identity is preferred,
    /// then the lowest-indexed DEAD slot; only when no slot is reusable does
    /// the table grow.
    pub fn register(&self, identity: Bytes) -> Result<usize, BrokerError> {
        let mut slots = self.slots.lock();

        let mut reusable = None;
        for (index, worker) in slots.iter().enumerate() {
            if worker.lock().status != WorkerStatus::Dead {
                continue;
            }
            if worker.identity() == &identity {
                reusable = Some(index);
                break;
            }
            if reusable.is_none() {
                reusable = Some(index);
            }
        }

        let worker = Worker::new(identity, self.queue_policy);
        let slot = match reusable {
            Some(index) => {
                slots[index] = worker;
                index
            }
            None => {
                if slots.len() >= MAX_WORKERS {
                    return Err(BrokerError::RegistryFull(MAX_WORKERS));
                }
                slots.push(worker);
                slots.len() - 1
            }
        };
        drop(slots);

        info!("worker registered in slot {slot}");
        self.notify_dispatch();
        Ok(slot)
    }

    /// Picks the worker that will own a newly arrived request.
    ///
    /// Stage 1 (resources management only): the live worker with the
    /// strictly smallest load in the open interval (0, 1), warm but not
    /// saturated; ties keep the lowest slot. Stage 2: smallest effort score
    /// among all live workers.
    pub fn select_for_request(&self) -> Result<Arc<Worker>, BrokerError> {
        let slots = self.slots.lock();
        let mut best: Option<Arc<Worker>> = None;

        if self.strategy == PlacementStrategy::ResourcesManagement {
            let mut least_load = 1.0_f64;
            for worker in slots.iter() {
                let inner = worker.lock();
                if !inner.is_live() {
                    continue;
                }
                let load = inner.runtime_load();
                if load == 0.0 {
                    continue;
                }
                if load < least_load {
                    least_load = load;
                    best = Some(worker.clone());
                }
            }
        }

        if best.is_none() {
            let mut best_effort = f64::MAX;
            for worker in slots.iter() {
                let inner = worker.lock();
                if !inner.is_live() {
                    continue;
                }
                let effort = inner.runtime_effort();
                if effort < best_effort {
                    best_effort = effort;
                    best = Some(worker.clone());
                }
            }
        }

        best.ok_or(BrokerError::NoLiveWorker)
    }

    /// Finds the lowest-indexed AVAILABLE worker with a pending task, pops
    /// one task by the queue's policy, and flips the worker BUSY with that
    /// task recorded in flight.
    pub fn next_dispatch(&self) -> Option<(Arc<Worker>, TaskRef)> {
        let slots = self.slots.lock();
        for worker in slots.iter() {
            let mut inner = worker.lock();
            if inner.status != WorkerStatus::Available || inner.tasks.is_empty() {
                continue;
            }
            let Some(task) = inner.tasks.pop() else {
                continue;
            };
            inner.status = WorkerStatus::Busy;
            inner.in_flight = Some(task.clone());
            return Some((worker.clone(), task));
        }
        None
    }

    /// Settles a worker's reply: flips it back to AVAILABLE, releases the
    /// in-flight reservation with the task's real payload, and bumps the
    /// completion counter. Replies from workers with nothing in flight are
    /// orphans and leave every record untouched.
    pub fn mark_complete(&self, worker_id: &[u8]) -> Result<(), BrokerError> {
        let slots = self.slots.lock();
        for worker in slots.iter() {
            if worker.identity().as_ref() != worker_id {
                continue;
            }
            let mut inner = worker.lock();
            if inner.status != WorkerStatus::Busy {
                continue;
            }
            inner.status = WorkerStatus::Available;
            inner.stats.completed_tasks += 1;
            if let Some(task) = inner.in_flight.take() {
                inner.stats.discharge(&task.request);
            }
            drop(inner);

            debug!("worker {} completed a task", String::from_utf8_lossy(worker_id));
            self.notify_dispatch();
            return Ok(());
        }
        Err(BrokerError::OrphanReply)
    }

    /// Takes a worker out of service. Its queue is emptied and its
    /// reservations dropped; the orphaned tasks are handed back to the
    /// caller. Returns `None` when no such worker exists.
    pub fn mark_dead(&self, worker_id: &[u8]) -> Option<Vec<TaskRef>> {
        let slots = self.slots.lock();
        for worker in slots.iter() {
            if worker.identity().as_ref() != worker_id {
                continue;
            }
            let mut inner = worker.lock();
            if inner.status == WorkerStatus::Dead {
                return Some(Vec::new());
            }
            let mut orphaned = Vec::new();
            while let Some(task) = inner.tasks.pop() {
                orphaned.push(task);
            }
            if let Some(task) = inner.in_flight.take() {
                orphaned.push(task);
            }
            inner.stats.clear_reservations();
            inner.status = WorkerStatus::Dead;
            info!(
                "worker {} marked dead, {} task(s) orphaned",
                String::from_utf8_lossy(worker_id),
                orphaned.len()
            );
            return Some(orphaned);
        }
        None
    }

    /// Renders the diagnostic snapshot dumped on shutdown.
    pub fn render_snapshot(&self) -> String {
        let slots = self.slots.lock();
        let mut out = String::new();
        out.push_str(&format!("tasks mapping strategy {}\n", self.strategy));
        for (slot, worker) in slots.iter().enumerate() {
            out.push_str(&format!("worker slot {slot}\n"));
            worker.lock().describe(worker.identity(), &mut out);
            out.push('\n');
        }
        out
    }
}
