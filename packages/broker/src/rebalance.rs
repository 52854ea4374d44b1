//! Periodic task relocation across workers.
//!
//! Each tick classifies the live pool from a load snapshot, then walks the
//! slot indices twice. Healthy hosts get first right of refusal over idle
//! donors so idle nodes can be quiesced; leftover excess from overloaded
//! donors then spills to whichever host or idle node can still absorb it.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};
use tokio::time::interval;

use crate::error::BrokerError;
use crate::registry::Registry;
use crate::stats::{ACCEPT_LOAD_THRESHOLD, IDLE_LOAD_THRESHOLD, OVER_LOAD_THRESHOLD};
use crate::worker::Worker;

#[derive(Debug, Clone, Copy)]
enum Amount {
    /// The donor's whole queue.
    All,
    /// Ceiling of half the donor's queue.
    Half,
}

/// Drives `rebalance_pass` every `period`. Returns only when a pass hits an
/// unrecoverable queue failure; the caller tears the broker down.
pub async fn run(registry: Arc<Registry>, period: Duration) -> Result<(), BrokerError> {
    let mut tick = interval(period);
    // The first tick of `interval` fires immediately; skip it so a freshly
    // started broker does not rebalance an empty pool.
    tick.tick().await;
    loop {
        tick.tick().await;
        let moved = rebalance_pass(&registry)?;
        if moved > 0 {
            debug!("rebalanced {moved} task(s)");
        }
    }
}

/// One stop-the-world relocation pass. Returns how many tasks moved, or an
/// error when a task can no longer be placed in any queue.
pub fn rebalance_pass(registry: &Registry) -> Result<usize, BrokerError> {
    let slots = registry.lock_slots();
    let count = slots.len();

    // Per-slot load; DEAD slots are excluded from every role.
    let mut snapshot: Vec<Option<f64>> = Vec::with_capacity(count);
    for worker in slots.iter() {
        let inner = worker.lock();
        snapshot.push(inner.is_live().then(|| inner.runtime_load()));
    }

    if !rebalance_needed(&snapshot) {
        return Ok(0);
    }

    let mut idle: Vec<usize> = Vec::new();
    let mut over: Vec<usize> = Vec::new();
    for (slot, load) in snapshot.iter().enumerate() {
        match load {
            Some(l) if *l <= IDLE_LOAD_THRESHOLD => idle.push(slot),
            Some(l) if *l >= OVER_LOAD_THRESHOLD => over.push(slot),
            _ => {}
        }
    }

    let mut moved = 0;
    'walk: for step in 0..2 * count {
        let slot = step % count;
        let Some(load) = snapshot[slot] else {
            continue;
        };

        if load > IDLE_LOAD_THRESHOLD && load < OVER_LOAD_THRESHOLD {
            // A host that can take more: drain an idle donor outright, or
            // split an overloaded one.
            if let Some(donor) = idle.pop() {
                moved += relocate(&slots, donor, slot, Amount::All)?;
            } else if let Some(donor) = over.pop() {
                moved += relocate(&slots, donor, slot, Amount::Half)?;
            } else {
                break 'walk;
            }
        } else if load <= IDLE_LOAD_THRESHOLD {
            // An idle node absorbs excess from an overloaded donor.
            if let Some(donor) = over.pop() {
                moved += relocate(&slots, donor, slot, Amount::Half)?;
            }
        }
    }
    drop(slots);

    if moved > 0 {
        registry.notify_dispatch();
    }
    Ok(moved)
}

/// A pass is worthwhile only when someone is overloaded and someone else
/// can still take work.
fn rebalance_needed(snapshot: &[Option<f64>]) -> bool {
    let mut idle_n = 0;
    let mut host_n = 0;
    let mut over_n = 0;
    for load in snapshot.iter().flatten() {
        if *load <= IDLE_LOAD_THRESHOLD {
            idle_n += 1;
        } else if *load <= ACCEPT_LOAD_THRESHOLD {
            host_n += 1;
        } else if *load >= OVER_LOAD_THRESHOLD {
            over_n += 1;
        }
    }
    over_n > 0 && (host_n > 0 || idle_n > 0)
}

/// Moves tasks from `src` to `dst`, transferring each task's reservation
/// with it. Record locks are taken in ascending slot order. A destination
/// that cannot grow ends the move early; if the task then cannot be handed
/// back to the source either, it belongs to no queue and the error is
/// unrecoverable.
fn relocate(
    slots: &[Arc<Worker>],
    src: usize,
    dst: usize,
    amount: Amount,
) -> Result<usize, BrokerError> {
    if src == dst {
        return Ok(0);
    }
    let (low, high) = if src < dst { (src, dst) } else { (dst, src) };
    let mut low_guard = slots[low].lock();
    let mut high_guard = slots[high].lock();
    let (src_inner, dst_inner) = if src < dst {
        (&mut *low_guard, &mut *high_guard)
    } else {
        (&mut *high_guard, &mut *low_guard)
    };

    let quota = match amount {
        Amount::All => src_inner.tasks.len(),
        Amount::Half => src_inner.tasks.len().div_ceil(2),
    };

    let mut moved = 0;
    for _ in 0..quota {
        let Some(task) = src_inner.tasks.pop() else {
            break;
        };
        src_inner.stats.discharge(&task.request);
        if dst_inner.tasks.push(task.clone()).is_err() {
            // Destination cannot grow: hand the task back and stop. A
            // hand-back failure would strand the task outside every queue.
            src_inner.tasks.push(task.clone())?;
            src_inner.stats.charge(&task.request);
            break;
        }
        dst_inner.stats.charge(&task.request);
        moved += 1;
        trace!(
            "relocated task for {} from slot {src} to slot {dst}",
            String::from_utf8_lossy(&task.client_id)
        );
    }
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::queue::{Policy, QueueBackend, QueueError, TaskQueue};
    use crate::registry::PlacementStrategy;
    use crate::task::{Task, TaskRef};

    fn registry_with(workers: usize) -> Registry {
        let registry =
            Registry::new(PlacementStrategy::ResourcesManagement, Policy::RoundRobin);
        for i in 0..workers {
            registry.register(Bytes::from(format!("server_w{i}"))).unwrap();
        }
        registry
    }

    fn enqueue(registry: &Registry, slot: usize, request: &[u8]) {
        let worker = registry.get(slot).unwrap();
        let task = Task::new(
            Bytes::from(format!("client_s{slot}")),
            Bytes::copy_from_slice(request),
        );
        let mut inner = worker.lock();
        inner.tasks.push(task.clone()).unwrap();
        inner.stats.charge(&task.request);
    }

    fn queue_len(registry: &Registry, slot: usize) -> usize {
        registry.get(slot).unwrap().lock().tasks.len()
    }

    #[test]
    fn overloaded_worker_splits_half_to_idle_newcomer() {
        // Ten pings stack up on w0 before w1 exists; once w1 registers, a
        // single pass moves ceil(10/2) = 5 tasks onto it.
        let registry = registry_with(1);
        for _ in 0..10 {
            enqueue(&registry, 0, b"ping");
        }
        registry.register(Bytes::from_static(b"server_w1")).unwrap();

        let moved = rebalance_pass(&registry).unwrap();
        assert_eq!(moved, 5);
        assert_eq!(queue_len(&registry, 0), 5);
        assert_eq!(queue_len(&registry, 1), 5);

        // Reservations moved with the tasks.
        let w0 = registry.get(0).unwrap();
        let w1 = registry.get(1).unwrap();
        assert!((w0.lock().runtime_load() - 5.0).abs() < 1e-9);
        assert!((w1.lock().runtime_load() - 5.0).abs() < 1e-9);
        assert_eq!(w0.lock().stats.assigned_tasks, 5);
        assert_eq!(w1.lock().stats.assigned_tasks, 5);
    }

    #[test]
    fn no_overload_means_fixpoint() {
        let registry = registry_with(3);
        enqueue(&registry, 0, b"echo hi");
        enqueue(&registry, 1, b"echo hi");

        assert_eq!(rebalance_pass(&registry).unwrap(), 0);
        assert_eq!(queue_len(&registry, 0), 1);
        assert_eq!(queue_len(&registry, 1), 1);
        assert_eq!(queue_len(&registry, 2), 0);
    }

    #[test]
    fn idle_donor_is_drained_into_a_host() {
        // w0 is a healthy host (0.4), w1 idle with one cheap task (0.2),
        // w2 overloaded. The host first drains the idle donor completely,
        // then the overload spills.
        let registry = registry_with(3);
        enqueue(&registry, 0, b"echo hi");
        enqueue(&registry, 0, b"echo hi");
        enqueue(&registry, 1, b"echo hi");
        for _ in 0..2 {
            enqueue(&registry, 2, b"ping");
        }

        let moved = rebalance_pass(&registry).unwrap();
        assert_eq!(moved, 2);
        // The host absorbed the idle donor's whole queue.
        assert_eq!(queue_len(&registry, 0), 3);
        // The drained donor then took ceil(2/2) = 1 of the overload.
        assert_eq!(queue_len(&registry, 1), 1);
        assert_eq!(queue_len(&registry, 2), 1);
    }

    #[test]
    fn dead_workers_take_no_part() {
        let registry = registry_with(3);
        for _ in 0..4 {
            enqueue(&registry, 0, b"ping");
        }
        registry.mark_dead(b"server_w2").unwrap();

        let moved = rebalance_pass(&registry).unwrap();
        assert!(moved > 0);
        // Nothing landed on the dead slot.
        assert_eq!(queue_len(&registry, 2), 0);
    }

    #[test]
    fn decision_predicate_requires_overload_and_capacity() {
        // Only overloaded workers: nobody can absorb, so no action.
        assert!(!rebalance_needed(&[Some(1.0), Some(2.0)]));
        // Overload plus an idle absorber.
        assert!(rebalance_needed(&[Some(1.0), Some(0.1)]));
        // Overload plus a host.
        assert!(rebalance_needed(&[Some(1.0), Some(0.5)]));
        // The (ACCEPT, OVER) gap counts as neither host nor overload.
        assert!(!rebalance_needed(&[Some(0.8), Some(0.1)]));
        // Dead slots are invisible.
        assert!(!rebalance_needed(&[Some(1.0), None]));
    }

    #[test]
    fn lone_overloaded_worker_is_left_alone() {
        let registry = registry_with(1);
        for _ in 0..4 {
            enqueue(&registry, 0, b"ping");
        }
        assert_eq!(rebalance_pass(&registry).unwrap(), 0);
        assert_eq!(queue_len(&registry, 0), 4);
    }

    #[test]
    fn failed_hand_back_surfaces_as_fatal() {
        /// Queue at capacity: pops work, every push is refused.
        struct SaturatedQueue(Vec<TaskRef>);

        impl QueueBackend for SaturatedQueue {
            fn push(&mut self, _task: TaskRef) -> Result<(), QueueError> {
                Err(QueueError::OutOfMemory)
            }
            fn remove(&mut self, task: &TaskRef) -> Result<TaskRef, QueueError> {
                if self.0.is_empty() {
                    return Err(QueueError::Empty);
                }
                let index = self
                    .0
                    .iter()
                    .position(|t| Task::same(t, task))
                    .ok_or(QueueError::NotFound)?;
                Ok(self.0.remove(index))
            }
            fn peek(&mut self) -> Option<TaskRef> {
                self.0.first().cloned()
            }
            fn len(&self) -> usize {
                self.0.len()
            }
            fn for_each(&self, visit: &mut dyn FnMut(&TaskRef)) {
                for t in &self.0 {
                    visit(t);
                }
            }
        }

        let registry = registry_with(2);

        // w0 overloaded, behind a queue that refuses re-insertion.
        {
            let worker = registry.get(0).unwrap();
            let mut inner = worker.lock();
            let tasks: Vec<TaskRef> = (0..4)
                .map(|i| {
                    Task::new(
                        Bytes::from(format!("client_h{i}")),
                        Bytes::from_static(b"ping"),
                    )
                })
                .collect();
            for task in &tasks {
                inner.stats.charge(&task.request);
            }
            inner.tasks = TaskQueue::with_backend(Box::new(SaturatedQueue(tasks)));
        }
        // w1 idle but its queue is also full, so the move is refused and the
        // hand-back to w0 fails too.
        {
            let worker = registry.get(1).unwrap();
            worker.lock().tasks = TaskQueue::with_backend(Box::new(SaturatedQueue(Vec::new())));
        }

        let err = rebalance_pass(&registry).unwrap_err();
        assert!(matches!(
            err,
            BrokerError::Queue(QueueError::OutOfMemory)
        ));
    }
}
