//! Per-worker resource accounting.
//!
//! Every accepted request reserves an estimated slice of the worker's three
//! resource pools until the reply comes back (or the task is relocated).
//! The estimator is a placeholder cost model (`ping` saturates a worker,
//! anything else costs a flat 20 %), kept numerically exact so scheduling
//! behavior stays deterministic; the constants are the tuning surface.

/// Available CPU cycles per second.
pub const DEFAULT_RESOURCE_CPU: u64 = 10_000;

/// Available memory in megabytes.
pub const DEFAULT_RESOURCE_MEMORY: u64 = 10_000;

/// Available network bandwidth, in megabytes per second.
pub const DEFAULT_RESOURCE_NETWORK: u64 = 10_000;

/// Load at or below which a worker is a candidate for quiescing.
pub const IDLE_LOAD_THRESHOLD: f64 = 0.20;

/// Load up to which a worker still accepts relocated tasks.
pub const ACCEPT_LOAD_THRESHOLD: f64 = 0.70;

/// Load at or above which a worker should shed tasks.
pub const OVER_LOAD_THRESHOLD: f64 = 0.95;

// Weights for the signals folded into a worker's effort score.
const ASSIGNED_TASKS_WEIGHT: f64 = 0.1;
const COMPLETED_TASKS_WEIGHT: f64 = 0.2;
const CPU_LOAD_WEIGHT: f64 = 1.0;
const NETWORK_LOAD_WEIGHT: f64 = 0.5;
const MEMORY_LOAD_WEIGHT: f64 = 0.2;
const WORKER_BUSY_WEIGHT: f64 = 1.0;

/// Estimated resource demand of one request, in capacity units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceEstimate {
    pub cpu: u64,
    pub memory: u64,
    pub network: u64,
}

/// Classifies a request payload. `ping` reserves the whole worker; every
/// other command gets a flat 20 % of each pool.
pub fn estimate(request: &[u8]) -> ResourceEstimate {
    if request.starts_with(b"ping") {
        return ResourceEstimate {
            cpu: DEFAULT_RESOURCE_CPU,
            memory: DEFAULT_RESOURCE_MEMORY,
            network: DEFAULT_RESOURCE_NETWORK,
        };
    }
    ResourceEstimate {
        cpu: DEFAULT_RESOURCE_CPU / 5,
        memory: DEFAULT_RESOURCE_MEMORY / 5,
        network: DEFAULT_RESOURCE_NETWORK / 5,
    }
}

/// Running resource ledger for one worker.
#[derive(Debug, Clone)]
pub struct WorkerStats {
    cpu_capacity: u64,
    memory_capacity: u64,
    network_capacity: u64,

    pub cpu_load: f64,
    pub memory_load: f64,
    pub network_load: f64,

    /// Tasks enqueued plus in flight.
    pub assigned_tasks: u32,
    /// Successful replies routed back, monotonically increasing.
    pub completed_tasks: u64,
}

impl Default for WorkerStats {
    fn default() -> Self {
        Self {
            cpu_capacity: DEFAULT_RESOURCE_CPU,
            memory_capacity: DEFAULT_RESOURCE_MEMORY,
            network_capacity: DEFAULT_RESOURCE_NETWORK,
            cpu_load: 0.0,
            memory_load: 0.0,
            network_load: 0.0,
            assigned_tasks: 0,
            completed_tasks: 0,
        }
    }
}

impl WorkerStats {
    /// Reserves the request's estimated slice and counts it as assigned.
    pub fn charge(&mut self, request: &[u8]) {
        self.assigned_tasks += 1;
        self.apply(request, 1.0);
    }

    /// Releases the request's estimated slice when it completes or leaves.
    pub fn discharge(&mut self, request: &[u8]) {
        self.assigned_tasks = self.assigned_tasks.saturating_sub(1);
        self.apply(request, -1.0);
    }

    fn apply(&mut self, request: &[u8], sign: f64) {
        let est = estimate(request);
        self.cpu_load += sign * est.cpu as f64 / self.cpu_capacity as f64;
        self.memory_load += sign * est.memory as f64 / self.memory_capacity as f64;
        self.network_load += sign * est.network as f64 / self.network_capacity as f64;
    }

    /// Mean of the three load fractions; each resource weighs the same.
    pub fn runtime_load(&self) -> f64 {
        (self.cpu_load + self.network_load + self.memory_load) / 3.0
    }

    /// Scalar cost used when every candidate looks equally (un)loaded.
    pub fn runtime_effort(&self, busy: bool) -> f64 {
        let mut score = 0.0;
        score += ASSIGNED_TASKS_WEIGHT * self.assigned_tasks as f64;
        score += COMPLETED_TASKS_WEIGHT * self.completed_tasks as f64;
        score += CPU_LOAD_WEIGHT * self.cpu_load;
        score += NETWORK_LOAD_WEIGHT * self.network_load;
        score += MEMORY_LOAD_WEIGHT * self.memory_load;
        if busy {
            score += WORKER_BUSY_WEIGHT;
        }
        score
    }

    /// Drops all reservations. Only valid when the worker leaves service.
    pub fn clear_reservations(&mut self) {
        self.cpu_load = 0.0;
        self.memory_load = 0.0;
        self.network_load = 0.0;
        self.assigned_tasks = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn ping_saturates_every_resource() {
        let est = estimate(b"ping");
        assert_eq!(est.cpu, DEFAULT_RESOURCE_CPU);
        assert_eq!(est.memory, DEFAULT_RESOURCE_MEMORY);
        assert_eq!(est.network, DEFAULT_RESOURCE_NETWORK);
        // Prefix match, not equality.
        assert_eq!(estimate(b"ping -c 4 host"), est);
    }

    #[test]
    fn other_commands_cost_a_fifth() {
        let est = estimate(b"echo hi");
        assert_eq!(est.cpu, DEFAULT_RESOURCE_CPU / 5);
        assert_eq!(est.memory, DEFAULT_RESOURCE_MEMORY / 5);
        assert_eq!(est.network, DEFAULT_RESOURCE_NETWORK / 5);
    }

    #[test]
    fn charge_discharge_conserves_load() {
        let mut stats = WorkerStats::default();
        stats.charge(b"ping");
        stats.charge(b"echo hi");
        assert_eq!(stats.assigned_tasks, 2);
        assert!((stats.cpu_load - 1.2).abs() < EPS);
        assert!((stats.runtime_load() - 1.2).abs() < EPS);

        stats.discharge(b"echo hi");
        stats.discharge(b"ping");
        assert_eq!(stats.assigned_tasks, 0);
        assert!(stats.cpu_load.abs() < EPS);
        assert!(stats.memory_load.abs() < EPS);
        assert!(stats.network_load.abs() < EPS);
    }

    #[test]
    fn effort_weights_each_signal() {
        let mut stats = WorkerStats::default();
        stats.charge(b"echo hi");
        stats.completed_tasks = 3;
        // 0.1 * 1 assigned + 0.2 * 3 completed + (1.0 + 0.5 + 0.2) * 0.2 load
        let expected = 0.1 + 0.6 + 1.7 * 0.2;
        assert!((stats.runtime_effort(false) - expected).abs() < EPS);
        assert!((stats.runtime_effort(true) - expected - 1.0).abs() < EPS);
    }

    #[test]
    fn loads_never_go_negative_in_balanced_sequences() {
        let mut stats = WorkerStats::default();
        let requests: [&[u8]; 3] = [b"ping", b"echo a", b"sleep 1"];
        for r in &requests {
            stats.charge(r);
        }
        for r in requests.iter().rev() {
            stats.discharge(r);
        }
        assert!(stats.cpu_load > -EPS);
        assert!(stats.memory_load > -EPS);
        assert!(stats.network_load > -EPS);
    }
}
