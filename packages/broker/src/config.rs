//! Broker configuration.
//!
//! Everything has a compiled default that reproduces the stock deployment,
//! so a bare `loadbroker` starts with no arguments and no environment.
//!
//! # Environment variables
//! - `LOADBROKER_FRONTEND`: client-facing endpoint (default `ipc://frontend.ipc`)
//! - `LOADBROKER_BACKEND`: worker-facing endpoint (default `ipc://backend.ipc`)
//! - `LOADBROKER_REBALANCE_SECS`: seconds between rebalance ticks (default 1)
//! - `LOADBROKER_STRATEGY`: `resources` (default) or `uniform`
//! - `LOADBROKER_QUEUE_POLICY`: `round-robin` (default) or `random`

use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use loadbroker_protocol as protocol;

use crate::queue::Policy;
use crate::registry::PlacementStrategy;

const DEFAULT_REBALANCE_SECS: u64 = 1;

#[derive(Debug, Clone)]
pub struct Config {
    pub frontend_endpoint: String,
    pub backend_endpoint: String,
    pub rebalance_period: Duration,
    pub strategy: PlacementStrategy,
    pub queue_policy: Policy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frontend_endpoint: protocol::FRONTEND_ENDPOINT.to_string(),
            backend_endpoint: protocol::BACKEND_ENDPOINT.to_string(),
            rebalance_period: Duration::from_secs(DEFAULT_REBALANCE_SECS),
            strategy: PlacementStrategy::default(),
            queue_policy: Policy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(endpoint) = env::var("LOADBROKER_FRONTEND") {
            config.frontend_endpoint = endpoint;
        }
        if let Ok(endpoint) = env::var("LOADBROKER_BACKEND") {
            config.backend_endpoint = endpoint;
        }
        if let Ok(secs) = env::var("LOADBROKER_REBALANCE_SECS") {
            let secs: u64 = secs
                .parse()
                .context("LOADBROKER_REBALANCE_SECS must be a whole number of seconds")?;
            if secs == 0 {
                bail!("LOADBROKER_REBALANCE_SECS must be at least 1");
            }
            config.rebalance_period = Duration::from_secs(secs);
        }
        if let Ok(strategy) = env::var("LOADBROKER_STRATEGY") {
            config.strategy = match strategy.as_str() {
                "resources" => PlacementStrategy::ResourcesManagement,
                "uniform" => PlacementStrategy::UniformDistribution,
                other => bail!("unknown LOADBROKER_STRATEGY {other:?} (resources|uniform)"),
            };
        }
        if let Ok(policy) = env::var("LOADBROKER_QUEUE_POLICY") {
            config.queue_policy = match policy.as_str() {
                "round-robin" => Policy::RoundRobin,
                "random" => Policy::Random,
                other => bail!("unknown LOADBROKER_QUEUE_POLICY {other:?} (round-robin|random)"),
            };
        }

        Ok(config)
    }
}
