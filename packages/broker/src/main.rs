//! Broker binary: load configuration, run the fabric, exit 0 on a clean
//! transport teardown.

use anyhow::{Context, Result};
use loadbroker::{Broker, Config};

fn main() {
    env_logger::init();

    if let Err(e) = run_broker() {
        eprintln!("🚫 loadbroker failed: {e:#}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn run_broker() -> Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    Broker::new(config).run().await
}
