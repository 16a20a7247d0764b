// src/server/mod.rs

use crate::config::Config;
use crate::core::stream::MonitorSink;
use anyhow::Result;

mod connection_loop;
mod context;
mod initialization;
mod spawner;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(config: Config, monitor: MonitorSink) -> Result<()> {
    // 1. Initialize server state, the listener, and the keystore.
    let mut server_context = initialization::setup(config, monitor).await?;

    // 2. Spawn all background tasks.
    spawner::spawn_all(&mut server_context);

    // 3. Start the main connection acceptance loop. This runs until
    //    shutdown.
    connection_loop::run(server_context).await;

    Ok(())
}
