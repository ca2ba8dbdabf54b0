mod server;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use partysync_core::{
    gateway::Gateway, health::HealthMonitor, logging, registry::RoomRegistry, Config,
};

use server::{PartySyncServer, Services};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration (optional file path from argv or env)
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PARTYSYNC_CONFIG").ok());
    let config = Config::load(config_path.as_deref())?;

    // 2. Initialize logging
    logging::init(&config.logging)?;
    info!("PartySync server starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Wire up core services
    let registry = Arc::new(RoomRegistry::new(config.rooms.clone()));
    let health = HealthMonitor::new(registry.clone(), config.rooms.clone());
    let gateway = Arc::new(Gateway::new(registry.clone(), health.clone()));

    let services = Services {
        registry,
        gateway,
        health,
    };

    // 4. Serve until shutdown
    let server = PartySyncServer::new(config, services);
    server.start().await
}
