//! Server lifecycle management: HTTP listener, health monitor task, and
//! graceful shutdown ordering (stop the monitor, then close every room).

use std::sync::Arc;

use tracing::info;

use partysync_api::http::{create_router, AppState};
use partysync_core::{gateway::Gateway, health::HealthMonitor, registry::RoomRegistry, Config};

/// Container for shared services
pub struct Services {
    pub registry: Arc<RoomRegistry>,
    pub gateway: Arc<Gateway>,
    pub health: HealthMonitor,
}

/// `PartySync` server - owns configuration and services for one process
pub struct PartySyncServer {
    config: Config,
    services: Services,
}

impl PartySyncServer {
    #[must_use]
    pub const fn new(config: Config, services: Services) -> Self {
        Self { config, services }
    }

    /// Bind the HTTP listener, start the health monitor, and serve until
    /// a shutdown signal arrives.
    pub async fn start(self) -> anyhow::Result<()> {
        let state = AppState {
            registry: self.services.registry.clone(),
            gateway: self.services.gateway.clone(),
            health: self.services.health.clone(),
            config: Arc::new(self.config.clone()),
        };
        let router = create_router(state);

        let addr: std::net::SocketAddr = self.config.http_address().parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("HTTP server listening on {}", addr);

        let health_task = self.services.health.start();

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        // Shutdown order matters: stop health scans first so they cannot
        // race room teardown, then close every room.
        self.services.health.shutdown();
        let _ = health_task.await;
        self.services.registry.shutdown_all();
        info!("Shutdown complete");

        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
