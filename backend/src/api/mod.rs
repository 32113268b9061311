pub mod auth;
pub mod events;
pub mod health;
pub mod nodes;
pub mod openapi;
pub mod proxy;
pub mod response;

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::AuthService;
use crate::config::Config;
use crate::db::Database;
use crate::presence::{Heartbeat, LivenessStore, MemoryLivenessStore, StatusBroadcaster};
use crate::relay::TunnelRelay;
use crate::tunnel::{TunnelProvisioner, WireguardProvisioner};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Config,
    pub liveness: Arc<dyn LivenessStore>,
    pub heartbeat: Heartbeat,
    pub status: StatusBroadcaster,
    pub relay: TunnelRelay,
    pub provisioner: Arc<dyn TunnelProvisioner>,
    pub auth: AuthService,
    /// Fired on shutdown; ends every long-lived stream
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Must be called from within a tokio runtime.
    pub fn new(db: Database, config: Config) -> anyhow::Result<Self> {
        let liveness: Arc<dyn LivenessStore> = Arc::new(MemoryLivenessStore::new());
        let heartbeat = Heartbeat::new(liveness.clone(), config.liveness_ttl());
        let status = StatusBroadcaster::new(config.status_channel_capacity);
        let relay = TunnelRelay::new(
            Arc::new(db.clone()),
            config.agent_port,
            config.relay_timeout(),
            config.relay_connect_timeout(),
        )?;
        let provisioner: Arc<dyn TunnelProvisioner> = Arc::new(WireguardProvisioner::new(
            PathBuf::from(&config.tunnel_config_dir),
            config.tunnel_interface.clone(),
            config.tunnel_endpoint.clone(),
        ));
        let auth = AuthService::new(db.clone(), &config.jwt_secret, config.token_ttl_hours);

        Ok(Self {
            db,
            config,
            liveness,
            heartbeat,
            status,
            relay,
            provisioner,
            auth,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn with_provisioner(mut self, provisioner: Arc<dyn TunnelProvisioner>) -> Self {
        self.provisioner = provisioner;
        self
    }

    pub fn with_liveness_store(mut self, store: Arc<dyn LivenessStore>) -> Self {
        self.heartbeat = Heartbeat::new(store.clone(), self.config.liveness_ttl());
        self.liveness = store;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}
