use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Port the node agent listens on, on its tunnel address
    #[serde(default = "default_agent_port")]
    pub agent_port: u16,

    /// Deadline for a buffered relay round trip
    #[serde(default = "default_relay_timeout_secs")]
    pub relay_timeout_secs: u64,

    #[serde(default = "default_relay_connect_timeout_secs")]
    pub relay_connect_timeout_secs: u64,

    /// Lifetime of a liveness key after each heartbeat
    #[serde(default = "default_liveness_ttl_secs")]
    pub liveness_ttl_secs: u64,

    #[serde(default = "default_status_channel_capacity")]
    pub status_channel_capacity: usize,

    #[serde(default = "default_max_nodes")]
    pub max_nodes: i64,

    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,

    #[serde(default = "default_admin_username")]
    pub admin_username: String,

    #[serde(default = "default_admin_password")]
    pub admin_password: String,

    /// Public endpoint written into generated client configurations
    #[serde(default)]
    pub tunnel_endpoint: String,

    #[serde(default = "default_tunnel_config_dir")]
    pub tunnel_config_dir: String,

    #[serde(default = "default_tunnel_interface")]
    pub tunnel_interface: String,

    #[serde(default = "default_cors_allowed_origins")]
    pub cors_allowed_origins: String,
}

fn default_port() -> u16 {
    6276
}

fn default_database_url() -> String {
    "sqlite://fleetlink.db".to_string()
}

fn default_agent_port() -> u16 {
    9842
}

fn default_relay_timeout_secs() -> u64 {
    30
}

fn default_relay_connect_timeout_secs() -> u64 {
    10
}

fn default_liveness_ttl_secs() -> u64 {
    5
}

fn default_status_channel_capacity() -> usize {
    100
}

fn default_max_nodes() -> i64 {
    4
}

fn default_jwt_secret() -> String {
    "fleetlink_dev_secret".to_string()
}

fn default_token_ttl_hours() -> i64 {
    12
}

fn default_admin_username() -> String {
    "fleetlink".to_string()
}

fn default_admin_password() -> String {
    "root".to_string()
}

fn default_tunnel_config_dir() -> String {
    "/config".to_string()
}

fn default_tunnel_interface() -> String {
    "wg0".to_string()
}

fn default_cors_allowed_origins() -> String {
    "*".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;

        let settings: Config = config.try_deserialize()?;

        Ok(settings)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay_timeout_secs)
    }

    pub fn relay_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.relay_connect_timeout_secs)
    }

    pub fn liveness_ttl(&self) -> Duration {
        Duration::from_secs(self.liveness_ttl_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            database_url: default_database_url(),
            agent_port: default_agent_port(),
            relay_timeout_secs: default_relay_timeout_secs(),
            relay_connect_timeout_secs: default_relay_connect_timeout_secs(),
            liveness_ttl_secs: default_liveness_ttl_secs(),
            status_channel_capacity: default_status_channel_capacity(),
            max_nodes: default_max_nodes(),
            jwt_secret: default_jwt_secret(),
            token_ttl_hours: default_token_ttl_hours(),
            admin_username: default_admin_username(),
            admin_password: default_admin_password(),
            tunnel_endpoint: String::new(),
            tunnel_config_dir: default_tunnel_config_dir(),
            tunnel_interface: default_tunnel_interface(),
            cors_allowed_origins: default_cors_allowed_origins(),
        }
    }
}
