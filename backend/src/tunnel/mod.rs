//! Tunnel identity provisioning

pub mod wireguard;

use async_trait::async_trait;
use thiserror::Error;

pub use wireguard::WireguardProvisioner;

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("address allocation failed: {0}")]
    AddressAllocation(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("tunnel configuration I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("`{command}` failed: {output}")]
    Command { command: String, output: String },
}

/// Result of provisioning a peer on the overlay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedPeer {
    pub tunnel_address: String,
    /// Ready-to-use client configuration file contents
    pub client_config: String,
}

#[async_trait]
pub trait TunnelProvisioner: Send + Sync {
    /// Allocate an address and keys for `name` and register it server-side.
    async fn provision(&self, name: &str) -> Result<ProvisionedPeer, ProvisioningError>;

    /// Previously generated client configuration, base64-encoded.
    async fn client_config(&self, name: &str) -> Option<String>;
}
