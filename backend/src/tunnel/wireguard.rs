//! WireGuard-backed provisioner
//!
//! Layout under the configuration directory:
//! - `wg_confs/<iface>.conf` server configuration, one `[Peer]` per node
//! - `server/publickey-server` server public key
//! - `peer_<name>/` per-peer keys and `peer_<name>.conf` client configuration

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use super::{ProvisionedPeer, ProvisioningError, TunnelProvisioner};
use crate::telemetry::timed;

/// Address handed to the first peer when the server has none
const FIRST_PEER_ADDRESS: &str = "10.0.0.2";
const CLIENT_LISTEN_PORT: u16 = 51820;
const CLIENT_DNS: &str = "10.10.0.1";
const CLIENT_ALLOWED_IPS: &str = "10.10.0.1/24";

struct PeerKeys {
    private: String,
    public: String,
    preshared_path: PathBuf,
    preshared: String,
}

pub struct WireguardProvisioner {
    config_dir: PathBuf,
    interface: String,
    endpoint: String,
    // Address allocation reads then appends the server config
    allocation: Mutex<()>,
}

impl WireguardProvisioner {
    pub fn new(
        config_dir: impl Into<PathBuf>,
        interface: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            config_dir: config_dir.into(),
            interface: interface.into(),
            endpoint: endpoint.into(),
            allocation: Mutex::new(()),
        }
    }

    fn server_config_path(&self) -> PathBuf {
        self.config_dir
            .join("wg_confs")
            .join(format!("{}.conf", self.interface))
    }

    fn server_public_key_path(&self) -> PathBuf {
        self.config_dir.join("server").join("publickey-server")
    }

    fn peer_dir(&self, name: &str) -> PathBuf {
        self.config_dir.join(format!("peer_{}", name))
    }

    fn peer_config_path(&self, name: &str) -> PathBuf {
        self.peer_dir(name).join(format!("peer_{}.conf", name))
    }

    async fn generate_keys(&self, name: &str) -> Result<PeerKeys, ProvisioningError> {
        let dir = self.peer_dir(name);

        let private = run("wg", &["genkey"], None)
            .await
            .map_err(|e| ProvisioningError::KeyGeneration(e.to_string()))?;
        write_secret(&dir.join(format!("privatekey-peer_{}", name)), &private).await?;

        let public = run("wg", &["pubkey"], Some(&private))
            .await
            .map_err(|e| ProvisioningError::KeyGeneration(e.to_string()))?;
        write_secret(&dir.join(format!("publickey-peer_{}", name)), &public).await?;

        let preshared = run("wg", &["genkey"], None)
            .await
            .map_err(|e| ProvisioningError::KeyGeneration(e.to_string()))?;
        let preshared_path = dir.join(format!("presharedkey-peer_{}", name));
        write_secret(&preshared_path, &preshared).await?;

        Ok(PeerKeys {
            private,
            public,
            preshared_path,
            preshared,
        })
    }

    async fn register_peer(
        &self,
        name: &str,
        keys: &PeerKeys,
        address: &str,
    ) -> Result<(), ProvisioningError> {
        let mut server_config = tokio::fs::OpenOptions::new()
            .append(true)
            .open(self.server_config_path())
            .await?;
        server_config
            .write_all(render_server_peer(name, &keys.public, &keys.preshared, address).as_bytes())
            .await?;
        server_config.flush().await?;

        let host_route = format!("{}/32", address);
        let preshared_path = keys.preshared_path.to_string_lossy();
        let iface = self.interface.as_str();

        run(
            "wg",
            &[
                "set",
                iface,
                "peer",
                keys.public.as_str(),
                "preshared-key",
                preshared_path.as_ref(),
                "allowed-ips",
                host_route.as_str(),
            ],
            None,
        )
        .await?;
        run(
            "ip",
            &["-4", "route", "add", host_route.as_str(), "dev", iface],
            None,
        )
        .await?;
        run("iptables", &["-A", "FORWARD", "-i", iface, "-j", "ACCEPT"], None).await?;
        run("iptables", &["-A", "FORWARD", "-o", iface, "-j", "ACCEPT"], None).await?;
        run(
            "iptables",
            &["-t", "nat", "-A", "POSTROUTING", "-o", "eth+", "-j", "MASQUERADE"],
            None,
        )
        .await?;

        Ok(())
    }
}

#[async_trait]
impl TunnelProvisioner for WireguardProvisioner {
    #[instrument(skip(self))]
    async fn provision(&self, name: &str) -> Result<ProvisionedPeer, ProvisioningError> {
        timed("provision", self.provision_peer(name)).await
    }

    async fn client_config(&self, name: &str) -> Option<String> {
        let contents = tokio::fs::read_to_string(self.peer_config_path(name))
            .await
            .ok()?;
        if contents.is_empty() {
            return None;
        }
        Some(STANDARD.encode(contents.replace('"', "")))
    }
}

impl WireguardProvisioner {
    async fn provision_peer(&self, name: &str) -> Result<ProvisionedPeer, ProvisioningError> {
        let _allocation = self.allocation.lock().await;

        let server_config = tokio::fs::read_to_string(self.server_config_path())
            .await
            .map_err(|e| {
                ProvisioningError::AddressAllocation(format!(
                    "unable to read {}: {}",
                    self.server_config_path().display(),
                    e
                ))
            })?;
        let address = next_tunnel_address(&server_config)?;

        tokio::fs::create_dir_all(self.peer_dir(name)).await?;
        let keys = self.generate_keys(name).await?;

        let server_public_key = tokio::fs::read_to_string(self.server_public_key_path())
            .await
            .map_err(|e| {
                ProvisioningError::KeyGeneration(format!("unable to read server public key: {}", e))
            })?;

        let client_config = render_client_config(
            &address,
            &keys.private,
            server_public_key.trim(),
            &keys.preshared,
            &self.endpoint,
        );
        tokio::fs::write(self.peer_config_path(name), &client_config).await?;

        self.register_peer(name, &keys, &address).await?;

        info!(peer = %name, address = %address, "Tunnel peer provisioned");

        Ok(ProvisionedPeer {
            tunnel_address: address,
            client_config,
        })
    }
}

/// Next free host address after the last `AllowedIPs` entry in a server config
pub fn next_tunnel_address(server_config: &str) -> Result<String, ProvisioningError> {
    let last = server_config
        .lines()
        .filter(|line| line.contains("AllowedIPs"))
        .filter_map(|line| line.split_whitespace().nth(2))
        .filter_map(|cidr| cidr.split('/').next())
        .last();

    let Some(last) = last else {
        return Ok(FIRST_PEER_ADDRESS.to_string());
    };

    let ip: Ipv4Addr = last
        .parse()
        .map_err(|_| ProvisioningError::AddressAllocation(format!("invalid address {}", last)))?;
    let [a, b, c, d] = ip.octets();
    if d >= 254 {
        return Err(ProvisioningError::AddressAllocation(
            "tunnel address space exhausted".to_string(),
        ));
    }

    Ok(Ipv4Addr::new(a, b, c, d + 1).to_string())
}

pub fn render_client_config(
    address: &str,
    private_key: &str,
    server_public_key: &str,
    preshared_key: &str,
    endpoint: &str,
) -> String {
    let endpoint = endpoint.replace(['“', '”'], "");
    format!(
        "[Interface]\n\
         Address = {address}\n\
         PrivateKey = {private_key}\n\
         ListenPort = {CLIENT_LISTEN_PORT}\n\
         DNS = {CLIENT_DNS}\n\
         \n\
         [Peer]\n\
         PublicKey = {server_public_key}\n\
         PresharedKey = {preshared_key}\n\
         AllowedIPs = {CLIENT_ALLOWED_IPS}\n\
         Endpoint = {endpoint}"
    )
}

pub fn render_server_peer(name: &str, public_key: &str, preshared_key: &str, address: &str) -> String {
    format!(
        "\n[Peer]\n# peer_{name}\nPublicKey = {public_key}\nPresharedKey = {preshared_key}\nAllowedIPs = {address}/32"
    )
}

async fn run(program: &str, args: &[&str], stdin: Option<&str>) -> Result<String, ProvisioningError> {
    let command_line = format!("{} {}", program, args.join(" "));

    let mut cmd = Command::new(program);
    cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    }

    let mut child = cmd.spawn().map_err(|e| ProvisioningError::Command {
        command: command_line.clone(),
        output: e.to_string(),
    })?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes()).await?;
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(command = %command_line, stderr = %stderr, "Tunnel command failed");
        return Err(ProvisioningError::Command {
            command: command_line,
            output: stderr,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

async fn write_secret(path: &Path, contents: &str) -> Result<(), ProvisioningError> {
    tokio::fs::write(path, contents).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    Ok(())
}
