use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;

/// Operating system a node runs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum OperatingSystem {
    Windows,
    Linux,
}

/// Observed reachability of a node
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Liveness {
    Up,
    Down,
}

/// Status change announced to subscribers; never persisted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct NodeStatus {
    pub id: String,
    pub status: Liveness,
}

impl NodeStatus {
    pub fn up(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: Liveness::Up,
        }
    }

    pub fn down(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: Liveness::Down,
        }
    }
}

/// Persisted node as held by the node directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub id: String,
    pub name: String,
    pub operating_system: OperatingSystem,
    pub tunnel_address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Node as returned by the API, with status derived at read time
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub name: String,
    pub operating_system: OperatingSystem,
    pub tunnel_address: String,
    pub status: Liveness,
    /// Base64 client tunnel configuration; only on single-node reads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel_config: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn from_record(record: NodeRecord, status: Liveness) -> Self {
        Self {
            id: record.id,
            name: record.name,
            operating_system: record.operating_system,
            tunnel_address: record.tunnel_address,
            status,
            tunnel_config: None,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }

    pub fn with_tunnel_config(mut self, tunnel_config: Option<String>) -> Self {
        self.tunnel_config = tunnel_config;
        self
    }
}

/// Request to register a node
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateNode {
    pub name: String,
    pub operating_system: OperatingSystem,
}

/// Request to rename a node or change its operating system
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNode {
    pub name: String,
    pub operating_system: OperatingSystem,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_value(NodeStatus::down("node-1")).unwrap();
        assert_eq!(json, serde_json::json!({"id": "node-1", "status": "DOWN"}));
    }

    #[test]
    fn test_operating_system_parse() {
        assert_eq!("LINUX".parse::<OperatingSystem>().unwrap(), OperatingSystem::Linux);
        assert_eq!(OperatingSystem::Windows.to_string(), "WINDOWS");
        assert!("MACOS".parse::<OperatingSystem>().is_err());
    }

    #[test]
    fn test_create_node_rejects_unknown_os() {
        let parsed: Result<CreateNode, _> =
            serde_json::from_value(serde_json::json!({"name": "edge", "operatingSystem": "BSD"}));
        assert!(parsed.is_err());
    }
}
