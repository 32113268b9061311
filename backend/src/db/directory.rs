//! Read-only view of the node registry used by the tunnel relay

use async_trait::async_trait;
use thiserror::Error;

use super::Database;
use crate::models::NodeRecord;

#[derive(Debug, Error)]
#[error("node directory lookup failed: {0}")]
pub struct DirectoryError(pub String);

impl From<sqlx::Error> for DirectoryError {
    fn from(err: sqlx::Error) -> Self {
        DirectoryError(err.to_string())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<NodeRecord>, DirectoryError>;

    async fn list(&self) -> Result<Vec<NodeRecord>, DirectoryError>;
}

#[async_trait]
impl NodeDirectory for Database {
    async fn find_by_id(&self, id: &str) -> Result<Option<NodeRecord>, DirectoryError> {
        Ok(self.get_node(id).await?)
    }

    async fn list(&self) -> Result<Vec<NodeRecord>, DirectoryError> {
        Ok(self.list_nodes().await?)
    }
}
