//! Heartbeat handling and derived node status

use std::sync::Arc;
use std::time::Duration;

use tracing::{instrument, warn};

use super::store::{LivenessStore, StoreError};
use crate::models::{Liveness, NodeStatus};
use crate::telemetry::timed;

/// Value stored under a node's liveness key
pub const UP_MARKER: &str = "UP";

/// Records heartbeats and answers "is this node up right now".
///
/// Status is never cached: it is read from the store on every call, and any
/// miss (absent, lapsed, or store failure) reads as DOWN.
#[derive(Clone)]
pub struct Heartbeat {
    store: Arc<dyn LivenessStore>,
    ttl: Duration,
}

impl Heartbeat {
    pub fn new(store: Arc<dyn LivenessStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Arm (or re-arm) the node's liveness key.
    #[instrument(skip(self))]
    pub async fn mark_up(&self, node_id: &str) -> Result<(), StoreError> {
        timed("mark_up", self.store.set(node_id, UP_MARKER, self.ttl)).await
    }

    pub async fn liveness_of(&self, node_id: &str) -> Liveness {
        match self.store.get(node_id).await {
            Ok(value) if value == UP_MARKER => Liveness::Up,
            Ok(_) | Err(StoreError::NotFound) => Liveness::Down,
            Err(e) => {
                warn!(node_id = %node_id, error = %e, "Liveness lookup failed, reporting DOWN");
                Liveness::Down
            }
        }
    }

    pub async fn observe(&self, node_id: &str) -> NodeStatus {
        NodeStatus {
            id: node_id.to_string(),
            status: self.liveness_of(node_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::store::{ExpirationFeed, MemoryLivenessStore};
    use async_trait::async_trait;
    use tokio::time::sleep;

    struct BrokenStore;

    #[async_trait]
    impl LivenessStore for BrokenStore {
        async fn set(&self, _: &str, _: &str, _: Duration) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection reset".into()))
        }

        async fn get(&self, _: &str) -> Result<String, StoreError> {
            Err(StoreError::Unavailable("connection reset".into()))
        }

        async fn delete(&self, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection reset".into()))
        }

        async fn subscribe_expirations(&self) -> Result<ExpirationFeed, StoreError> {
            Err(StoreError::Unavailable("connection reset".into()))
        }
    }

    fn heartbeat() -> Heartbeat {
        Heartbeat::new(Arc::new(MemoryLivenessStore::new()), Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_node_is_down() {
        let heartbeat = heartbeat();
        assert_eq!(heartbeat.liveness_of("never-seen").await, Liveness::Down);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_up_then_lapse() {
        let heartbeat = heartbeat();
        heartbeat.mark_up("node-1").await.unwrap();
        assert_eq!(heartbeat.liveness_of("node-1").await, Liveness::Up);

        sleep(Duration::from_secs(6)).await;
        assert_eq!(heartbeat.observe("node-1").await, NodeStatus::down("node-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_mark_up_is_idempotent() {
        let heartbeat = heartbeat();
        for _ in 0..10 {
            heartbeat.mark_up("node-1").await.unwrap();
            sleep(Duration::from_secs(2)).await;
        }
        assert_eq!(heartbeat.liveness_of("node-1").await, Liveness::Up);

        sleep(Duration::from_secs(4)).await;
        assert_eq!(heartbeat.liveness_of("node-1").await, Liveness::Down);
    }

    #[tokio::test]
    async fn test_store_failure() {
        let heartbeat = Heartbeat::new(Arc::new(BrokenStore), Duration::from_secs(5));
        assert!(matches!(
            heartbeat.mark_up("node-1").await,
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(heartbeat.liveness_of("node-1").await, Liveness::Down);
    }
}
