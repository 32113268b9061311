//! Background task turning liveness-key expirations into DOWN events

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::broadcaster::StatusBroadcaster;
use super::store::{ExpirationFeed, LivenessStore};
use crate::models::NodeStatus;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

enum FeedEnd {
    Cancelled,
    Closed,
}

/// Drains the store's expiration feed for the lifetime of the process.
///
/// A lost feed is resubscribed with exponential backoff. The task only
/// stops when its cancellation token fires.
pub struct LivenessBridge {
    store: Arc<dyn LivenessStore>,
    broadcaster: StatusBroadcaster,
    cancel: CancellationToken,
}

impl LivenessBridge {
    pub fn new(
        store: Arc<dyn LivenessStore>,
        broadcaster: StatusBroadcaster,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            broadcaster,
            cancel,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        info!("Liveness bridge started");
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let subscribed = tokio::select! {
                _ = self.cancel.cancelled() => break,
                subscribed = self.store.subscribe_expirations() => subscribed,
            };

            match subscribed {
                Ok(feed) => {
                    backoff = INITIAL_BACKOFF;
                    match self.drain(feed).await {
                        FeedEnd::Cancelled => break,
                        FeedEnd::Closed => {
                            warn!(retry_in = ?backoff, "Expiration feed closed, resubscribing")
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, retry_in = ?backoff, "Failed to subscribe to expiration feed");
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }

        info!("Liveness bridge stopped");
    }

    async fn drain(&self, mut feed: ExpirationFeed) -> FeedEnd {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return FeedEnd::Cancelled,
                next = feed.next() => match next {
                    Some(node_id) => self.announce_down(node_id).await,
                    None => return FeedEnd::Closed,
                },
            }
        }
    }

    async fn announce_down(&self, node_id: String) {
        info!(node_id = %node_id, "Node expired");

        if let Err(e) = self.broadcaster.publish(NodeStatus::down(node_id.as_str())).await {
            debug!(node_id = %node_id, error = %e, "DOWN event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Liveness;
    use crate::presence::store::{MemoryLivenessStore, StoreError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    /// Store whose feeds are fed by hand and whose first subscriptions fail
    struct ScriptedStore {
        failures_left: AtomicUsize,
        subscriptions: AtomicUsize,
        feeds: std::sync::Mutex<Vec<mpsc::UnboundedReceiver<String>>>,
    }

    #[async_trait]
    impl LivenessStore for ScriptedStore {
        async fn set(&self, _: &str, _: &str, _: Duration) -> Result<(), StoreError> {
            Ok(())
        }

        async fn get(&self, _: &str) -> Result<String, StoreError> {
            Err(StoreError::NotFound)
        }

        async fn delete(&self, _: &str) -> Result<(), StoreError> {
            Ok(())
        }

        async fn subscribe_expirations(&self) -> Result<ExpirationFeed, StoreError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("connection refused".into()));
            }
            self.subscriptions.fetch_add(1, Ordering::SeqCst);
            let rx = self
                .feeds
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| StoreError::Unavailable("no feed scripted".into()))?;
            Ok(tokio_stream::wrappers::UnboundedReceiverStream::new(rx).boxed())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_becomes_down_event() {
        let store = Arc::new(MemoryLivenessStore::new());
        let broadcaster = StatusBroadcaster::new(16);
        let mut sub = broadcaster.subscribe();
        let cancel = CancellationToken::new();

        let handle = LivenessBridge::new(store.clone(), broadcaster, cancel.clone()).spawn();
        tokio::task::yield_now().await;

        store.set("node-1", "UP", Duration::from_secs(5)).await.unwrap();

        let status = timeout(Duration::from_secs(6), sub.recv()).await.unwrap().unwrap();
        assert_eq!(status.id, "node-1");
        assert_eq!(status.status, Liveness::Down);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_bridge_survives_missing_subscribers() {
        let store = Arc::new(MemoryLivenessStore::new());
        let broadcaster = StatusBroadcaster::new(16);
        let cancel = CancellationToken::new();

        let handle =
            LivenessBridge::new(store.clone(), broadcaster.clone(), cancel.clone()).spawn();
        tokio::task::yield_now().await;

        store.set("lonely", "UP", Duration::from_secs(1)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!handle.is_finished());

        let mut sub = broadcaster.subscribe();
        store.set("watched", "UP", Duration::from_secs(1)).await.unwrap();
        let status = timeout(Duration::from_secs(2), sub.recv()).await.unwrap().unwrap();
        assert_eq!(status.id, "watched");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribes_after_feed_loss() {
        let (first_tx, first_rx) = mpsc::unbounded_channel();
        let (second_tx, second_rx) = mpsc::unbounded_channel();
        let store = Arc::new(ScriptedStore {
            failures_left: AtomicUsize::new(0),
            subscriptions: AtomicUsize::new(0),
            // popped from the back
            feeds: std::sync::Mutex::new(vec![second_rx, first_rx]),
        });
        let broadcaster = StatusBroadcaster::new(16);
        let mut sub = broadcaster.subscribe();
        let cancel = CancellationToken::new();
        let handle = LivenessBridge::new(store.clone(), broadcaster, cancel.clone()).spawn();

        first_tx.send("a".to_string()).unwrap();
        assert_eq!(sub.recv().await.unwrap().id, "a");

        drop(first_tx);
        second_tx.send("b".to_string()).unwrap();
        let status = timeout(Duration::from_secs(5), sub.recv()).await.unwrap().unwrap();
        assert_eq!(status.id, "b");
        assert_eq!(store.subscriptions.load(Ordering::SeqCst), 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_failed_subscription() {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = Arc::new(ScriptedStore {
            failures_left: AtomicUsize::new(2),
            subscriptions: AtomicUsize::new(0),
            feeds: std::sync::Mutex::new(vec![rx]),
        });
        let broadcaster = StatusBroadcaster::new(16);
        let mut sub = broadcaster.subscribe();
        let cancel = CancellationToken::new();
        let handle = LivenessBridge::new(store.clone(), broadcaster, cancel.clone()).spawn();

        tx.send("late".to_string()).unwrap();
        // 1s + 2s of backoff before the third attempt succeeds
        let status = timeout(Duration::from_secs(4), sub.recv()).await.unwrap().unwrap();
        assert_eq!(status.id, "late");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_bridge() {
        let store = Arc::new(MemoryLivenessStore::new());
        let cancel = CancellationToken::new();
        let handle =
            LivenessBridge::new(store, StatusBroadcaster::new(4), cancel.clone()).spawn();

        cancel.cancel();
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("bridge should stop promptly")
            .unwrap();
    }
}
