//! Process-wide fan-out of node status changes

use futures::Stream;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

use crate::models::NodeStatus;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("no status subscribers are listening")]
    NoSubscribers,
}

/// Publish/subscribe hub for [`NodeStatus`] events.
///
/// Backed by a bounded broadcast channel: every live subscriber sees every
/// event in publish order, and a subscriber that falls more than `capacity`
/// events behind loses the oldest ones (logged on its side). Subscribers only
/// observe events published after they subscribed.
#[derive(Clone)]
pub struct StatusBroadcaster {
    tx: broadcast::Sender<NodeStatus>,
}

impl StatusBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Hand a status to every current subscriber.
    ///
    /// This is the broadcaster's suspension point. The buffered channel used
    /// here never waits for a receiver, so the future resolves immediately;
    /// callers must still treat it as one that may park.
    pub async fn publish(&self, status: NodeStatus) -> Result<usize, PublishError> {
        self.tx
            .send(status)
            .map_err(|_| PublishError::NoSubscribers)
    }

    pub fn subscribe(&self) -> StatusSubscription {
        StatusSubscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

pub struct StatusSubscription {
    rx: broadcast::Receiver<NodeStatus>,
}

impl StatusSubscription {
    /// Next published status, or `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<NodeStatus> {
        loop {
            match self.rx.recv().await {
                Ok(status) => return Some(status),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "status subscriber lagged, oldest events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = NodeStatus> + Send + 'static {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription
                .recv()
                .await
                .map(|status| (status, subscription))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Liveness;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_publish_without_subscribers_fails() {
        let broadcaster = StatusBroadcaster::new(8);
        let result = broadcaster.publish(NodeStatus::up("n1")).await;
        assert_eq!(result, Err(PublishError::NoSubscribers));
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_event_in_order() {
        let broadcaster = StatusBroadcaster::new(8);
        let mut first = broadcaster.subscribe();
        let mut second = broadcaster.subscribe();

        broadcaster.publish(NodeStatus::up("n1")).await.unwrap();
        broadcaster.publish(NodeStatus::down("n1")).await.unwrap();

        for sub in [&mut first, &mut second] {
            assert_eq!(sub.recv().await.unwrap().status, Liveness::Up);
            assert_eq!(sub.recv().await.unwrap().status, Liveness::Down);
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_events() {
        let broadcaster = StatusBroadcaster::new(8);
        let _early = broadcaster.subscribe();
        broadcaster.publish(NodeStatus::up("n1")).await.unwrap();

        let mut late = broadcaster.subscribe();
        broadcaster.publish(NodeStatus::down("n2")).await.unwrap();

        let status = late.recv().await.unwrap();
        assert_eq!(status.id, "n2");
    }

    #[tokio::test]
    async fn test_lagging_subscriber_keeps_receiving() {
        let broadcaster = StatusBroadcaster::new(2);
        let mut sub = broadcaster.subscribe();

        for i in 0..5 {
            broadcaster
                .publish(NodeStatus::up(format!("n{}", i)))
                .await
                .unwrap();
        }

        // The three oldest were dropped
        assert_eq!(sub.recv().await.unwrap().id, "n3");
        assert_eq!(sub.recv().await.unwrap().id, "n4");
    }

    #[tokio::test]
    async fn test_stream_ends_when_broadcaster_dropped() {
        let broadcaster = StatusBroadcaster::new(4);
        let stream = broadcaster.subscribe().into_stream();
        broadcaster.publish(NodeStatus::down("n1")).await.unwrap();
        drop(broadcaster);

        let collected: Vec<NodeStatus> = stream.collect().await;
        assert_eq!(collected, vec![NodeStatus::down("n1")]);
    }
}
