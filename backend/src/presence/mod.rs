//! Node presence: liveness keys, status fan-out, and the expiry bridge

pub mod bridge;
pub mod broadcaster;
pub mod heartbeat;
pub mod store;

pub use bridge::LivenessBridge;
pub use broadcaster::{PublishError, StatusBroadcaster, StatusSubscription};
pub use heartbeat::{Heartbeat, UP_MARKER};
pub use store::{ExpirationFeed, LivenessStore, MemoryLivenessStore, StoreError};
