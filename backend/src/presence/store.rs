//! Ephemeral liveness keyspace
//!
//! Keys carry a TTL; when one lapses the key disappears and its name is
//! pushed exactly once onto the expiration feed. Re-setting a key before it
//! lapses pushes its deadline out and produces no event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, trace, warn};

/// Buffered expirations per feed subscriber before the oldest are dropped
const EXPIRATION_FEED_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("key not found")]
    NotFound,

    #[error("liveness store unavailable: {0}")]
    Unavailable(String),
}

/// Stream of expired key names
pub type ExpirationFeed = BoxStream<'static, String>;

#[async_trait]
pub trait LivenessStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous TTL with `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Fails with [`StoreError::NotFound`] when the key is absent or has lapsed.
    async fn get(&self, key: &str) -> Result<String, StoreError>;

    /// Remove a key without emitting an expiration.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Open a feed of keys that expire from now on.
    async fn subscribe_expirations(&self) -> Result<ExpirationFeed, StoreError>;
}

struct Entry {
    value: String,
    expires_at: Instant,
}

enum Command {
    Arm { key: String, ttl: Duration },
    Disarm { key: String },
}

type Entries = Arc<Mutex<HashMap<String, Entry>>>;

/// In-process [`LivenessStore`] whose timers run on a dedicated task.
///
/// Must be constructed inside a tokio runtime. The timer task stops once
/// every handle to the store has been dropped.
#[derive(Clone)]
pub struct MemoryLivenessStore {
    entries: Entries,
    commands: mpsc::UnboundedSender<Command>,
    expired_tx: broadcast::Sender<String>,
}

impl MemoryLivenessStore {
    pub fn new() -> Self {
        let entries: Entries = Arc::new(Mutex::new(HashMap::new()));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (expired_tx, _) = broadcast::channel(EXPIRATION_FEED_CAPACITY);

        tokio::spawn(run_timers(entries.clone(), command_rx, expired_tx.clone()));

        Self {
            entries,
            commands,
            expired_tx,
        }
    }

    /// Number of keys that have not lapsed yet
    pub fn len(&self) -> usize {
        let now = Instant::now();
        lock(&self.entries)
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn send(&self, command: Command) -> Result<(), StoreError> {
        self.commands
            .send(command)
            .map_err(|_| StoreError::Unavailable("expiration timer task stopped".to_string()))
    }
}

impl Default for MemoryLivenessStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LivenessStore for MemoryLivenessStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        lock(&self.entries).insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        self.send(Command::Arm {
            key: key.to_string(),
            ttl,
        })
    }

    async fn get(&self, key: &str) -> Result<String, StoreError> {
        let entries = lock(&self.entries);
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(entry.value.clone()),
            _ => Err(StoreError::NotFound),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        lock(&self.entries).remove(key);
        self.send(Command::Disarm {
            key: key.to_string(),
        })
    }

    async fn subscribe_expirations(&self) -> Result<ExpirationFeed, StoreError> {
        if self.commands.is_closed() {
            return Err(StoreError::Unavailable(
                "expiration timer task stopped".to_string(),
            ));
        }

        let feed = BroadcastStream::new(self.expired_tx.subscribe()).filter_map(|item| async move {
            match item {
                Ok(key) => Some(key),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "expiration feed lagged, oldest expirations dropped");
                    None
                }
            }
        });

        Ok(feed.boxed())
    }
}

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<String, Entry>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_timers(
    entries: Entries,
    mut commands: mpsc::UnboundedReceiver<Command>,
    expired_tx: broadcast::Sender<String>,
) {
    let mut queue: DelayQueue<String> = DelayQueue::new();
    let mut armed: HashMap<String, delay_queue::Key> = HashMap::new();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Arm { key, ttl }) => match armed.get(&key) {
                    Some(timer) => queue.reset(timer, ttl),
                    None => {
                        let timer = queue.insert(key.clone(), ttl);
                        armed.insert(key, timer);
                    }
                },
                Some(Command::Disarm { key }) => {
                    if let Some(timer) = armed.remove(&key) {
                        queue.remove(&timer);
                    }
                }
                None => break,
            },
            Some(expired) = queue.next(), if !queue.is_empty() => {
                let key = expired.into_inner();
                armed.remove(&key);

                // A refresh may have landed before its Arm command was seen
                let lapsed = {
                    let mut entries = lock(&entries);
                    match entries.get(&key) {
                        Some(entry) if entry.expires_at <= Instant::now() => {
                            entries.remove(&key);
                            true
                        }
                        _ => false,
                    }
                };

                if lapsed {
                    trace!(key = %key, "liveness key expired");
                    // No feed subscribers is not an error for the store
                    let _ = expired_tx.send(key);
                }
            }
        }
    }

    debug!("liveness store timer task stopped");
}
