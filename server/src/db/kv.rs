//! KV Store Adapter
//!
//! Thin wrapper over the Redis client exposing the two shapes the backend
//! persists: single opaque blobs and bounded newest-first lists.

use fred::clients::Client;
use fred::interfaces::{ClientLike, KeysInterface, ListInterface};
use thiserror::Error;
use tracing::{error, info};

/// KV store errors.
#[derive(Debug, Error)]
pub enum KvError {
    /// The store was unreachable at boot and persistence is disabled.
    #[error("KV store is not connected")]
    Unavailable,

    /// A command against the store failed.
    #[error("KV store error: {0}")]
    Backend(#[from] fred::error::Error),
}

/// Key layout for persisted data.
pub mod keys {
    /// Room descriptor, single JSON value.
    pub fn room(room_id: &str) -> String {
        format!("room:{room_id}")
    }

    /// Chat history, newest-first list bounded to [`super::CHAT_HISTORY_BOUND`].
    pub fn chat(room_id: &str) -> String {
        format!("chat:{room_id}")
    }

    /// Whiteboard history, newest-first list bounded to
    /// [`super::WHITEBOARD_HISTORY_BOUND`].
    pub fn whiteboard(room_id: &str) -> String {
        format!("whiteboard:{room_id}")
    }
}

/// Maximum chat records retained per room.
pub const CHAT_HISTORY_BOUND: i64 = 100;

/// Maximum whiteboard events retained per room.
pub const WHITEBOARD_HISTORY_BOUND: i64 = 1000;

/// Handle to the durable store.
///
/// Cheap to clone. All operations return [`KvError`] on failure; callers are
/// expected to log and continue, since live fan-out never depends on the
/// store being reachable.
#[derive(Clone)]
pub struct KvStore {
    client: Option<Client>,
}

impl KvStore {
    /// Connect to the store, falling back to a disabled adapter when the
    /// store is unreachable.
    pub async fn connect(url: &str) -> Self {
        match Self::try_connect(url).await {
            Ok(client) => {
                info!("Connected to KV store");
                Self {
                    client: Some(client),
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to KV store, persistence disabled");
                Self { client: None }
            }
        }
    }

    async fn try_connect(url: &str) -> Result<Client, KvError> {
        let config = fred::types::config::Config::from_url(url)?;
        let client = Client::new(config, None, None, None);
        client.connect();
        client.wait_for_connect().await?;
        Ok(client)
    }

    /// An adapter with no backing store. Every operation fails soft.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { client: None }
    }

    /// Whether the store was reachable at boot.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn client(&self) -> Result<&Client, KvError> {
        self.client.as_ref().ok_or(KvError::Unavailable)
    }

    /// Store a single blob.
    pub async fn put(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.client()?
            .set::<(), _, _>(key, value, None, None, false)
            .await?;
        Ok(())
    }

    /// Fetch a single blob.
    pub async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self.client()?.get::<Option<String>, _>(key).await?)
    }

    /// Prepend to a list and trim it to `bound` entries.
    pub async fn push_head(&self, key: &str, value: &str, bound: i64) -> Result<(), KvError> {
        let client = self.client()?;
        client.lpush::<(), _, _>(key, value).await?;
        client.ltrim::<(), _>(key, 0, bound - 1).await?;
        Ok(())
    }

    /// Read up to `count` entries from the head (newest first).
    pub async fn head(&self, key: &str, count: i64) -> Result<Vec<String>, KvError> {
        if count <= 0 {
            return Ok(Vec::new());
        }
        Ok(self
            .client()?
            .lrange::<Vec<String>, _>(key, 0, count - 1)
            .await?)
    }

    /// Read the whole list (newest first).
    pub async fn all(&self, key: &str) -> Result<Vec<String>, KvError> {
        Ok(self.client()?.lrange::<Vec<String>, _>(key, 0, -1).await?)
    }
}
