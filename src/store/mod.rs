use async_trait::async_trait;

use crate::{Message, NewMessage, Subscription, UserProfile};

mod sqlite;

pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("message {0} does not exist")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Backend(String),
}

/// The shared, append-only message feed.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Every item is the whole feed, ordered by ascending timestamp.
    fn subscribe_ordered(&self) -> Subscription<Vec<Message>>;

    async fn append(&self, message: NewMessage) -> Result<(), StoreError>;

    /// Adds `uid` to the message's read set. Already present is not an error.
    async fn update_read_set(&self, id: &str, uid: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Replaces the whole record for `profile.uid`.
    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), StoreError>;

    async fn profile(&self, uid: &str) -> Result<Option<UserProfile>, StoreError>;
}
