use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tokio::{
    sync::broadcast::{self, error::{RecvError, TryRecvError}},
    time::MissedTickBehavior,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{Message, NewMessage, ReadSet, Role, Subscription, UserProfile};

use super::{MessageStore, ProfileStore, StoreError};

const SCHEMA: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        text TEXT NOT NULL,
        sender_id TEXT NOT NULL,
        sender_name TEXT NOT NULL,
        sender_photo TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        is_important INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS read_receipts (
        message_id TEXT NOT NULL,
        uid TEXT NOT NULL,
        PRIMARY KEY (message_id, uid)
    )",
    "CREATE TABLE IF NOT EXISTS profiles (
        uid TEXT PRIMARY KEY,
        display_name TEXT NOT NULL,
        email TEXT NOT NULL,
        photo_url TEXT NOT NULL,
        role TEXT
    )",
];

/// How often subscribers look for writes made by other processes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

type MessageRow = (String, String, String, String, String, i64, bool);

/// Newest message rowid and receipt count. Both tables only ever grow, so any
/// committed write from any connection moves it.
type ChangeMarker = (i64, i64);

/// Messages and profiles in sqlite. Writes from this process wake all
/// subscribers at once; writes from other processes sharing the file are
/// picked up by polling a change marker. Either way subscribers re-read and
/// push the full ordered feed.
#[derive(Clone)]
pub struct SqliteStore {
    db_pool: SqlitePool,
    changes: broadcast::Sender<()>,
    poll_interval: Duration,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<SqliteStore, StoreError> {
        // every in-memory connection is its own database, so keep exactly one alive
        let options = if database_url.contains(":memory:") || database_url.contains("mode=memory") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(16)
        };

        let db_pool = options.connect(database_url).await?;
        SqliteStore::from_pool(db_pool).await
    }

    pub async fn from_pool(db_pool: SqlitePool) -> Result<SqliteStore, StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&db_pool)
                .await?;
        }

        Ok(SqliteStore {
            db_pool,
            changes: broadcast::channel(69).0,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> SqliteStore {
        self.poll_interval = poll_interval;
        self
    }

    pub async fn snapshot(&self) -> Result<Vec<Message>, StoreError> {
        Ok(load_ordered(&self.db_pool).await?)
    }
}

async fn change_marker(db_pool: &SqlitePool) -> Result<ChangeMarker, sqlx::Error> {
    sqlx::query_as("SELECT (SELECT IFNULL(MAX(rowid),0) FROM messages), (SELECT COUNT(*) FROM read_receipts)")
        .fetch_one(db_pool)
        .await
}

async fn load_ordered(db_pool: &SqlitePool) -> Result<Vec<Message>, sqlx::Error> {
    let rows: Vec<MessageRow> =
        sqlx::query_as("SELECT id,text,sender_id,sender_name,sender_photo,timestamp,is_important FROM messages ORDER BY timestamp ASC, rowid ASC")
            .fetch_all(db_pool)
            .await?;

    let receipts: Vec<(String, String)> =
        sqlx::query_as("SELECT message_id,uid FROM read_receipts ORDER BY rowid ASC")
            .fetch_all(db_pool)
            .await?;

    let mut read_sets: HashMap<String, ReadSet> = HashMap::new();
    for (message_id, uid) in receipts {
        read_sets.entry(message_id).or_default().insert(&uid);
    }

    Ok(rows
        .into_iter()
        .map(|(id, text, sender_id, sender_name, sender_photo, timestamp, is_important)| {
            let read_by = read_sets.remove(&id).unwrap_or_default();
            Message { id, text, sender_id, sender_name, sender_photo, timestamp, is_important, read_by }
        })
        .collect())
}

#[async_trait]
impl MessageStore for SqliteStore {
    fn subscribe_ordered(&self) -> Subscription<Vec<Message>> {
        let db_pool = self.db_pool.clone();
        let mut changes = self.changes.subscribe();
        let poll_interval = self.poll_interval;

        Subscription::spawn(move |tx| async move {
            let mut poll = tokio::time::interval(poll_interval);
            poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                // read before loading, so a write in between costs a reload rather than a miss
                let mut seen = change_marker(&db_pool).await.ok();
                match load_ordered(&db_pool).await {
                    Ok(messages) => {
                        if tx.send(messages).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        error!(%err, "message subscription stopped");
                        break;
                    }
                }

                'wait: loop {
                    tokio::select! {
                        changed = changes.recv() => match changed {
                            Ok(()) | Err(RecvError::Lagged(_)) => break 'wait,
                            Err(RecvError::Closed) => return,
                        },
                        _ = poll.tick() => match change_marker(&db_pool).await {
                            Ok(marker) if seen != Some(marker) => {
                                debug!("database changed elsewhere");
                                break 'wait;
                            }
                            Ok(_) => {}
                            Err(err) => {
                                warn!(%err, "change poll failed");
                                seen = None;
                            }
                        },
                    }
                }
                // one reload covers every change that piled up meanwhile
                while let Ok(()) | Err(TryRecvError::Lagged(_)) = changes.try_recv() {}
            }
        })
    }

    async fn append(&self, message: NewMessage) -> Result<(), StoreError> {
        let id = Uuid::now_v7();
        let mut tx = self.db_pool.begin().await?;

        sqlx::query("INSERT INTO messages (id,text,sender_id,sender_name,sender_photo,timestamp,is_important) VALUES (?,?,?,?,?,?,?)")
            .bind(id.to_string())
            .bind(&message.text)
            .bind(&message.sender_id)
            .bind(&message.sender_name)
            .bind(&message.sender_photo)
            .bind(message.timestamp)
            .bind(message.is_important)
            .execute(&mut *tx)
            .await?;

        // the sender always comes first in the read set
        for uid in std::iter::once(message.sender_id.as_str()).chain(message.read_by.iter()) {
            sqlx::query("INSERT OR IGNORE INTO read_receipts (message_id,uid) VALUES (?,?)")
                .bind(id.to_string())
                .bind(uid)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        debug!(%id, sender = %message.sender_id, "appended message");
        let _ = self.changes.send(());
        Ok(())
    }

    async fn update_read_set(&self, id: &str, uid: &str) -> Result<(), StoreError> {
        if sqlx::query("SELECT 1 FROM messages WHERE id=?")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?
            .is_none() {
            return Err(StoreError::NotFound(id.to_owned()));
        }

        let result = sqlx::query("INSERT OR IGNORE INTO read_receipts (message_id,uid) VALUES (?,?)")
            .bind(id)
            .bind(uid)
            .execute(&self.db_pool)
            .await?;

        if result.rows_affected() > 0 {
            debug!(%id, %uid, "marked read");
            let _ = self.changes.send(());
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for SqliteStore {
    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        sqlx::query("INSERT OR REPLACE INTO profiles (uid,display_name,email,photo_url,role) VALUES (?,?,?,?,?)")
            .bind(&profile.uid)
            .bind(&profile.display_name)
            .bind(&profile.email)
            .bind(&profile.photo_url)
            .bind(profile.role.as_ref().map(Role::as_str))
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    async fn profile(&self, uid: &str) -> Result<Option<UserProfile>, StoreError> {
        let row: Option<(String, String, String, String, Option<String>)> =
            sqlx::query_as("SELECT uid,display_name,email,photo_url,role FROM profiles WHERE uid=?")
                .bind(uid)
                .fetch_optional(&self.db_pool)
                .await?;

        let Some((uid, display_name, email, photo_url, role)) = row else {
            return Ok(None);
        };
        let role = role
            .map(|role| role.parse::<Role>())
            .transpose()
            .map_err(StoreError::Backend)?;

        Ok(Some(UserProfile { uid, display_name, email, photo_url, role }))
    }
}
