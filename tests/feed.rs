mod common;

use std::{
    sync::{atomic::{AtomicUsize, Ordering}, Arc},
    time::Duration,
};

use async_trait::async_trait;
use common::*;
use futures_util::StreamExt;
use staffroom::{
    conversation::ConversationController,
    store::{MessageStore, SqliteStore, StoreError},
    Message, NewMessage, Subscription,
};
use tokio::sync::mpsc;

/// Real sqlite store that counts what the controller does with it.
struct CountingStore {
    inner: SqliteStore,
    snapshots: Arc<AtomicUsize>,
    read_writes: AtomicUsize,
}

#[async_trait]
impl MessageStore for CountingStore {
    fn subscribe_ordered(&self) -> Subscription<Vec<Message>> {
        let mut feed = self.inner.subscribe_ordered();
        let snapshots = self.snapshots.clone();
        Subscription::spawn(|tx| async move {
            while let Some(snapshot) = feed.next().await {
                snapshots.fetch_add(1, Ordering::SeqCst);
                if tx.send(snapshot).is_err() {
                    break;
                }
            }
        })
    }

    async fn append(&self, message: NewMessage) -> Result<(), StoreError> {
        self.inner.append(message).await
    }

    async fn update_read_set(&self, id: &str, uid: &str) -> Result<(), StoreError> {
        self.read_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.update_read_set(id, uid).await
    }
}

#[tokio::test]
async fn read_receipt_settles_after_one_write() {
    let sqlite = SqliteStore::connect("sqlite::memory:")
        .await
        .unwrap()
        .with_poll_interval(Duration::from_millis(20));
    sqlite
        .append(NewMessage::compose(&profile("ken", "Ken"), "sterilize tray 3".to_owned(), true, 1))
        .await
        .unwrap();

    let store = Arc::new(CountingStore {
        inner: sqlite.clone(),
        snapshots: Arc::new(AtomicUsize::new(0)),
        read_writes: AtomicUsize::new(0),
    });
    let (notices, _notices_rx) = mpsc::unbounded_channel();
    let conversation = ConversationController::mount(
        profile("aiko", "Aiko"),
        store.clone(),
        Arc::new(ScriptedSummarizer::new(Ok("-"))),
        notices,
    );

    // first snapshot without the receipt, second one with it
    eventually("receipt echoed", || {
        conversation.messages().first().is_some_and(|m| m.read_by.contains("aiko"))
    }).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(store.read_writes.load(Ordering::SeqCst), 1);
    assert_eq!(store.snapshots.load(Ordering::SeqCst), 2);

    let stored = sqlite.snapshot().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].read_by.iter().collect::<Vec<_>>(), ["ken", "aiko"]);
}

#[tokio::test]
async fn own_message_needs_no_receipt() {
    let sqlite = SqliteStore::connect("sqlite::memory:").await.unwrap();
    let store = Arc::new(CountingStore {
        inner: sqlite,
        snapshots: Arc::new(AtomicUsize::new(0)),
        read_writes: AtomicUsize::new(0),
    });
    let (notices, _notices_rx) = mpsc::unbounded_channel();
    let conversation = ConversationController::mount(
        profile("aiko", "Aiko"),
        store.clone(),
        Arc::new(ScriptedSummarizer::new(Ok("-"))),
        notices,
    );

    assert!(conversation.send("gloves are in cabinet B", false));
    eventually("message echoed", || conversation.messages().len() == 1).await;
    settle().await;

    assert_eq!(store.read_writes.load(Ordering::SeqCst), 0);
    assert_eq!(conversation.messages()[0].read_by.iter().collect::<Vec<_>>(), ["aiko"]);
}
