#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use staffroom::{
    auth::{AuthError, IdentityGateway, ProviderIdentity},
    conversation::Notice,
    store::{MessageStore, ProfileStore, StoreError},
    summarize::{SummarizeError, Summarizer},
    Message, NewMessage, ReadSet, Subscription, UserProfile,
};
use tokio::sync::{mpsc, watch, Notify};

pub fn identity(uid: &str, name: &str) -> ProviderIdentity {
    ProviderIdentity {
        uid: uid.to_owned(),
        display_name: Some(name.to_owned()),
        email: Some(format!("{uid}@nanairo.example")),
        photo_url: Some(format!("https://img.example/{uid}.png")),
    }
}

pub fn profile(uid: &str, name: &str) -> UserProfile {
    UserProfile::from_identity(identity(uid, name))
}

pub fn message(id: &str, sender: &str, timestamp: i64, read_by: &[&str]) -> Message {
    Message {
        id: id.to_owned(),
        text: format!("note {id}"),
        sender_id: sender.to_owned(),
        sender_name: sender.to_owned(),
        sender_photo: String::new(),
        timestamp,
        is_important: false,
        read_by: ReadSet::from_iter(read_by),
    }
}

/// Polls `check` until it holds, panicking after a second.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Gives spawned tasks a chance to run before asserting that nothing happened.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub async fn next_notice(rx: &mut mpsc::UnboundedReceiver<Notice>) -> Notice {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("no notice arrived")
        .expect("notice channel closed")
}

/// Next notice that isn't a scroll request.
pub async fn next_visible_notice(rx: &mut mpsc::UnboundedReceiver<Notice>) -> Notice {
    loop {
        match next_notice(rx).await {
            Notice::ScrollToLatest => continue,
            notice => return notice,
        }
    }
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<Notice>) -> Vec<Notice> {
    let mut notices = Vec::new();
    while let Ok(notice) = rx.try_recv() {
        notices.push(notice);
    }
    notices
}

pub struct ScriptedIdentity {
    state: watch::Sender<Option<ProviderIdentity>>,
    result: Mutex<Result<ProviderIdentity, AuthError>>,
    hold: AtomicBool,
    release: Notify,
    pub sign_ins: AtomicUsize,
    pub sign_outs: AtomicUsize,
}

impl ScriptedIdentity {
    pub fn new(result: Result<ProviderIdentity, AuthError>) -> ScriptedIdentity {
        ScriptedIdentity {
            state: watch::Sender::new(None),
            result: Mutex::new(result),
            hold: AtomicBool::new(false),
            release: Notify::new(),
            sign_ins: AtomicUsize::new(0),
            sign_outs: AtomicUsize::new(0),
        }
    }

    /// Simulates the provider reporting a transition on its own.
    pub fn publish(&self, identity: Option<ProviderIdentity>) {
        self.state.send_replace(identity);
    }

    pub fn answer(&self, result: Result<ProviderIdentity, AuthError>) {
        *self.result.lock() = result;
    }

    pub fn hold_sign_in(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    pub fn release_sign_in(&self) {
        self.hold.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }

    pub fn listeners(&self) -> usize {
        self.state.receiver_count()
    }
}

#[async_trait]
impl IdentityGateway for ScriptedIdentity {
    fn subscribe_auth_state(&self) -> Subscription<Option<ProviderIdentity>> {
        Subscription::from_watch(self.state.subscribe())
    }

    async fn sign_in_interactive(&self) -> Result<ProviderIdentity, AuthError> {
        self.sign_ins.fetch_add(1, Ordering::SeqCst);
        if self.hold.load(Ordering::SeqCst) {
            self.release.notified().await;
        }

        let result = self.result.lock().clone();
        if let Ok(identity) = &result {
            self.publish(Some(identity.clone()));
        }
        result
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        self.publish(None);
        Ok(())
    }
}

#[derive(Default)]
pub struct ScriptedStore {
    feeds: Mutex<Vec<mpsc::UnboundedSender<Vec<Message>>>>,
    pub appended: Mutex<Vec<NewMessage>>,
    pub read_calls: Mutex<Vec<(String, String)>>,
    pub profiles: Mutex<HashMap<String, UserProfile>>,
    pub fail_appends: AtomicBool,
    pub fail_reads: AtomicBool,
}

impl ScriptedStore {
    pub fn new() -> ScriptedStore {
        ScriptedStore::default()
    }

    /// Pushes a full snapshot to every open subscription.
    pub fn push(&self, snapshot: Vec<Message>) {
        self.feeds.lock().retain(|feed| feed.send(snapshot.clone()).is_ok());
    }

    pub fn subscriptions(&self) -> usize {
        self.feeds.lock().len()
    }

    pub fn open_subscriptions(&self) -> usize {
        self.feeds.lock().iter().filter(|feed| !feed.is_closed()).count()
    }

    pub fn read_calls(&self) -> Vec<(String, String)> {
        self.read_calls.lock().clone()
    }
}

#[async_trait]
impl MessageStore for ScriptedStore {
    fn subscribe_ordered(&self) -> Subscription<Vec<Message>> {
        let (tx, subscription) = Subscription::channel();
        self.feeds.lock().push(tx);
        subscription
    }

    async fn append(&self, message: NewMessage) -> Result<(), StoreError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("offline".to_owned()));
        }
        self.appended.lock().push(message);
        Ok(())
    }

    async fn update_read_set(&self, id: &str, uid: &str) -> Result<(), StoreError> {
        self.read_calls.lock().push((id.to_owned(), uid.to_owned()));
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("offline".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for ScriptedStore {
    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        self.profiles.lock().insert(profile.uid.clone(), profile.clone());
        Ok(())
    }

    async fn profile(&self, uid: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.profiles.lock().get(uid).cloned())
    }
}

pub struct ScriptedSummarizer {
    result: Mutex<Result<String, String>>,
    hold: AtomicBool,
    release: Notify,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedSummarizer {
    pub fn new(result: Result<&str, &str>) -> ScriptedSummarizer {
        ScriptedSummarizer {
            result: Mutex::new(result.map(str::to_owned).map_err(str::to_owned)),
            hold: AtomicBool::new(false),
            release: Notify::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn answer(&self, result: Result<&str, &str>) {
        *self.result.lock() = result.map(str::to_owned).map_err(str::to_owned);
    }

    pub fn hold(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.hold.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Summarizer for ScriptedSummarizer {
    async fn complete(&self, system_instruction: &str, user_content: &str) -> Result<String, SummarizeError> {
        self.calls.lock().push((system_instruction.to_owned(), user_content.to_owned()));
        if self.hold.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        self.result.lock().clone().map_err(SummarizeError::Api)
    }
}
