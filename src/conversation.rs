use std::{
    collections::HashSet,
    future::Future,
    sync::{atomic::{AtomicBool, Ordering}, Arc},
};

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::{sync::{mpsc, watch}, task::AbortHandle};
use tracing::{debug, warn};

use crate::{
    model::now_millis,
    store::MessageStore,
    summarize::{self, Summarizer, SYSTEM_INSTRUCTION},
    InFlight, Message, NewMessage, UserProfile,
};

pub const NO_MESSAGES: &str = "There are no messages to summarize.";
pub const SEND_FAILED: &str = "Failed to send the message. Check your network connection.";
pub const MARK_READ_FAILED: &str = "Could not mark a message as read. Check your network connection.";
pub const SUMMARY_UNAVAILABLE: &str = "AI summary is unavailable right now. \
    Check that API_KEY is configured correctly.";

/// Things the front end has to show or do on behalf of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Blocking message for the user.
    Alert(String),
    /// Summary text exactly as the model returned it.
    Summary(String),
    ScrollToLatest,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Composer {
    pub text: String,
    pub important: bool,
}

struct Inner {
    user: UserProfile,
    store: Arc<dyn MessageStore>,
    summarizer: Arc<dyn Summarizer>,
    notices: mpsc::UnboundedSender<Notice>,
    messages: watch::Sender<Vec<Message>>,
    composer: Mutex<Composer>,
    // messages this controller already asked the store to mark read
    requested: Mutex<HashSet<String>>,
    summarizing: AtomicBool,
}

impl Inner {
    fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }

    fn apply_snapshot(self: &Arc<Self>, snapshot: Vec<Message>) {
        if !snapshot.is_sorted_by_key(|m| m.timestamp) {
            warn!("store delivered messages out of timestamp order");
        }

        let unread: Vec<String> = snapshot
            .iter()
            .filter(|m| !m.read_by.contains(&self.user.uid))
            .map(|m| m.id.clone())
            .collect();

        debug!(messages = snapshot.len(), unread = unread.len(), "snapshot");
        self.messages.send_replace(snapshot);
        self.notify(Notice::ScrollToLatest);

        for id in unread {
            if !self.requested.lock().insert(id.clone()) {
                continue;
            }
            self.mark_read(id);
        }
    }

    fn mark_read(self: &Arc<Self>, id: String) {
        let inner = self.clone();
        tokio::spawn(async move {
            if let Err(err) = inner.store.update_read_set(&id, &inner.user.uid).await {
                warn!(%id, %err, "mark-read failed");
                inner.notify(Notice::Alert(MARK_READ_FAILED.to_owned()));
            }
        });
    }

    async fn summarize(self: Arc<Self>) {
        let messages = self.messages.borrow().clone();
        if messages.is_empty() {
            self.notify(Notice::Alert(NO_MESSAGES.to_owned()));
            return;
        }

        let Some(_in_flight) = InFlight::try_acquire(&self.summarizing) else {
            debug!("summary already in flight");
            return;
        };

        let transcript = summarize::transcript(&messages);
        match self.summarizer.complete(SYSTEM_INSTRUCTION, &transcript).await {
            Ok(text) if !text.trim().is_empty() => self.notify(Notice::Summary(text)),
            Ok(_) => {
                warn!("summary came back empty");
                self.notify(Notice::Alert(SUMMARY_UNAVAILABLE.to_owned()));
            }
            Err(err) => {
                warn!(%err, "summary failed");
                self.notify(Notice::Alert(SUMMARY_UNAVAILABLE.to_owned()));
            }
        }
    }
}

/// The live message feed for one signed-in user.
///
/// Mounting opens the store subscription; dropping the controller closes it.
/// Every snapshot replaces the local list and triggers a read-receipt pass for
/// messages the user has not read yet.
pub struct ConversationController {
    inner: Arc<Inner>,
    pump: AbortHandle,
}

impl ConversationController {
    pub fn mount(
        user: UserProfile,
        store: Arc<dyn MessageStore>,
        summarizer: Arc<dyn Summarizer>,
        notices: mpsc::UnboundedSender<Notice>,
    ) -> ConversationController {
        let mut snapshots = store.subscribe_ordered();
        let inner = Arc::new(Inner {
            user,
            store,
            summarizer,
            notices,
            messages: watch::Sender::new(Vec::new()),
            composer: Mutex::new(Composer::default()),
            requested: Mutex::new(HashSet::new()),
            summarizing: AtomicBool::new(false),
        });

        let pump = {
            let inner = inner.clone();
            tokio::spawn(async move {
                while let Some(snapshot) = snapshots.next().await {
                    inner.apply_snapshot(snapshot);
                }
                debug!("message subscription ended");
            })
            .abort_handle()
        };

        ConversationController { inner, pump }
    }

    pub fn user(&self) -> &UserProfile {
        &self.inner.user
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.messages.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Message>> {
        self.inner.messages.subscribe()
    }

    pub fn composer(&self) -> Composer {
        self.inner.composer.lock().clone()
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        self.inner.composer.lock().text = text.into();
    }

    pub fn toggle_important(&self) -> bool {
        let mut composer = self.inner.composer.lock();
        composer.important = !composer.important;
        composer.important
    }

    /// Sends whatever is in the composer.
    pub fn submit(&self) -> bool {
        let Composer { text, important } = self.composer();
        self.send(&text, important)
    }

    /// Blank text is ignored. Otherwise the composer is cleared at once and the
    /// message shows up only when the store echoes it back. A failed append is
    /// reported as an alert; the cleared text is not restored.
    pub fn send(&self, text: &str, important: bool) -> bool {
        if text.trim().is_empty() {
            return false;
        }

        *self.inner.composer.lock() = Composer::default();

        let message = NewMessage::compose(&self.inner.user, text.to_owned(), important, now_millis());
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Err(err) = inner.store.append(message).await {
                warn!(%err, "send failed");
                inner.notify(Notice::Alert(SEND_FAILED.to_owned()));
            }
        });
        true
    }

    pub fn is_summarizing(&self) -> bool {
        self.inner.summarizing.load(Ordering::SeqCst)
    }

    pub async fn summarize(&self) {
        self.summary_task().await
    }

    /// [`summarize`](Self::summarize) as an owned future, for spawning from an event loop.
    pub fn summary_task(&self) -> impl Future<Output = ()> + Send + 'static {
        self.inner.clone().summarize()
    }
}

impl Drop for ConversationController {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
