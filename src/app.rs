use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::{
    conversation::{ConversationController, Notice},
    session::{SessionController, SessionState, View},
    Gateways,
};

/// Top-level shell: keeps a conversation mounted exactly while someone is signed in.
pub struct App {
    gateways: Gateways,
    session: SessionController,
    session_state: watch::Receiver<SessionState>,
    conversation: Option<ConversationController>,
    notices: mpsc::UnboundedSender<Notice>,
}

impl App {
    pub fn start(gateways: Gateways) -> (App, mpsc::UnboundedReceiver<Notice>) {
        let session = SessionController::start(gateways.identity.clone(), gateways.profiles.clone());
        let session_state = session.subscribe();
        let (notices, notices_rx) = mpsc::unbounded_channel();

        let mut app = App {
            gateways,
            session,
            session_state,
            conversation: None,
            notices,
        };
        app.reconcile();
        (app, notices_rx)
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }

    pub fn conversation(&self) -> Option<&ConversationController> {
        self.conversation.as_ref()
    }

    pub fn view(&self) -> View {
        self.session.view()
    }

    /// Waits for the session to change, then mounts or drops the conversation
    /// to match. `None` once the session controller is gone.
    pub async fn session_changed(&mut self) -> Option<View> {
        self.session_state.changed().await.ok()?;
        self.reconcile();
        Some(self.view())
    }

    pub fn logout(&mut self) {
        self.session.logout();
        self.reconcile();
    }

    fn reconcile(&mut self) {
        let state = self.session_state.borrow_and_update().clone();
        let Some(profile) = state.profile() else {
            if self.conversation.take().is_some() {
                info!("conversation closed");
            }
            return;
        };

        if self.conversation.as_ref().is_some_and(|c| c.user().uid == profile.uid) {
            return;
        }

        info!(uid = %profile.uid, "opening conversation");
        self.conversation = Some(ConversationController::mount(
            profile.clone(),
            self.gateways.messages.clone(),
            self.gateways.summarizer.clone(),
            self.notices.clone(),
        ));
    }
}
