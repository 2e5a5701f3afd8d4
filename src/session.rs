use std::{future::Future, sync::{atomic::{AtomicBool, Ordering}, Arc}};

use futures_util::StreamExt;
use tokio::{sync::watch, task::AbortHandle};
use tracing::{info, warn};

use crate::{
    auth::{AuthError, IdentityGateway, ProviderIdentity},
    store::ProfileStore,
    InFlight, UserProfile,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No auth-state callback has arrived yet.
    Loading,
    Anonymous { error: Option<String> },
    Authenticated(UserProfile),
}

/// Which top-level screen the front end should draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    Loading,
    Login { error: Option<String> },
    Chat,
}

impl SessionState {
    pub fn view(&self) -> View {
        match self {
            SessionState::Loading => View::Loading,
            SessionState::Anonymous { error } => View::Login { error: error.clone() },
            SessionState::Authenticated(_) => View::Chat,
        }
    }

    pub fn profile(&self) -> Option<&UserProfile> {
        match self {
            SessionState::Authenticated(profile) => Some(profile),
            _ => None,
        }
    }
}

struct Inner {
    identity: Arc<dyn IdentityGateway>,
    profiles: Arc<dyn ProfileStore>,
    state: watch::Sender<SessionState>,
    signing_in: AtomicBool,
}

impl Inner {
    fn on_auth_state(&self, identity: Option<ProviderIdentity>) {
        self.state.send_if_modified(|state| match identity {
            Some(identity) => {
                let profile = UserProfile::from_identity(identity);
                if matches!(state, SessionState::Authenticated(current) if current.uid == profile.uid) {
                    return false;
                }
                info!(uid = %profile.uid, "signed in");
                *state = SessionState::Authenticated(profile);
                true
            }
            None => {
                // keep an inline login error around
                if matches!(state, SessionState::Anonymous { .. }) {
                    return false;
                }
                *state = SessionState::Anonymous { error: None };
                true
            }
        });
    }

    async fn sign_in(&self) -> Result<UserProfile, AuthError> {
        let identity = self.identity.sign_in_interactive().await?;
        let profile = UserProfile::from_identity(identity);
        self.profiles
            .upsert_profile(&profile)
            .await
            .map_err(|err| AuthError::Other(err.to_string()))?;
        Ok(profile)
    }

    async fn login(self: Arc<Self>) {
        let Some(_in_flight) = InFlight::try_acquire(&self.signing_in) else {
            return;
        };

        self.state.send_if_modified(|state| match state {
            SessionState::Anonymous { error } if error.is_some() => {
                *error = None;
                true
            }
            _ => false,
        });

        match self.sign_in().await {
            Ok(profile) => {
                self.state.send_if_modified(|state| {
                    if matches!(state, SessionState::Authenticated(current) if *current == profile) {
                        return false;
                    }
                    *state = SessionState::Authenticated(profile);
                    true
                });
            }
            Err(err) => {
                warn!(%err, "sign-in failed");
                self.state.send_if_modified(|state| {
                    if matches!(state, SessionState::Authenticated(_)) {
                        return false;
                    }
                    *state = SessionState::Anonymous { error: Some(err.user_message()) };
                    true
                });
            }
        }
    }
}

/// Tracks who is signed in, driven by the identity provider's auth-state feed.
pub struct SessionController {
    inner: Arc<Inner>,
    listener: AbortHandle,
}

impl SessionController {
    pub fn start(identity: Arc<dyn IdentityGateway>, profiles: Arc<dyn ProfileStore>) -> SessionController {
        let mut auth_state = identity.subscribe_auth_state();
        let inner = Arc::new(Inner {
            identity,
            profiles,
            state: watch::Sender::new(SessionState::Loading),
            signing_in: AtomicBool::new(false),
        });

        let listener = {
            let inner = inner.clone();
            tokio::spawn(async move {
                while let Some(identity) = auth_state.next().await {
                    inner.on_auth_state(identity);
                }
            })
            .abort_handle()
        };

        SessionController { inner, listener }
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn view(&self) -> View {
        self.inner.state.borrow().view()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn is_signing_in(&self) -> bool {
        self.inner.signing_in.load(Ordering::SeqCst)
    }

    /// Runs the interactive sign-in. Failures end up as an inline error on the
    /// login view; nothing is returned to the caller.
    pub async fn login(&self) {
        self.login_task().await
    }

    /// [`login`](Self::login) as an owned future, for spawning from an event loop.
    pub fn login_task(&self) -> impl Future<Output = ()> + Send + 'static {
        self.inner.clone().login()
    }

    /// Forgets the user right away; the provider sign-out finishes in the background.
    pub fn logout(&self) {
        self.inner.state.send_replace(SessionState::Anonymous { error: None });

        let identity = self.inner.identity.clone();
        tokio::spawn(async move {
            if let Err(err) = identity.sign_out().await {
                warn!(%err, "sign-out failed");
            }
        });
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
