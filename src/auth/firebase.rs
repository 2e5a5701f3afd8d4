use std::{net::SocketAddr, path::{Path, PathBuf}, time::Duration};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::Subscription;

use super::{clients::{ClientProvider, Clients}, lockin, login, AuthError, IdentityGateway, ProviderIdentity};

/// Interactive sign-in through an OAuth provider, federated into a Firebase project.
///
/// With a session file the signed-in identity survives restarts; without one
/// every process starts signed out.
pub struct FirebaseIdentity {
    clients: Clients,
    provider: ClientProvider,
    callback_addr: SocketAddr,
    sign_in_timeout: Duration,
    session_file: Option<PathBuf>,
    current: watch::Sender<Option<ProviderIdentity>>,
}

impl FirebaseIdentity {
    pub fn new(
        clients: Clients,
        provider: ClientProvider,
        callback_addr: SocketAddr,
        sign_in_timeout: Duration,
    ) -> FirebaseIdentity {
        FirebaseIdentity {
            clients,
            provider,
            callback_addr,
            sign_in_timeout,
            session_file: None,
            current: watch::Sender::new(None),
        }
    }

    /// Restores whoever was signed in when the file was last written.
    pub fn with_session_file(mut self, path: impl Into<PathBuf>) -> FirebaseIdentity {
        let path = path.into();
        let restored = restore_session(&path);
        if let Some(identity) = &restored {
            info!("welcome back u/{}", identity.uid);
        }
        self.current.send_replace(restored);
        self.session_file = Some(path);
        self
    }

    async fn remember(&self, identity: Option<&ProviderIdentity>) {
        let Some(path) = &self.session_file else {
            return;
        };
        let result = match identity {
            Some(identity) => match serde_json::to_vec(identity) {
                Ok(json) => tokio::fs::write(path, json).await,
                Err(err) => {
                    warn!(%err, "can't encode session");
                    return;
                }
            },
            None => match tokio::fs::remove_file(path).await {
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        if let Err(err) = result {
            warn!(%err, path = %path.display(), "can't update session file");
        }
    }

    fn callback_base(&self) -> String {
        format!("http://localhost:{}", self.callback_addr.port())
    }

    /// Publishes only real transitions, so subscribers see each change once.
    fn publish(&self, identity: Option<ProviderIdentity>) {
        self.current.send_if_modified(|current| {
            let changed = current.as_ref().map(|i| &i.uid) != identity.as_ref().map(|i| &i.uid);
            *current = identity;
            changed
        });
    }
}

#[async_trait]
impl IdentityGateway for FirebaseIdentity {
    fn subscribe_auth_state(&self) -> Subscription<Option<ProviderIdentity>> {
        Subscription::from_watch(self.current.subscribe())
    }

    async fn sign_in_interactive(&self) -> Result<ProviderIdentity, AuthError> {
        let client = self.clients.get_client(self.provider)?;
        let grant = login::login(&client, self.provider, self.callback_addr, self.sign_in_timeout).await?;
        let identity = lockin::lockin(&self.clients, self.provider, grant, &self.callback_base()).await?;

        self.remember(Some(&identity)).await;
        self.publish(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if let Some(identity) = self.current.borrow().as_ref() {
            info!("goodbye u/{}", identity.uid);
        }
        self.remember(None).await;
        self.publish(None);
        Ok(())
    }
}

fn restore_session(path: &Path) -> Option<ProviderIdentity> {
    let json = std::fs::read(path).ok()?;
    match serde_json::from_slice(&json) {
        Ok(identity) => Some(identity),
        Err(err) => {
            warn!(%err, path = %path.display(), "ignoring unreadable session file");
            None
        }
    }
}
