use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{AppError, Subscription};

mod clients;
mod firebase;
mod lockin;
mod login;

pub use clients::{ClientProvider, Clients};
pub use firebase::FirebaseIdentity;

/// What the identity provider tells us about a signed-in account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdentity {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("sign-in is not authorized for this domain")]
    UnauthorizedDomain,
    #[error("the sign-in window was blocked")]
    PopupBlocked,
    #[error("{0}")]
    Other(String),
}

impl AuthError {
    pub fn user_message(&self) -> String {
        match self {
            AuthError::UnauthorizedDomain => "Sign-in from this domain is not allowed. \
                Add this URL to the authorized domains in the Firebase console.".to_owned(),
            AuthError::PopupBlocked => "The sign-in window was blocked. \
                Allow pop-ups in your browser settings.".to_owned(),
            AuthError::Other(reason) if reason.trim().is_empty() => {
                "Sign-in failed: please wait a moment and try again.".to_owned()
            }
            AuthError::Other(reason) => format!("Sign-in failed: {reason}"),
        }
    }
}

impl From<AppError> for AuthError {
    fn from(err: AppError) -> Self {
        AuthError::Other(err.to_string())
    }
}

#[async_trait]
pub trait IdentityGateway: Send + Sync {
    /// Current auth state first, then one item per sign-in/sign-out transition.
    /// `None` means signed out.
    fn subscribe_auth_state(&self) -> Subscription<Option<ProviderIdentity>>;

    async fn sign_in_interactive(&self) -> Result<ProviderIdentity, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;
}
