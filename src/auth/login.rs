use std::{net::SocketAddr, process::Stdio, sync::Arc, time::Duration};

use axum::{debug_handler, extract::{Path, Query, State}, response::{Html, IntoResponse}, routing::get, Router};
use oauth2::{AuthorizationCode, CsrfToken, PkceCodeChallenge, PkceCodeVerifier, Scope};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::{net::TcpListener, process::Command, sync::oneshot};
use tracing::{debug, info, warn};

use crate::include_res;

use super::{clients::{ClientProvider, HappyClient}, AuthError};

#[derive(Deserialize)]
pub(crate) struct LockinQuery {
    pub(crate) state: Option<String>,
    pub(crate) code: Option<String>,
    pub(crate) error: Option<String>,
}

/// An authorization code plus the verifier it was requested with.
pub(crate) struct Grant {
    pub(crate) code: AuthorizationCode,
    pub(crate) pkce_verifier: PkceCodeVerifier,
}

type Reply = oneshot::Sender<Result<AuthorizationCode, AuthError>>;

#[derive(Clone)]
struct CallbackState {
    provider: ClientProvider,
    csrf_state: String,
    reply: Arc<Mutex<Option<Reply>>>,
}

/// Opens the provider's consent page in a browser window and waits for it to
/// redirect back to the local listener with an authorization code.
pub(crate) async fn login(
    client: &HappyClient,
    provider: ClientProvider,
    callback_addr: SocketAddr,
    timeout: Duration,
) -> Result<Grant, AuthError> {
    let (pkce_code_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

    let mut request = client.authorize_url(CsrfToken::new_random);
    for scope in provider.scopes() {
        request = request.add_scope(Scope::new(scope.to_string()));
    }
    let (authorize_url, csrf_state) = request
        .set_pkce_challenge(pkce_code_challenge)
        .url();

    let listener = TcpListener::bind(callback_addr)
        .await
        .map_err(|err| AuthError::Other(format!("can't listen for the sign-in redirect on {callback_addr}: {err}")))?;

    let (reply_tx, reply_rx) = oneshot::channel();
    let app = Router::new()
        .route("/lockin/{provider}", get(lockin_callback))
        .with_state(CallbackState {
            provider,
            csrf_state: csrf_state.secret().clone(),
            reply: Arc::new(Mutex::new(Some(reply_tx))),
        });

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let shutdown = async {
            let _ = shutdown_rx.await;
        };
        if let Err(err) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
            warn!(%err, "sign-in listener failed");
        }
    });

    let outcome = match open_popup(authorize_url.as_str()).await {
        Ok(()) => tokio::time::timeout(timeout, reply_rx).await,
        Err(err) => {
            let _ = shutdown_tx.send(());
            return Err(err);
        }
    };
    let _ = shutdown_tx.send(());

    match outcome {
        Ok(Ok(Ok(code))) => Ok(Grant { code, pkce_verifier }),
        Ok(Ok(Err(err))) => Err(err),
        Ok(Err(_)) => Err(AuthError::Other("the sign-in listener stopped unexpectedly".to_owned())),
        Err(_) => Err(AuthError::Other("the sign-in window was closed before sign-in finished".to_owned())),
    }
}

#[debug_handler]
async fn lockin_callback(
    Path(provider): Path<ClientProvider>,
    Query(LockinQuery { state, code, error }): Query<LockinQuery>,
    State(callback): State<CallbackState>,
) -> impl IntoResponse {
    let outcome = 'a: {
        if provider != callback.provider {
            break 'a Err(AuthError::Other(format!("unexpected redirect for {provider}")));
        }
        if let Some(error) = error {
            break 'a Err(AuthError::Other(error));
        }
        let Some(state) = state else {
            break 'a Err(AuthError::Other("OAuth: without state".to_owned()));
        };
        if state != callback.csrf_state {
            break 'a Err(AuthError::Other("csrf tokens don't match".to_owned()));
        }
        let Some(code) = code else {
            break 'a Err(AuthError::Other("OAuth: without code".to_owned()));
        };
        Ok(AuthorizationCode::new(code))
    };

    let page = if outcome.is_ok() {
        include_res!(str, "/pages/lockin.html")
    } else {
        include_res!(str, "/pages/lockin_failed.html")
    };

    match callback.reply.lock().take() {
        Some(reply) => {
            let _ = reply.send(outcome);
        }
        None => debug!("ignoring repeated sign-in redirect"),
    }

    Html(page)
}

async fn open_popup(url: &str) -> Result<(), AuthError> {
    info!("opening sign-in window: {url}");
    let status = popup_command(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => {
            warn!(%status, "browser launcher refused the sign-in window");
            Err(AuthError::PopupBlocked)
        }
        Err(err) => {
            warn!(%err, "no browser launcher available");
            Err(AuthError::PopupBlocked)
        }
    }
}

#[cfg(target_os = "macos")]
fn popup_command(url: &str) -> Command {
    let mut command = Command::new("open");
    command.arg(url);
    command
}

#[cfg(target_os = "windows")]
fn popup_command(url: &str) -> Command {
    let mut command = Command::new("cmd");
    command.args(["/C", "start", "", url]);
    command
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn popup_command(url: &str) -> Command {
    let mut command = Command::new("xdg-open");
    command.arg(url);
    command
}
