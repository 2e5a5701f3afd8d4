use oauth2::TokenResponse;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::GetField;

use super::{clients::{ClientProvider, Clients}, login::Grant, AuthError, ProviderIdentity};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FirebaseRequest {
    post_body: String,
    request_uri: String,
    return_idp_credential: bool,
    return_secure_token: bool,
}

/// Trades the authorization code for a provider token, then signs that token
/// in with Firebase to get the account's stable uid and profile.
pub(crate) async fn lockin(
    clients: &Clients,
    provider: ClientProvider,
    Grant { code, pkce_verifier }: Grant,
    request_uri: &str,
) -> Result<ProviderIdentity, AuthError> {
    let client = clients.get_client(provider)?;
    let http_client = reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(http_error)?;
    let token_result = client
        .exchange_code(code)
        .set_pkce_verifier(pkce_verifier)
        .request_async(&http_client)
        .await
        .map_err(|err| AuthError::Other(format!("token exchange failed: {err}")))?;

    let access_token = token_result.access_token().secret();
    let body: Value = http_client.post(&clients.firebase_idpurl)
        .json(&FirebaseRequest {
            post_body: format!("access_token={access_token}&providerId={}", provider.id()),
            request_uri: request_uri.to_owned(),
            return_idp_credential: true,
            return_secure_token: true,
        })
        .send()
        .await
        .map_err(http_error)?
        .json()
        .await
        .map_err(http_error)?;

    let identity = identity_from_idp_response(&body)?;
    info!("welcome u/{}", identity.uid);
    Ok(identity)
}

fn http_error(err: reqwest::Error) -> AuthError {
    AuthError::Other(err.to_string())
}

pub(crate) fn identity_from_idp_response(body: &Value) -> Result<ProviderIdentity, AuthError> {
    if let Some(error) = body.get("error") {
        let message = error.get_opt_str_field("message").unwrap_or_default();
        return Err(idp_error(&message));
    }

    Ok(ProviderIdentity {
        uid: body.get_str_field("localId")?,
        display_name: body.get_opt_str_field("displayName"),
        email: body.get_opt_str_field("email"),
        photo_url: body.get_opt_str_field("photoUrl"),
    })
}

fn idp_error(message: &str) -> AuthError {
    // Identity Toolkit messages look like "CODE" or "CODE : detail".
    let code = message.split([' ', ':']).next().unwrap_or_default();
    match code {
        "UNAUTHORIZED_DOMAIN" => AuthError::UnauthorizedDomain,
        _ => AuthError::Other(message.to_owned()),
    }
}
