use std::{fmt, str::FromStr};

use oauth2::{basic::BasicClient, AuthUrl, Client, ClientId, ClientSecret, RedirectUrl, TokenUrl};
use serde::Deserialize;
use serde_json::Value;

use crate::{AppResult, GetField};

pub(crate) type HappyClient = Client<oauth2::StandardErrorResponse<oauth2::basic::BasicErrorResponseType>, oauth2::StandardTokenResponse<oauth2::EmptyExtraTokenFields, oauth2::basic::BasicTokenType>, oauth2::StandardTokenIntrospectionResponse<oauth2::EmptyExtraTokenFields, oauth2::basic::BasicTokenType>, oauth2::StandardRevocableToken, oauth2::StandardErrorResponse<oauth2::RevocationErrorResponseType>, oauth2::EndpointSet, oauth2::EndpointNotSet, oauth2::EndpointNotSet, oauth2::EndpointNotSet, oauth2::EndpointSet>;

const IDP_URL: &str = "https://identitytoolkit.googleapis.com/v1/accounts:signInWithIdp";

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClientProvider {
    Google,
    Github,
}

impl ClientProvider {
    pub fn id(&self) -> &str {
        use ClientProvider::*;
        match self {
            Google => "google.com",
            Github => "github.com",
        }
    }

    pub(crate) fn path(&self) -> &str {
        use ClientProvider::*;
        match self {
            Google => "google",
            Github => "github",
        }
    }

    fn endpoints(&self) -> (&'static str, &'static str) {
        use ClientProvider::*;
        match self {
            Google => ("https://accounts.google.com/o/oauth2/auth", "https://oauth2.googleapis.com/token"),
            Github => ("https://github.com/login/oauth/authorize", "https://github.com/login/oauth/access_token"),
        }
    }

    pub(crate) fn scopes(&self) -> &'static [&'static str] {
        use ClientProvider::*;
        match self {
            Google => &["openid", "email", "profile"],
            Github => &["read:user", "user:email"],
        }
    }
}

impl FromStr for ClientProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "google" => Ok(ClientProvider::Google),
            "github" => Ok(ClientProvider::Github),
            other => Err(format!("unknown sign-in provider {other}")),
        }
    }
}

impl fmt::Display for ClientProvider {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Clone)]
pub struct Clients {
    pub(crate) firebase_idpurl: String,
    google_client: Option<HappyClient>,
    github_client: Option<HappyClient>,
}

impl Clients {
    /// `callback_base` is where the local sign-in listener is reachable, e.g. `http://localhost:8080`.
    pub fn from_json(json: Value, callback_base: &str) -> AppResult<Clients> {
        let firebase_idpurl = format!(
            "{IDP_URL}?key={}",
            json.get_obj_field("firebase")?.get_str_field("apikey")?
        );
        let google_client = provider_client(&json, ClientProvider::Google, callback_base)?;
        let github_client = provider_client(&json, ClientProvider::Github, callback_base)?;

        Ok(
            Clients {
                firebase_idpurl,
                google_client,
                github_client,
            }
        )
    }

    pub fn get_client(&self, provider: ClientProvider) -> AppResult<HappyClient> {
        use ClientProvider::*;
        match provider {
            Google => self.google_client.clone(),
            Github => self.github_client.clone(),
        }.ok_or(format!("OAuth provider {provider} keys not supplied").into())
    }
}

fn provider_client(json: &Value, provider: ClientProvider, callback_base: &str) -> AppResult<Option<HappyClient>> {
    let Some(json) = json.get(provider.path()) else {
        return Ok(None);
    };
    let client_id = ClientId::new(json.get_str_field("client_id")?);
    let client_secret = ClientSecret::new(json.get_str_field("client_secret")?);

    let (auth_url, token_url) = provider.endpoints();
    let auth_url = AuthUrl::new(auth_url.to_owned())?;
    let token_url = TokenUrl::new(token_url.to_owned())?;
    let redirect_url = RedirectUrl::new(format!(
        "{}/lockin/{}",
        callback_base.trim_end_matches('/'),
        provider.path()
    ))?;

    Ok(Some(
        BasicClient::new(client_id)
        .set_client_secret(client_secret)
        .set_auth_uri(auth_url)
        .set_token_uri(token_url)
        .set_redirect_uri(redirect_url)
    ))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn clients_are_built_only_for_supplied_providers() {
        let clients = Clients::from_json(json!({
            "firebase": { "apikey": "k123" },
            "google": { "client_id": "id", "client_secret": "secret" },
        }), "http://localhost:8080/").unwrap();

        assert!(clients.firebase_idpurl.ends_with("accounts:signInWithIdp?key=k123"));
        let google = clients.get_client(ClientProvider::Google).unwrap();
        assert_eq!(google.redirect_uri().unwrap().as_str(), "http://localhost:8080/lockin/google");
        assert!(clients.get_client(ClientProvider::Github).is_err());
    }

    #[test]
    fn missing_firebase_key_is_an_error() {
        assert!(Clients::from_json(json!({ "google": {} }), "http://localhost:8080").is_err());
    }

    #[test]
    fn provider_names_parse() {
        assert_eq!("Google".parse::<ClientProvider>().unwrap(), ClientProvider::Google);
        assert_eq!("github".parse::<ClientProvider>().unwrap(), ClientProvider::Github);
        assert!("facebook".parse::<ClientProvider>().is_err());
    }
}
