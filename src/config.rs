use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use serde_json::Value;

use crate::{
    auth::{ClientProvider, Clients},
    summarize::GeminiConfig,
    AppResult,
};

const DEFAULT_DATABASE_URL: &str = "sqlite://staffroom.db?mode=rwc";
const DEFAULT_CALLBACK_ADDR: &str = "127.0.0.1:8080";

/// Everything read from the environment (and `.env`) at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub client_secret_path: PathBuf,
    /// Where the signed-in identity is kept between runs.
    pub session_path: PathBuf,
    pub provider: ClientProvider,
    pub callback_addr: SocketAddr,
    pub sign_in_timeout: Duration,
    pub gemini: GeminiConfig,
}

impl Config {
    pub fn from_env() -> AppResult<Config> {
        Config::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Config> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());
        let gemini_defaults = GeminiConfig::default();

        Ok(Config {
            database_url: var("DATABASE_URL", DEFAULT_DATABASE_URL),
            client_secret_path: PathBuf::from(var("CLIENT_SECRET_PATH", "client_secret.json")),
            session_path: PathBuf::from(var("SESSION_PATH", "staffroom-session.json")),
            provider: ClientProvider::from_str(&var("SIGN_IN_PROVIDER", "google"))?,
            callback_addr: var("CALLBACK_ADDR", DEFAULT_CALLBACK_ADDR).parse()?,
            sign_in_timeout: Duration::from_secs(var("SIGN_IN_TIMEOUT_SECS", "120").parse()?),
            gemini: GeminiConfig {
                endpoint: var("GEMINI_ENDPOINT", &gemini_defaults.endpoint),
                model: var("GEMINI_MODEL", &gemini_defaults.model),
                api_key_var: gemini_defaults.api_key_var,
            },
        })
    }

    pub fn callback_base(&self) -> String {
        format!("http://localhost:{}", self.callback_addr.port())
    }

    pub fn load_clients(&self) -> AppResult<Clients> {
        let json = std::fs::read_to_string(&self.client_secret_path)
            .map_err(|err| format!("can't read {}: {err}", self.client_secret_path.display()))?;
        Clients::from_json(Value::from_str(&json)?, &self.callback_base())
    }
}
