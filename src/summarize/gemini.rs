use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{SummarizeError, Summarizer};

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key. Read on every request.
    pub api_key_var: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        GeminiConfig {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_owned(),
            model: "gemini-3-flash-preview".to_owned(),
            api_key_var: "API_KEY".to_owned(),
        }
    }
}

pub struct GeminiSummarizer {
    config: GeminiConfig,
    http_client: reqwest::Client,
}

impl GeminiSummarizer {
    pub fn new(config: GeminiConfig) -> GeminiSummarizer {
        GeminiSummarizer {
            config,
            http_client: reqwest::Client::new(),
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

impl<'a> GenerateRequest<'a> {
    fn new(system_instruction: &'a str, user_content: &'a str) -> Self {
        GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: system_instruction }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: user_content }],
            }],
        }
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content
            .parts
            .into_iter()
            .filter_map(|part| part.text)
            .collect();

        if text.trim().is_empty() { None } else { Some(text) }
    }
}

#[async_trait]
impl Summarizer for GeminiSummarizer {
    async fn complete(&self, system_instruction: &str, user_content: &str) -> Result<String, SummarizeError> {
        let api_key = dotenv::var(&self.config.api_key_var)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| SummarizeError::MissingApiKey(self.config.api_key_var.clone()))?;

        debug!(model = %self.config.model, chars = user_content.len(), "requesting summary");
        let response = self.http_client.post(self.url())
            .header("x-goog-api-key", api_key)
            .json(&GenerateRequest::new(system_instruction, user_content))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "summary request rejected");
            return Err(SummarizeError::Api(format!("{status}: {body}")));
        }

        response
            .json::<GenerateResponse>()
            .await?
            .text()
            .ok_or(SummarizeError::EmptyResponse)
    }
}
