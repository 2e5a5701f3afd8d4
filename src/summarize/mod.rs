use async_trait::async_trait;

use crate::Message;

mod gemini;

pub use gemini::{GeminiConfig, GeminiSummarizer};

pub const SYSTEM_INSTRUCTION: &str = "You are the capable secretary of a dental clinic. \
    Summarize the staff chat history concisely and relay the important instructions \
    and decisions as a bulleted list.";

/// How many of the latest messages go into a summary request.
pub const SUMMARY_WINDOW: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    #[error("{0} is not set")]
    MissingApiKey(String),
    #[error("the model returned no text")]
    EmptyResponse,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error: {0}")]
    Api(String),
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn complete(&self, system_instruction: &str, user_content: &str) -> Result<String, SummarizeError>;
}

/// `"<sender>: <text>"` lines for the last [`SUMMARY_WINDOW`] messages.
pub fn transcript(messages: &[Message]) -> String {
    let window = &messages[messages.len().saturating_sub(SUMMARY_WINDOW)..];
    window
        .iter()
        .map(|m| format!("{}: {}", m.sender_name, m.text))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use crate::{Message, ReadSet};

    use super::*;

    fn message(n: usize) -> Message {
        Message {
            id: n.to_string(),
            text: format!("note {n}"),
            sender_id: "u".to_owned(),
            sender_name: if n % 2 == 0 { "Aiko" } else { "Ken" }.to_owned(),
            sender_photo: String::new(),
            timestamp: n as i64,
            is_important: false,
            read_by: ReadSet::from_iter(["u"]),
        }
    }

    #[test]
    fn transcript_keeps_only_the_last_twenty() {
        let messages: Vec<_> = (0..25).map(message).collect();
        let transcript = transcript(&messages);
        let lines: Vec<_> = transcript.lines().collect();

        assert_eq!(lines.len(), SUMMARY_WINDOW);
        assert_eq!(lines[0], "Ken: note 5");
        assert_eq!(lines[19], "Aiko: note 24");
    }

    #[test]
    fn short_history_is_used_whole() {
        let messages: Vec<_> = (0..2).map(message).collect();
        assert_eq!(transcript(&messages), "Aiko: note 0\nKen: note 1");
    }
}
