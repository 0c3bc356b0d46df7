use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::config::Timeouts;
use crate::error::RelayError;
use crate::provider::{AnswerConfig, AnswerShape};

const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024; // 2MB

/// Builds the final-answer prompt around the extracted reasoning.
pub fn answer_prompt(reasoning: &str) -> String {
    format!(
        "Given this reasoning about the technical problem:\n\n{reasoning}\n\nWhat is the correct answer?"
    )
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicMessage {
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    text: Option<String>,
}

/// Issues the single non-streaming final-answer call. One overall timeout,
/// no retries, no partial recovery.
pub struct AnswerDispatch {
    client: Client,
    timeout: Duration,
}

impl AnswerDispatch {
    pub fn new(timeouts: &Timeouts) -> Self {
        let client = Client::builder()
            .connect_timeout(timeouts.connect())
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            timeout: timeouts.answer(),
        }
    }

    pub async fn dispatch(
        &self,
        config: &AnswerConfig,
        model: &str,
        reasoning: &str,
        max_tokens: u64,
    ) -> Result<String, RelayError> {
        let prompt = answer_prompt(reasoning);
        let body = match config.shape {
            AnswerShape::Anthropic => serde_json::json!({
                "model": model,
                "max_tokens": max_tokens,
                "messages": [{"role": "user", "content": prompt}],
            }),
            AnswerShape::OpenAi => serde_json::json!({
                "model": model,
                "messages": [{"role": "user", "content": prompt}],
                "stream": false,
                "max_tokens": max_tokens,
            }),
        };

        let mut request = self
            .client
            .post(&config.base_url)
            .timeout(self.timeout)
            .json(&body);
        for (name, value) in config.headers() {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_bytes = response.bytes().await.unwrap_or_default();
            let truncated = &error_bytes[..error_bytes.len().min(MAX_RESPONSE_BYTES)];
            return Err(RelayError::RequestFailed {
                status: Some(status.as_u16()),
                body: String::from_utf8_lossy(truncated).into_owned(),
            });
        }

        let bytes = response.bytes().await?;
        if bytes.len() > MAX_RESPONSE_BYTES {
            return Err(RelayError::RequestFailed {
                status: None,
                body: format!(
                    "response too large: {} bytes (max {})",
                    bytes.len(),
                    MAX_RESPONSE_BYTES
                ),
            });
        }

        let text = match config.shape {
            AnswerShape::Anthropic => {
                let message: AnthropicMessage = serde_json::from_slice(&bytes).map_err(|e| {
                    RelayError::RequestFailed {
                        status: None,
                        body: format!("failed to parse response: {e}"),
                    }
                })?;
                message
                    .content
                    .into_iter()
                    .find_map(|block| block.text.filter(|t| !t.is_empty()))
            }
            AnswerShape::OpenAi => {
                let completion: ChatCompletion = serde_json::from_slice(&bytes).map_err(|e| {
                    RelayError::RequestFailed {
                        status: None,
                        body: format!("failed to parse response: {e}"),
                    }
                })?;
                completion
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
            }
        };

        text.ok_or_else(|| RelayError::RequestFailed {
            status: None,
            body: "empty content in answer response".to_string(),
        })
    }
}
