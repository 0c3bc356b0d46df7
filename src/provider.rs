use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Client;

use crate::config::{Credentials, Endpoints};
use crate::error::RelayError;

/// Header names whose values must never appear in debug output.
const SECRET_HEADERS: [&str; 2] = ["authorization", "x-api-key"];

const OPENROUTER_REFERER: &str = "https://github.com/deepthought-relay";
const OPENROUTER_TITLE: &str = "deepthought relay";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Which backend streams the reasoning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReasoningMode {
    Cloud,
    Local,
}

impl FromStr for ReasoningMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cloud" => Ok(Self::Cloud),
            "local" => Ok(Self::Local),
            other => Err(format!("unknown reasoning mode: {other} (expected cloud or local)")),
        }
    }
}

/// Which backend produces the final answer. Selected independently of the
/// reasoning mode; the two are never coupled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnswerMode {
    Anthropic,
    Local,
}

impl FromStr for AnswerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "local" => Ok(Self::Local),
            other => Err(format!("unknown answer mode: {other} (expected anthropic or local)")),
        }
    }
}

/// Wire shape of streamed frames. Each variant has its own decode path in
/// the frame decoder; a new backend family means a new variant, not another
/// conditional branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadShape {
    /// Cloud router: SSE-framed chat-completions deltas.
    Cloud,
    /// Local server: chat-completions deltas or bare NDJSON lines.
    Local,
}

/// Wire shape of the non-streaming final-answer exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnswerShape {
    /// Anthropic messages API.
    Anthropic,
    /// OpenAI-compatible chat completions.
    OpenAi,
}

/// Resolved reasoning backend: endpoint, headers, payload shape.
/// Read-only for the life of one relay call.
#[derive(Clone)]
pub struct ProviderConfig {
    pub provider: &'static str,
    pub base_url: String,
    headers: Vec<(&'static str, String)>,
    pub shape: PayloadShape,
}

impl ProviderConfig {
    pub fn new(
        provider: &'static str,
        base_url: impl Into<String>,
        headers: Vec<(&'static str, String)>,
        shape: PayloadShape,
    ) -> Self {
        Self {
            provider,
            base_url: base_url.into(),
            headers,
            shape,
        }
    }

    pub fn headers(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.headers.iter().map(|(name, value)| (*name, value.as_str()))
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("headers", &redact_headers(&self.headers))
            .field("shape", &self.shape)
            .finish()
    }
}

/// Resolved final-answer backend.
#[derive(Clone)]
pub struct AnswerConfig {
    pub provider: &'static str,
    pub base_url: String,
    headers: Vec<(&'static str, String)>,
    pub shape: AnswerShape,
}

impl AnswerConfig {
    pub fn new(
        provider: &'static str,
        base_url: impl Into<String>,
        headers: Vec<(&'static str, String)>,
        shape: AnswerShape,
    ) -> Self {
        Self {
            provider,
            base_url: base_url.into(),
            headers,
            shape,
        }
    }

    pub fn headers(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.headers.iter().map(|(name, value)| (*name, value.as_str()))
    }
}

impl fmt::Debug for AnswerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnswerConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("headers", &redact_headers(&self.headers))
            .field("shape", &self.shape)
            .finish()
    }
}

fn redact_headers<'a>(headers: &'a [(&'static str, String)]) -> Vec<(&'static str, &'a str)> {
    headers
        .iter()
        .map(|(name, value)| {
            if SECRET_HEADERS.contains(&name.to_lowercase().as_str()) {
                (*name, "[REDACTED]")
            } else {
                (*name, value.as_str())
            }
        })
        .collect()
}

/// Maps a requested mode to endpoint, auth headers, and payload shape.
/// Fails fast: missing credential or an unreachable local backend is never
/// retried.
pub struct Resolver {
    credentials: Credentials,
    endpoints: Endpoints,
    probe: Client,
}

impl Resolver {
    pub fn new(credentials: Credentials, endpoints: Endpoints, probe_timeout: Duration) -> Self {
        let probe = Client::builder()
            .timeout(probe_timeout)
            .build()
            .expect("failed to build HTTP client");

        Self {
            credentials,
            endpoints,
            probe,
        }
    }

    pub async fn resolve_reasoning(
        &self,
        mode: ReasoningMode,
    ) -> Result<ProviderConfig, RelayError> {
        match mode {
            ReasoningMode::Cloud => {
                let key = self.credentials.openrouter_key.as_deref().ok_or_else(|| {
                    RelayError::Configuration("OPENROUTER_API_KEY is not set".to_string())
                })?;

                Ok(ProviderConfig {
                    provider: "openrouter",
                    base_url: self.endpoints.cloud_url.clone(),
                    headers: vec![
                        ("Authorization", format!("Bearer {key}")),
                        ("Content-Type", "application/json".to_string()),
                        ("HTTP-Referer", OPENROUTER_REFERER.to_string()),
                        ("X-Title", OPENROUTER_TITLE.to_string()),
                    ],
                    shape: PayloadShape::Cloud,
                })
            }
            ReasoningMode::Local => {
                self.probe_local().await?;

                Ok(ProviderConfig {
                    provider: "local",
                    base_url: self.endpoints.local_url.clone(),
                    headers: vec![("Content-Type", "application/json".to_string())],
                    shape: PayloadShape::Local,
                })
            }
        }
    }

    pub async fn resolve_answer(&self, mode: AnswerMode) -> Result<AnswerConfig, RelayError> {
        match mode {
            AnswerMode::Anthropic => {
                let key = self.credentials.anthropic_key.as_deref().ok_or_else(|| {
                    RelayError::Configuration("ANTHROPIC_API_KEY is not set".to_string())
                })?;

                Ok(AnswerConfig {
                    provider: "anthropic",
                    base_url: self.endpoints.anthropic_url.clone(),
                    headers: vec![
                        ("x-api-key", key.to_string()),
                        ("anthropic-version", ANTHROPIC_VERSION.to_string()),
                        ("Content-Type", "application/json".to_string()),
                    ],
                    shape: AnswerShape::Anthropic,
                })
            }
            AnswerMode::Local => {
                self.probe_local().await?;

                Ok(AnswerConfig {
                    provider: "local",
                    base_url: self.endpoints.local_url.clone(),
                    headers: vec![("Content-Type", "application/json".to_string())],
                    shape: AnswerShape::OpenAi,
                })
            }
        }
    }

    /// Pre-flight GET against the local server. Any failure is a fast fail,
    /// not a retryable condition.
    async fn probe_local(&self) -> Result<(), RelayError> {
        let response = self
            .probe
            .get(&self.endpoints.local_health_url)
            .send()
            .await
            .map_err(|e| RelayError::BackendUnavailable {
                backend: "local".to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::BackendUnavailable {
                backend: "local".to_string(),
                message: format!("health probe returned {status}"),
            });
        }

        tracing::debug!(url = %self.endpoints.local_health_url, "local backend probe ok");
        Ok(())
    }
}
