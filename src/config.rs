use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Optional settings file searched in the current directory.
pub const CONFIG_FILE: &str = "deepthought.toml";

/// Pre-resolved secrets handed to the provider resolver. The relay core
/// never reads credentials from any other source.
#[derive(Clone, Default)]
pub struct Credentials {
    pub openrouter_key: Option<String>,
    pub anthropic_key: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        let openrouter_key = env::var("OPENROUTER_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        if openrouter_key.is_none() {
            tracing::warn!("OPENROUTER_API_KEY not set — cloud reasoning unavailable");
        }

        let anthropic_key = env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        if anthropic_key.is_none() {
            tracing::warn!("ANTHROPIC_API_KEY not set — anthropic answers unavailable");
        }

        Self {
            openrouter_key,
            anthropic_key,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("openrouter_key", &self.openrouter_key.as_ref().map(|_| "[REDACTED]"))
            .field("anthropic_key", &self.anthropic_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Endpoints {
    /// Cloud reasoning router (chat-completions shaped).
    pub cloud_url: String,
    /// Local inference server (chat-completions shaped).
    pub local_url: String,
    /// Local server health probe target.
    pub local_health_url: String,
    /// Anthropic messages endpoint for final answers.
    pub anthropic_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            cloud_url: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            local_url: "http://127.0.0.1:11434/v1/chat/completions".to_string(),
            local_health_url: "http://127.0.0.1:11434/".to_string(),
            anthropic_url: "https://api.anthropic.com/v1/messages".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Timeouts {
    /// TCP connect bound.
    pub connect_secs: u64,
    /// Bound on waiting for response headers (pre-streaming phase).
    pub first_byte_secs: u64,
    /// Inactivity watchdog between streamed chunks.
    pub stall_secs: u64,
    /// Overall bound on the non-streaming final-answer call.
    pub answer_secs: u64,
    /// Local backend health probe bound.
    pub probe_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            first_byte_secs: 90,
            stall_secs: 30,
            answer_secs: 120,
            probe_secs: 2,
        }
    }
}

impl Timeouts {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn first_byte(&self) -> Duration {
        Duration::from_secs(self.first_byte_secs)
    }

    pub fn stall(&self) -> Duration {
        Duration::from_secs(self.stall_secs)
    }

    pub fn answer(&self) -> Duration {
        Duration::from_secs(self.answer_secs)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts for opening a stream (first try included).
    pub max_attempts: u32,
    /// Backoff base; doubles after each failed attempt.
    pub backoff_base_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_secs: 1,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-based): base, 2×base, 4×base…
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_secs(self.backoff_base_secs.saturating_mul(factor))
    }
}

/// The file-configurable portion of the config. Everything has a default;
/// a missing or partial TOML file is fine.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub endpoints: Endpoints,
    pub timeouts: Timeouts,
    pub retry: RetryPolicy,
}

impl Settings {
    pub fn load_file(path: &Path) -> Self {
        let Ok(raw) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring malformed settings file");
                Self::default()
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub credentials: Credentials,
    pub settings: Settings,
}

impl Config {
    pub fn load() -> Self {
        Self {
            credentials: Credentials::from_env(),
            settings: Settings::load_file(Path::new(CONFIG_FILE)),
        }
    }
}
