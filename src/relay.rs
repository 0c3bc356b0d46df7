use crate::answer::AnswerDispatch;
use crate::config::Config;
use crate::decoder::Frame;
use crate::error::RelayError;
use crate::extract::{self, ReasoningResult};
use crate::provider::{AnswerMode, ReasoningMode, Resolver};
use crate::transport::{StreamSession, StreamingTransport};

pub const DEFAULT_REASONING_MODEL: &str = "deepseek/deepseek-r1";
pub const DEFAULT_LOCAL_REASONING_MODEL: &str = "deepseek-r1:8b";
pub const DEFAULT_ANSWER_MODEL: &str = "claude-3-5-sonnet-20241022";
pub const DEFAULT_LOCAL_ANSWER_MODEL: &str = "llama3.1:8b";
pub const DEFAULT_ANSWER_MAX_TOKENS: u64 = 8000;

/// One reasoning request. Immutable; created once per invocation.
#[derive(Clone, Debug)]
pub struct RequestSpec {
    pub mode: ReasoningMode,
    pub prompt: String,
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    /// Ask the backend to emit reasoning explicitly when it supports the
    /// flag natively.
    pub include_reasoning: bool,
}

/// The independently selected final-answer backend and model.
#[derive(Clone, Debug)]
pub struct AnswerSelection {
    pub mode: AnswerMode,
    pub model: String,
    pub max_tokens: u64,
}

/// Result of one relay run.
#[derive(Debug)]
pub struct RelayOutcome {
    pub answer: String,
    pub reasoning: ReasoningResult,
    /// True when the reasoning stream was cut short (stall, disconnect, or
    /// a stream that ended without its terminal marker) and the partial
    /// text was used.
    pub partial: bool,
}

/// Composes resolver, transport, extractor, and answer dispatch into the
/// two-stage pipeline. Single-flow: one reasoning stream, then one
/// final-answer call. Each run owns its session exclusively.
pub struct Relay {
    resolver: Resolver,
    transport: StreamingTransport,
    answer: AnswerDispatch,
}

impl Relay {
    pub fn new(config: &Config) -> Self {
        let settings = &config.settings;
        Self {
            resolver: Resolver::new(
                config.credentials.clone(),
                settings.endpoints.clone(),
                settings.timeouts.probe(),
            ),
            transport: StreamingTransport::new(settings.timeouts.clone(), settings.retry.clone()),
            answer: AnswerDispatch::new(&settings.timeouts),
        }
    }

    pub async fn run(
        &self,
        spec: &RequestSpec,
        selection: &AnswerSelection,
    ) -> Result<RelayOutcome, RelayError> {
        tracing::info!(mode = ?spec.mode, model = %spec.model, "resolving reasoning backend");
        let provider = self.resolver.resolve_reasoning(spec.mode).await?;

        tracing::info!(provider = provider.provider, "streaming reasoning");
        let mut stream = self.transport.open(&provider, spec).await?;
        let mut session = StreamSession::new();
        let mut interrupted = false;

        loop {
            match stream.next_frame().await {
                Ok(Some(Frame::Delta(delta))) => session.push_delta(&delta),
                Ok(Some(Frame::Done)) => {
                    session.mark_terminal();
                    break;
                }
                Ok(None) => break,
                Err(err) => {
                    if session.has_content() {
                        tracing::warn!(error = %err, "stream interrupted, using partial response");
                        interrupted = true;
                        break;
                    }
                    return Err(match err {
                        RelayError::StreamStalled { .. } => RelayError::NoResponse,
                        other => other,
                    });
                }
            }
        }

        if !session.has_content() {
            tracing::warn!("stream ended with no content");
            return Err(RelayError::NoResponse);
        }

        let partial = interrupted || !session.is_terminal();
        tracing::info!(chars = session.content().len(), partial, "extracting reasoning");
        let reasoning = extract::extract(session.content());
        tracing::debug!(origin = ?reasoning.origin, chars = reasoning.text.len(), "reasoning extracted");

        tracing::info!(mode = ?selection.mode, model = %selection.model, "dispatching final answer");
        match self.dispatch_answer(&reasoning, selection).await {
            Ok(answer) => Ok(RelayOutcome {
                answer,
                reasoning,
                partial,
            }),
            Err(err) => {
                tracing::error!(error = %err, "final answer call failed");
                Err(RelayError::FinalAnswer {
                    message: err.to_string(),
                    reasoning,
                })
            }
        }
    }

    async fn dispatch_answer(
        &self,
        reasoning: &ReasoningResult,
        selection: &AnswerSelection,
    ) -> Result<String, RelayError> {
        let config = self.resolver.resolve_answer(selection.mode).await?;
        self.answer
            .dispatch(&config, &selection.model, &reasoning.text, selection.max_tokens)
            .await
    }
}
