use std::collections::VecDeque;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::Client;

use crate::config::{RetryPolicy, Timeouts};
use crate::decoder::{self, Frame};
use crate::error::RelayError;
use crate::provider::{PayloadShape, ProviderConfig};
use crate::relay::RequestSpec;

/// Cap on error-body reads to prevent memory exhaustion.
const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

/// Accumulation state for one streaming exchange. Owned by a single relay
/// run for the lifetime of the exchange; never shared.
pub struct StreamSession {
    content: String,
    last_received: Instant,
    terminal: bool,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSession {
    pub fn new() -> Self {
        Self {
            content: String::new(),
            last_received: Instant::now(),
            terminal: false,
        }
    }

    /// Append a content delta. Content only ever grows; deltas arriving
    /// after the terminal marker are dropped.
    pub fn push_delta(&mut self, delta: &str) {
        if self.terminal {
            return;
        }
        self.content.push_str(delta);
        self.last_received = Instant::now();
    }

    /// Marks the terminal signal. Permanent for this session.
    pub fn mark_terminal(&mut self) {
        self.terminal = true;
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// True if anything beyond whitespace was accumulated.
    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }

    pub fn last_received(&self) -> Instant {
        self.last_received
    }

    pub fn into_content(self) -> String {
        self.content
    }
}

/// Executes one streaming HTTP POST and yields frames. Transient failures
/// (retryable status, connect error, pre-first-byte timeout) are retried
/// with exponential backoff; once streaming has begun nothing is retried.
pub struct StreamingTransport {
    client: Client,
    timeouts: Timeouts,
    retry: RetryPolicy,
}

impl StreamingTransport {
    pub fn new(timeouts: Timeouts, retry: RetryPolicy) -> Self {
        let client = Client::builder()
            .connect_timeout(timeouts.connect())
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            timeouts,
            retry,
        }
    }

    /// Open the stream, retrying transient pre-stream failures up to the
    /// attempt bound. Exhausted retries surface as `RequestFailed`.
    pub async fn open(
        &self,
        provider: &ProviderConfig,
        spec: &RequestSpec,
    ) -> Result<FrameStream, RelayError> {
        let body = build_body(spec, provider.shape);
        let mut last_failure: Option<RelayError> = None;

        for attempt in 1..=self.retry.max_attempts.max(1) {
            if attempt > 1 {
                let backoff = self.retry.backoff(attempt - 1);
                tracing::warn!(
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "retrying stream open"
                );
                tokio::time::sleep(backoff).await;
            }

            match self.try_open(provider, &body).await {
                Ok(stream) => return Ok(stream),
                Err(err) if err.is_retryable() => {
                    tracing::warn!(provider = provider.provider, error = %err, "transient failure opening stream");
                    last_failure = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(match last_failure {
            Some(RelayError::RequestFailed { status, body }) => {
                RelayError::RequestFailed { status, body }
            }
            Some(other) => RelayError::RequestFailed {
                status: None,
                body: other.to_string(),
            },
            None => RelayError::RequestFailed {
                status: None,
                body: "retries exhausted".to_string(),
            },
        })
    }

    async fn try_open(
        &self,
        provider: &ProviderConfig,
        body: &serde_json::Value,
    ) -> Result<FrameStream, RelayError> {
        let mut request = self.client.post(&provider.base_url).json(body);
        for (name, value) in provider.headers() {
            request = request.header(name, value);
        }

        let response = match tokio::time::timeout(self.timeouts.first_byte(), request.send()).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(RelayError::Request(e)),
            Err(_) => {
                return Err(RelayError::Timeout(
                    self.timeouts.first_byte().as_millis() as u64
                ));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let error_bytes = response.bytes().await.unwrap_or_default();
            let truncated = &error_bytes[..error_bytes.len().min(MAX_ERROR_BODY_BYTES)];
            return Err(RelayError::RequestFailed {
                status: Some(status.as_u16()),
                body: String::from_utf8_lossy(truncated).into_owned(),
            });
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();

        Ok(FrameStream::new(bytes, provider.shape, self.timeouts.stall()))
    }
}

fn build_body(spec: &RequestSpec, shape: PayloadShape) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": spec.model,
        "messages": [{"role": "user", "content": spec.prompt}],
        "stream": true,
    });
    if let Some(temperature) = spec.temperature {
        body["temperature"] = temperature.into();
    }
    if let Some(max_tokens) = spec.max_tokens {
        body["max_tokens"] = max_tokens.into();
    }
    // Only the cloud router understands the explicit reasoning flag.
    if spec.include_reasoning && shape == PayloadShape::Cloud {
        body["include_reasoning"] = true.into();
    }
    body
}

/// Incremental frame source over a live response body. Each chunk read is
/// guarded by the inactivity watchdog, which is distinct from the
/// connect/first-byte bounds that govern the pre-streaming phase.
pub struct FrameStream {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    shape: PayloadShape,
    stall: Duration,
    buf: Vec<u8>,
    pending: VecDeque<Frame>,
    decoding_done: bool,
    finished: bool,
}

impl FrameStream {
    fn new(
        bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
        shape: PayloadShape,
        stall: Duration,
    ) -> Self {
        Self {
            bytes,
            shape,
            stall,
            buf: Vec::new(),
            pending: VecDeque::new(),
            decoding_done: false,
            finished: false,
        }
    }

    /// Next frame, `Ok(None)` on exhaustion, `StreamStalled` when the
    /// watchdog fires. Errors are terminal for the stream.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, RelayError> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                if frame == Frame::Done {
                    self.finished = true;
                }
                return Ok(Some(frame));
            }

            if self.finished {
                return Ok(None);
            }

            let chunk = match tokio::time::timeout(self.stall, self.bytes.next()).await {
                Err(_) => {
                    self.finished = true;
                    return Err(RelayError::StreamStalled {
                        idle_ms: self.stall.as_millis() as u64,
                    });
                }
                Ok(None) => {
                    // Exhausted. Frames decoded from an unterminated tail
                    // line still get delivered before `None`.
                    self.finished = true;
                    self.drain_trailing_line();
                    continue;
                }
                Ok(Some(Err(e))) => {
                    self.finished = true;
                    return Err(RelayError::Request(e));
                }
                Ok(Some(Ok(chunk))) => chunk,
            };

            self.buf.extend_from_slice(&chunk);
            self.drain_lines();
        }
    }

    fn drain_lines(&mut self) {
        if self.decoding_done {
            return;
        }
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.decode_into_pending(&line);
            if self.decoding_done {
                // Terminal marker observed: anything after it is ignored.
                self.buf.clear();
                return;
            }
        }
    }

    fn drain_trailing_line(&mut self) {
        if self.decoding_done || self.buf.is_empty() {
            return;
        }
        let tail = std::mem::take(&mut self.buf);
        self.decode_into_pending(&tail);
    }

    fn decode_into_pending(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw);
        if let Some(frame) = decoder::decode_line(&line, self.shape) {
            if frame == Frame::Done {
                self.decoding_done = true;
            }
            self.pending.push_back(frame);
        }
    }
}
