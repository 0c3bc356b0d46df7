//! End-to-end relay orchestration against mock backends: stream → extract →
//! final answer, partial-result recovery, and failure surfacing.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use deepthought::config::{Config, Credentials, Endpoints, RetryPolicy, Settings, Timeouts};
use deepthought::error::RelayError;
use deepthought::extract::ExtractionOrigin;
use deepthought::provider::{AnswerMode, ReasoningMode};
use deepthought::relay::{AnswerSelection, Relay, RequestSpec};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const HEALTH_OK: &[u8] = b"HTTP/1.1 200 OK\r\n\
    Content-Length: 0\r\n\
    Connection: close\r\n\r\n";

const SSE_HEADERS: &[u8] = b"HTTP/1.1 200 OK\r\n\
    Content-Type: text/event-stream\r\n\
    Connection: close\r\n\r\n";

fn sse_chunk(content: &str) -> String {
    format!("data: {{\"choices\":[{{\"delta\":{{\"content\":\"{content}\"}}}}]}}\n\n")
}

fn sse_done() -> String {
    "data: [DONE]\n\n".to_string()
}

fn json_response(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

fn error_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// One mock backend serving health probes, the streaming reasoning POST
/// (routed by `"stream":true` in the body), and the non-streaming answer
/// POST.
struct BackendScript {
    /// Raw wire lines written after the SSE headers.
    stream_chunks: Vec<String>,
    /// Hold the stream connection open after the chunks instead of closing.
    hang_after_stream: bool,
    /// Full HTTP response for the non-streaming answer call.
    answer_response: String,
}

async fn spawn_backend(script: BackendScript) -> (u16, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let answer_calls = Arc::new(AtomicUsize::new(0));
    let calls = answer_calls.clone();
    let script = Arc::new(script);

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            let script = script.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                handle_connection(socket, &script, &calls).await;
            });
        }
    });

    (port, answer_calls)
}

async fn handle_connection(
    mut socket: TcpStream,
    script: &BackendScript,
    answer_calls: &AtomicUsize,
) {
    let request = read_request(&mut socket).await;

    if request.starts_with("GET") {
        let _ = socket.write_all(HEALTH_OK).await;
        return;
    }

    if request.contains("\"stream\":true") {
        let _ = socket.write_all(SSE_HEADERS).await;
        for chunk in &script.stream_chunks {
            let _ = socket.write_all(chunk.as_bytes()).await;
        }
        if script.hang_after_stream {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        return;
    }

    answer_calls.fetch_add(1, Ordering::SeqCst);
    let _ = socket.write_all(script.answer_response.as_bytes()).await;
}

/// Read one HTTP request: headers plus a Content-Length-delimited body.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    loop {
        let n = socket.read(&mut tmp).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);

        let text = String::from_utf8_lossy(&buf);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text
                .lines()
                .find_map(|line| {
                    let lower = line.to_lowercase();
                    lower
                        .strip_prefix("content-length:")
                        .and_then(|v| v.trim().parse::<usize>().ok())
                })
                .unwrap_or(0);
            if buf.len() - (header_end + 4) >= content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn local_config(port: u16) -> Config {
    Config {
        credentials: Credentials::default(),
        settings: Settings {
            endpoints: Endpoints {
                local_url: format!("http://127.0.0.1:{port}/v1/chat/completions"),
                local_health_url: format!("http://127.0.0.1:{port}/"),
                ..Endpoints::default()
            },
            timeouts: Timeouts {
                connect_secs: 5,
                first_byte_secs: 2,
                stall_secs: 1,
                answer_secs: 5,
                probe_secs: 1,
            },
            retry: RetryPolicy {
                max_attempts: 1,
                backoff_base_secs: 0,
            },
        },
    }
}

fn local_spec() -> RequestSpec {
    RequestSpec {
        mode: ReasoningMode::Local,
        prompt: "why does the build fail?".to_string(),
        model: "test-reasoner".to_string(),
        temperature: None,
        max_tokens: None,
        include_reasoning: false,
    }
}

fn local_selection() -> AnswerSelection {
    AnswerSelection {
        mode: AnswerMode::Local,
        model: "test-answerer".to_string(),
        max_tokens: 512,
    }
}

const ANSWER_JSON: &str = r#"{"choices":[{"message":{"content":"the answer is 42"}}]}"#;

// ---------------------------------------------------------------------------
// Happy path: stream → extract → answer
// ---------------------------------------------------------------------------

#[tokio::test]
async fn relay_end_to_end() {
    let (port, answer_calls) = spawn_backend(BackendScript {
        stream_chunks: vec![
            sse_chunk("a"),
            sse_chunk("b"),
            sse_chunk("c"),
            sse_done(),
        ],
        hang_after_stream: false,
        answer_response: json_response(ANSWER_JSON),
    })
    .await;

    let relay = Relay::new(&local_config(port));
    let outcome = relay.run(&local_spec(), &local_selection()).await.unwrap();

    assert_eq!(outcome.answer, "the answer is 42");
    assert_eq!(outcome.reasoning.text, "abc");
    assert_eq!(outcome.reasoning.origin, ExtractionOrigin::Heuristic);
    assert!(!outcome.partial);
    assert_eq!(answer_calls.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Explicit reasoning markers survive the stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn relay_extracts_explicit_markers() {
    let (port, _) = spawn_backend(BackendScript {
        stream_chunks: vec![
            sse_chunk("<think>check "),
            sse_chunk("the invariant</think>"),
            sse_chunk("done"),
            sse_done(),
        ],
        hang_after_stream: false,
        answer_response: json_response(ANSWER_JSON),
    })
    .await;

    let relay = Relay::new(&local_config(port));
    let outcome = relay.run(&local_spec(), &local_selection()).await.unwrap();

    assert_eq!(outcome.reasoning.origin, ExtractionOrigin::Explicit);
    assert_eq!(outcome.reasoning.text, "check the invariant");
}

// ---------------------------------------------------------------------------
// Empty stream → NoResponse, and no final-answer call is made
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_stream_skips_final_answer() {
    let (port, answer_calls) = spawn_backend(BackendScript {
        stream_chunks: vec![sse_done()],
        hang_after_stream: false,
        answer_response: json_response(ANSWER_JSON),
    })
    .await;

    let relay = Relay::new(&local_config(port));
    let err = relay.run(&local_spec(), &local_selection()).await.unwrap_err();

    assert!(matches!(err, RelayError::NoResponse), "got: {err:?}");
    assert_eq!(answer_calls.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// Mid-stream stall with content → partial result is used
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stall_with_content_proceeds_as_partial() {
    let (port, answer_calls) = spawn_backend(BackendScript {
        stream_chunks: vec![sse_chunk("partial reasoning")],
        hang_after_stream: true,
        answer_response: json_response(ANSWER_JSON),
    })
    .await;

    let relay = Relay::new(&local_config(port));
    let outcome = relay.run(&local_spec(), &local_selection()).await.unwrap();

    assert!(outcome.partial, "stall must be flagged to the caller");
    assert_eq!(outcome.reasoning.text, "partial reasoning");
    assert_eq!(outcome.answer, "the answer is 42");
    assert_eq!(answer_calls.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Stall with no content → NoResponse
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stall_without_content_is_no_response() {
    let (port, answer_calls) = spawn_backend(BackendScript {
        stream_chunks: vec![],
        hang_after_stream: true,
        answer_response: json_response(ANSWER_JSON),
    })
    .await;

    let relay = Relay::new(&local_config(port));
    let err = relay.run(&local_spec(), &local_selection()).await.unwrap_err();

    assert!(matches!(err, RelayError::NoResponse), "got: {err:?}");
    assert_eq!(answer_calls.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// Disconnect without the terminal marker → partial
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_without_done_is_partial() {
    let (port, _) = spawn_backend(BackendScript {
        stream_chunks: vec![sse_chunk("truncated thought")],
        hang_after_stream: false,
        answer_response: json_response(ANSWER_JSON),
    })
    .await;

    let relay = Relay::new(&local_config(port));
    let outcome = relay.run(&local_spec(), &local_selection()).await.unwrap();

    assert!(outcome.partial);
    assert_eq!(outcome.reasoning.text, "truncated thought");
}

// ---------------------------------------------------------------------------
// Final answer failure still surfaces the reasoning
// ---------------------------------------------------------------------------

#[tokio::test]
async fn final_answer_failure_surfaces_reasoning() {
    let (port, _) = spawn_backend(BackendScript {
        stream_chunks: vec![sse_chunk("hard-won reasoning"), sse_done()],
        hang_after_stream: false,
        answer_response: error_response("500 Internal Server Error", "overloaded"),
    })
    .await;

    let relay = Relay::new(&local_config(port));
    let err = relay.run(&local_spec(), &local_selection()).await.unwrap_err();

    match err {
        RelayError::FinalAnswer { reasoning, .. } => {
            assert_eq!(reasoning.text, "hard-won reasoning");
        }
        other => panic!("expected FinalAnswer, got: {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Anthropic-shaped answer backend
// ---------------------------------------------------------------------------

#[tokio::test]
async fn anthropic_answer_shape() {
    let anthropic_json =
        r#"{"content":[{"type":"text","text":"rebuild the index"}],"role":"assistant"}"#;
    let (port, answer_calls) = spawn_backend(BackendScript {
        stream_chunks: vec![sse_chunk("reasoning here"), sse_done()],
        hang_after_stream: false,
        answer_response: json_response(anthropic_json),
    })
    .await;

    let mut config = local_config(port);
    config.credentials.anthropic_key = Some("test-key".to_string());
    config.settings.endpoints.anthropic_url = format!("http://127.0.0.1:{port}/v1/messages");

    let relay = Relay::new(&config);
    let selection = AnswerSelection {
        mode: AnswerMode::Anthropic,
        model: "claude-3-5-sonnet-20241022".to_string(),
        max_tokens: 512,
    };
    let outcome = relay.run(&local_spec(), &selection).await.unwrap();

    assert_eq!(outcome.answer, "rebuild the index");
    assert_eq!(answer_calls.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Unreachable local backend → BackendUnavailable before any relay attempt
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dead_local_backend_fails_fast() {
    // Bind then drop to get a port with nothing listening.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let relay = Relay::new(&local_config(port));
    let err = relay.run(&local_spec(), &local_selection()).await.unwrap_err();

    assert!(
        matches!(err, RelayError::BackendUnavailable { .. }),
        "got: {err:?}"
    );
}
