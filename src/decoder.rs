use serde::Deserialize;

use crate::provider::PayloadShape;

/// SSE event framing prefix used by cloud routers.
pub const EVENT_PREFIX: &str = "data: ";

/// In-band end-of-stream sentinel.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded unit from the wire: a content delta (possibly empty) or the
/// terminal marker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Delta(String),
    Done,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: Option<ChunkDelta>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

/// Local servers disagree on field names: some speak chat-completions
/// deltas, some wrap the text in `message.content`, some use a bare
/// `response` field. The decoder probes all three.
#[derive(Deserialize)]
struct LocalChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    message: Option<LocalMessage>,
    response: Option<String>,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct LocalMessage {
    content: Option<String>,
}

/// Convert one raw line into zero or one frame. Total: malformed payloads
/// and keep-alive noise yield `None` and must never abort the stream.
pub fn decode_line(line: &str, shape: PayloadShape) -> Option<Frame> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let payload = line.strip_prefix(EVENT_PREFIX).unwrap_or(line);
    if payload == DONE_SENTINEL {
        return Some(Frame::Done);
    }

    match shape {
        PayloadShape::Cloud => decode_cloud(payload),
        PayloadShape::Local => decode_local(payload),
    }
}

fn decode_cloud(payload: &str) -> Option<Frame> {
    let chunk: ChatChunk = serde_json::from_str(payload).ok()?;
    let content = chunk.choices.into_iter().next()?.delta?.content?;
    Some(Frame::Delta(content))
}

fn decode_local(payload: &str) -> Option<Frame> {
    let chunk: LocalChunk = serde_json::from_str(payload).ok()?;

    // Local completion lines carry `done: true` with an empty trailing
    // message; that line is the terminal signal, not content.
    if chunk.done {
        return Some(Frame::Done);
    }

    if let Some(content) = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
    {
        return Some(Frame::Delta(content));
    }

    if let Some(content) = chunk.message.and_then(|m| m.content) {
        return Some(Frame::Delta(content));
    }

    chunk.response.map(Frame::Delta)
}
