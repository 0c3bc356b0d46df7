//! Two-stage reasoning relay.
//!
//! Streams a reasoning model's output from a cloud router or a local
//! inference server, extracts the "thinking" portion of the accumulated
//! text, and hands it to a second, independently chosen model for the
//! final answer.

pub mod answer;
pub mod config;
pub mod decoder;
pub mod error;
pub mod extract;
pub mod provider;
pub mod relay;
pub mod transport;
