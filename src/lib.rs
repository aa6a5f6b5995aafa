//! chat-relay: thin HTTP relay for an OpenAI-compatible completion API.
//!
//! Forwards chat messages from a browser client to the upstream model and
//! returns the result either as one buffered JSON response or as an SSE
//! event stream. Buffered calls get a bounded immediate-retry policy with
//! timeout classification; streaming calls favor immediate partial delivery
//! and surface mid-stream failures as a terminal event.
//!
//! Each request is stateless and single-turn; no conversation history, no
//! shared mutable state across requests.

pub mod config;
pub mod error;
pub mod server;
pub mod upstream;
