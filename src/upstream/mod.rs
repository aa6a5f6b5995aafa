//! Client for the OpenAI-compatible completion API.
//!
//! - [`client`]: request/result types and the buffered + streaming calls
//! - [`retry`]: bounded-retry wrapper for the buffered path

pub mod client;
pub mod retry;
