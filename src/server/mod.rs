//! HTTP server relaying chat requests to the completion API.
//!
//! - [`chat_api`]: Request/response types and route handlers
//! - [`streaming`]: SSE framing for incremental delivery

pub mod chat_api;
pub mod streaming;
