//! Upstream error taxonomy.
//!
//! Transport and API failures are mapped into [`UpstreamError`] at the
//! client boundary so callers handle a closed set of cases instead of raw
//! exceptions from the HTTP stack. Validation and configuration errors never
//! reach this type; the handlers resolve those before any network I/O.

use thiserror::Error;

/// A failure while talking to the completion API.
///
/// The display text is what the retry controller classifies and what ends up
/// in outward error messages, so every variant carries the original detail.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Connection or TLS failure from the HTTP transport.
    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    /// The per-call deadline elapsed before the upstream answered.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// The upstream answered with a non-success status.
    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The upstream answered 2xx but the payload was not usable.
    #[error("malformed upstream response: {0}")]
    Malformed(String),
}
