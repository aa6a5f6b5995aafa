//! Bounded-retry controller for buffered completions.
//!
//! Wraps the buffered call with up to `max_retries + 1` attempts. Failures
//! are classified as timeout vs. generic by matching the error text, and the
//! final failure message differs per class. Retries are immediate, with no
//! backoff: the browser client is waiting, so latency wins over politeness
//! to the upstream.
//!
//! Streaming calls are never retried here; once partial output has reached
//! the client, a silent restart would corrupt what it already rendered.

use std::future::Future;
use tracing::{info, warn};

use crate::error::UpstreamError;
use crate::upstream::client::{CompletionRequest, CompletionResult, UpstreamClient};

/// Default number of retries for the buffered path.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// True when the error text indicates a timeout, per case-insensitive
/// substring match.
fn is_timeout(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("timeout") || lower.contains("timed out")
}

/// Drive `op` up to `max_retries + 1` times, returning the first success or
/// a classified final failure.
///
/// Generic over the operation so the attempt bound is testable without a
/// network. `timeout_secs` only shapes the timeout failure message.
pub async fn run_with_retry<F, Fut>(
    mut op: F,
    max_retries: u32,
    timeout_secs: u64,
) -> CompletionResult
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, UpstreamError>>,
{
    let mut attempt = 0u32;
    loop {
        info!(attempt = attempt + 1, "Calling completion API");

        match op().await {
            Ok(text) => return CompletionResult::Success { text },
            Err(e) => {
                let message = e.to_string();
                warn!(attempt = attempt + 1, error = %message, "Completion attempt failed");

                if attempt >= max_retries {
                    return if is_timeout(&message) {
                        CompletionResult::Failure {
                            message: format!(
                                "API call timed out ({timeout_secs}s); try again later or \
                                 shorten the input"
                            ),
                        }
                    } else {
                        CompletionResult::Failure {
                            message: format!("API call failed: {message}"),
                        }
                    };
                }
                attempt += 1;
            }
        }
    }
}

/// Buffered completion with the bounded-retry policy applied.
pub async fn complete_with_retry(
    client: &UpstreamClient,
    request: &CompletionRequest,
    max_retries: u32,
) -> CompletionResult {
    run_with_retry(
        || client.complete_buffered(request),
        max_retries,
        request.timeout_secs,
    )
    .await
}
