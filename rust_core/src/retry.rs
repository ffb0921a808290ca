//! Retry logic for transient transport failures.
//!
//! Used for idempotent reads only (orderbook, market metadata, balance).
//! Order placement is never routed through here: retrying a non-idempotent
//! write risks duplicate orders, and the client order id already lets the
//! exchange deduplicate.

use crate::error::ExchangeError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Execute an idempotent exchange read with exponential backoff.
pub async fn execute_with_retry<F, Fut, T>(f: F, max_attempts: u32) -> Result<T, ExchangeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExchangeError>>,
{
    execute_with_retry_custom(f, max_attempts, 100, 2_000).await
}

/// Execute with retry and custom backoff configuration.
pub async fn execute_with_retry_custom<F, Fut, T>(
    mut f: F,
    max_attempts: u32,
    base_backoff_ms: u64,
    max_backoff_ms: u64,
) -> Result<T, ExchangeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExchangeError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < max_attempts && is_retriable_error(&e) => {
                let backoff_ms = (base_backoff_ms * 2_u64.pow(attempt - 1)).min(max_backoff_ms);
                warn!(
                    "Exchange read failed (attempt {}/{}): {}. Retrying in {}ms",
                    attempt, max_attempts, e, backoff_ms
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Transient failures worth another attempt: anything transport-level, plus
/// server-side 5xx and 429 responses. Authentication, business rejections,
/// and malformed payloads never retry.
pub fn is_retriable_error(e: &ExchangeError) -> bool {
    match e {
        ExchangeError::Transport(msg) => {
            let msg = msg.to_lowercase();
            msg.contains("timeout")
                || msg.contains("timed out")
                || msg.contains("connection")
                || msg.contains("broken pipe")
                || msg.contains("dns")
                || msg.contains("error sending request")
        }
        ExchangeError::Api { status, .. } => *status >= 500 || *status == 429,
        ExchangeError::Authentication(_) | ExchangeError::Malformed(_) => false,
    }
}
