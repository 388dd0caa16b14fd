//! JSON-over-HTTP calls to hosted model providers.
//!
//! Every provider request goes through [`post_json`], which applies the
//! client's timeout and retries transient failures with exponential
//! backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ProviderErrorKind, RagError, Result};

/// Build a client whose requests fail with a timeout after `timeout_secs`.
pub fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| RagError::Config(format!("failed to build HTTP client: {}", e)))
}

/// Delay before retry number `attempt` (1-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.saturating_sub(1).min(5))
}

/// POST `body` to `url` and return the parsed JSON response.
pub async fn post_json(
    client: &reqwest::Client,
    provider: &str,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
    max_retries: u32,
) -> Result<Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = backoff_delay(attempt);
            debug!(provider, attempt, delay_secs = delay.as_secs(), "retrying provider request");
            tokio::time::sleep(delay).await;
        }

        match send_once(client, provider, url, bearer, body).await {
            Ok(json) => return Ok(json),
            Err(e) if e.is_transient() => {
                warn!(provider, attempt, error = %e, "transient provider failure");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        RagError::provider(provider, ProviderErrorKind::Network, "request failed after retries")
    }))
}

async fn send_once(
    client: &reqwest::Client,
    provider: &str,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
) -> Result<Value> {
    let mut request = client.post(url).json(body);
    if let Some(key) = bearer {
        request = request.bearer_auth(key);
    }

    let response = request
        .send()
        .await
        .map_err(|e| classify_transport_error(provider, e))?;
    let status = response.status();

    if status.is_success() {
        return response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                classify_transport_error(provider, e)
            } else {
                RagError::provider(provider, ProviderErrorKind::Malformed, e.to_string())
            }
        });
    }

    let body_text = response.text().await.unwrap_or_default();
    let kind = if status.as_u16() == 429 {
        ProviderErrorKind::RateLimited
    } else {
        ProviderErrorKind::Status(status.as_u16())
    };
    Err(RagError::provider(
        provider,
        kind,
        format!("{} API error {}: {}", provider, status, body_text),
    ))
}

fn classify_transport_error(provider: &str, e: reqwest::Error) -> RagError {
    let kind = if e.is_timeout() {
        ProviderErrorKind::Timeout
    } else {
        ProviderErrorKind::Network
    };
    RagError::provider(provider, kind, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(4), Duration::from_secs(8));
        assert_eq!(backoff_delay(10), Duration::from_secs(32));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let client = build_client(2).unwrap();
        // Port 9 (discard) on localhost is closed in test environments.
        let err = post_json(
            &client,
            "openai",
            "http://127.0.0.1:9/v1/embeddings",
            None,
            &serde_json::json!({}),
            0,
        )
        .await
        .unwrap_err();
        match err {
            RagError::Provider { kind, .. } => {
                assert!(matches!(kind, ProviderErrorKind::Network | ProviderErrorKind::Timeout))
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
