//! Retrying HTTP fetcher
//!
//! The single place where network failures are absorbed. Every request is
//! attempted up to `max_retries` times; between attempts the task sleeps for
//! `min(max_delay, base_delay * 2^attempt)` plus a uniform jitter. Callers only
//! ever see a response with status < 400 or [`IngestError::FetchExhausted`].

use crate::config::{CatalogConfig, RetryConfig};
use crate::error::{IngestError, Result};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Successful (status < 400) response
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub body: String,
}

/// Why a single attempt did not produce a usable response
enum AttemptFailure {
    Transport(reqwest::Error),
    Status { status: StatusCode, body: String },
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Transport(e) if e.is_timeout() => write!(f, "timed out: {}", e),
            AttemptFailure::Transport(e) => write!(f, "{}", e),
            AttemptFailure::Status { status, body } => write!(f, "HTTP {}: {}", status, body),
        }
    }
}

/// HTTP GET with bounded exponential backoff
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    retry: RetryConfig,
}

impl Fetcher {
    pub fn new(catalog: &CatalogConfig, retry: RetryConfig) -> Result<Self> {
        retry.validate().map_err(IngestError::Config)?;

        let client = Client::builder()
            .timeout(retry.request_timeout)
            .user_agent(catalog.user_agent.as_str())
            .build()?;

        Ok(Self { client, retry })
    }

    /// GET `url`, retrying transport errors, timeouts and statuses >= 400
    pub async fn fetch(&self, url: &str) -> Result<FetchResponse> {
        let attempts = self.retry.max_retries;

        for attempt in 0..attempts {
            let failure = match self.attempt(url).await {
                Ok(response) => return Ok(response),
                Err(failure) => failure,
            };

            if attempt + 1 == attempts {
                warn!(%url, attempt = attempt + 1, error = %failure, "Final request attempt failed");
                break;
            }

            let delay = self.retry.backoff_delay(attempt) + self.jitter();
            warn!(
                %url,
                attempt = attempt + 1,
                ?delay,
                error = %failure,
                "Request failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }

        error!(%url, attempts, "All attempts failed and the retries have been exhausted");
        Err(IngestError::FetchExhausted {
            url: url.to_string(),
            attempts,
        })
    }

    /// [`fetch`](Self::fetch) and decode the body as JSON
    ///
    /// Decode failures are not retried.
    pub async fn fetch_json<T>(&self, url: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = self.fetch(url).await?;

        serde_json::from_str(&response.body).map_err(|source| IngestError::Decode {
            url: url.to_string(),
            source,
        })
    }

    async fn attempt(&self, url: &str) -> std::result::Result<FetchResponse, AttemptFailure> {
        debug!(%url, "GET");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(AttemptFailure::Transport)?;

        let status = response.status();
        let body = response.text().await.map_err(AttemptFailure::Transport)?;

        if status.as_u16() >= 400 {
            return Err(AttemptFailure::Status { status, body });
        }

        Ok(FetchResponse { status, body })
    }

    fn jitter(&self) -> Duration {
        if self.retry.jitter.is_zero() {
            return Duration::ZERO;
        }

        rand::thread_rng().gen_range(Duration::ZERO..self.retry.jitter)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn fetcher(retry: RetryConfig) -> Fetcher {
        Fetcher::new(&CatalogConfig::default(), retry).unwrap()
    }

    #[test]
    fn test_jitter_stays_below_bound() {
        let fetcher = fetcher(RetryConfig {
            jitter: Duration::from_millis(50),
            ..RetryConfig::default()
        });

        for _ in 0..100 {
            assert!(fetcher.jitter() < Duration::from_millis(50));
        }
    }

    #[test]
    fn test_zero_jitter() {
        let fetcher = fetcher(RetryConfig {
            jitter: Duration::ZERO,
            ..RetryConfig::default()
        });
        assert_eq!(fetcher.jitter(), Duration::ZERO);
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let result = Fetcher::new(
            &CatalogConfig::default(),
            RetryConfig {
                max_retries: 0,
                ..RetryConfig::default()
            },
        );
        assert!(matches!(result, Err(IngestError::Config(_))));
    }
}
