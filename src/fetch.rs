//! Network tier: plain HTTP fetch with rate-limit and server-error retry.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, StatusCode};
use tokio::time::sleep;
use tracing::warn;
use url::Url;

use crate::controls::ScrapeControls;

const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Which tier produced a piece of markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStrategy {
    /// Plain HTTP GET.
    Network,
    /// Browser-rendered session.
    Rendered,
}

impl fmt::Display for SourceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Rendered => write!(f, "rendered"),
        }
    }
}

/// Markup retrieved for one target date, tagged with its producing tier.
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Raw page markup.
    pub html: String,
    /// Tier that produced the markup.
    pub strategy: SourceStrategy,
    /// Markup size, used by the tier-selection rule.
    pub size_bytes: usize,
}

impl FetchResult {
    /// Wraps markup produced by the network tier.
    pub fn network(html: String) -> Self {
        Self {
            size_bytes: html.len(),
            strategy: SourceStrategy::Network,
            html,
        }
    }

    /// Wraps markup produced by the rendering tier.
    pub fn rendered(html: String) -> Self {
        Self {
            size_bytes: html.len(),
            strategy: SourceStrategy::Rendered,
            html,
        }
    }
}

/// Errors surfaced by the network tier.
#[derive(Debug)]
pub enum FetchError {
    /// 429 responses exhausted the retry budget.
    RateLimited {
        /// Attempts made before giving up.
        attempts: u32,
    },
    /// Non-2xx terminal response.
    FetchFailed {
        /// HTTP status code of the final response.
        status: u16,
    },
    /// Transport-level failure (connect, TLS, timeout, body read).
    Http(reqwest::Error),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited { attempts } => {
                write!(f, "rate limited after {attempts} attempts")
            }
            Self::FetchFailed { status } => write!(f, "fetch failed with status {status}"),
            Self::Http(err) => write!(f, "http error: {err}"),
        }
    }
}

impl Error for FetchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Http(err) => Some(err),
            Self::RateLimited { .. } | Self::FetchFailed { .. } => None,
        }
    }
}

/// What to do after a retryable response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the given duration, then retry.
    Wait(Duration),
    /// Budget exhausted; surface the error.
    GiveUp,
}

/// Pure retry schedule: escalating backoff for 429, linear for 5xx.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    rate_limit_attempts: u32,
    rate_limit_backoff: Duration,
    server_retries: u32,
    server_backoff: Duration,
}

impl RetryPolicy {
    /// Derives the schedule from the run controls.
    pub fn from_controls(controls: &ScrapeControls) -> Self {
        Self {
            rate_limit_attempts: controls.rate_limit_attempts(),
            rate_limit_backoff: controls.rate_limit_backoff(),
            server_retries: controls.server_retries(),
            server_backoff: controls.server_backoff(),
        }
    }

    /// Decision after the `attempt`-th 429 response (1-based).
    ///
    /// A server-supplied delay is honored as-is; otherwise the backoff
    /// escalates with the attempt number.
    pub fn on_rate_limited(&self, attempt: u32, retry_after: Option<Duration>) -> RetryDecision {
        if attempt >= self.rate_limit_attempts {
            return RetryDecision::GiveUp;
        }
        match retry_after {
            Some(delay) => RetryDecision::Wait(delay),
            None => RetryDecision::Wait(self.rate_limit_backoff * attempt),
        }
    }

    /// Decision after the `attempt`-th server-side failure (1-based).
    pub fn on_server_error(&self, attempt: u32) -> RetryDecision {
        if attempt > self.server_retries {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Wait(self.server_backoff * attempt)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_controls(&ScrapeControls::default())
    }
}

/// Network tier built on a shared, browser-identifying HTTP client.
pub struct NetworkFetcher {
    client: Client,
    policy: RetryPolicy,
}

impl NetworkFetcher {
    /// Builds the client with the configured timeout and header set.
    pub fn new(controls: &ScrapeControls) -> Result<Self, FetchError> {
        let client = Client::builder()
            .default_headers(browser_headers())
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(controls.http_timeout())
            .build()
            .map_err(FetchError::Http)?;
        Ok(Self {
            client,
            policy: RetryPolicy::from_controls(controls),
        })
    }

    /// Fetches `url`, retrying per the policy, and returns network-tagged markup.
    pub async fn fetch(&self, url: &Url) -> Result<FetchResult, FetchError> {
        let mut rate_limit_attempt = 0u32;
        let mut server_attempt = 0u32;

        loop {
            let response = match self.client.get(url.clone()).send().await {
                Ok(response) => response,
                Err(err) => {
                    server_attempt += 1;
                    match self.policy.on_server_error(server_attempt) {
                        RetryDecision::Wait(delay) => {
                            warn!(%url, error = %err, ?delay, "transport error, retrying");
                            sleep(delay).await;
                            continue;
                        }
                        RetryDecision::GiveUp => return Err(FetchError::Http(err)),
                    }
                }
            };

            let status = response.status();
            if status.is_success() {
                let html = response.text().await.map_err(FetchError::Http)?;
                return Ok(FetchResult::network(html));
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                rate_limit_attempt += 1;
                let hint = retry_after_hint(response.headers());
                match self.policy.on_rate_limited(rate_limit_attempt, hint) {
                    RetryDecision::Wait(delay) => {
                        warn!(%url, attempt = rate_limit_attempt, ?delay, "rate limited, backing off");
                        sleep(delay).await;
                    }
                    RetryDecision::GiveUp => {
                        return Err(FetchError::RateLimited {
                            attempts: rate_limit_attempt,
                        })
                    }
                }
            } else if status.is_server_error() {
                server_attempt += 1;
                match self.policy.on_server_error(server_attempt) {
                    RetryDecision::Wait(delay) => {
                        warn!(%url, status = status.as_u16(), ?delay, "server error, retrying");
                        sleep(delay).await;
                    }
                    RetryDecision::GiveUp => {
                        return Err(FetchError::FetchFailed {
                            status: status.as_u16(),
                        })
                    }
                }
            } else {
                return Err(FetchError::FetchFailed {
                    status: status.as_u16(),
                });
            }
        }
    }
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(DESKTOP_USER_AGENT));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers
}

/// Server-supplied retry delay, when present and parseable as whole seconds.
fn retry_after_hint(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_backoff_escalates_then_gives_up() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.on_rate_limited(1, None),
            RetryDecision::Wait(Duration::from_secs(60))
        );
        assert_eq!(
            policy.on_rate_limited(2, None),
            RetryDecision::Wait(Duration::from_secs(120))
        );
        assert_eq!(policy.on_rate_limited(3, None), RetryDecision::GiveUp);
    }

    #[test]
    fn server_supplied_delay_is_honored() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.on_rate_limited(1, Some(Duration::from_secs(7))),
            RetryDecision::Wait(Duration::from_secs(7))
        );
    }

    #[test]
    fn server_errors_retry_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.on_server_error(1),
            RetryDecision::Wait(Duration::from_secs(5))
        );
        assert_eq!(
            policy.on_server_error(2),
            RetryDecision::Wait(Duration::from_secs(10))
        );
        assert_eq!(policy.on_server_error(3), RetryDecision::GiveUp);
    }

    #[test]
    fn retry_after_header_parses_whole_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("30"));
        assert_eq!(retry_after_hint(&headers), Some(Duration::from_secs(30)));

        let mut bad = HeaderMap::new();
        bad.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(retry_after_hint(&bad), None);
        assert_eq!(retry_after_hint(&HeaderMap::new()), None);
    }

    #[test]
    fn fetch_results_record_size_and_strategy() {
        let network = FetchResult::network("<html></html>".to_string());
        assert_eq!(network.strategy, SourceStrategy::Network);
        assert_eq!(network.size_bytes, 13);

        let rendered = FetchResult::rendered(String::new());
        assert_eq!(rendered.strategy, SourceStrategy::Rendered);
        assert_eq!(rendered.size_bytes, 0);
    }
}
