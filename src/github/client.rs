//! The authenticated GitHub client and its shared transport.

use crate::github::{CircuitBreaker, ClientError, LogObserver, RateLimitState, TransportObserver};
use anyhow::Context as _;
use itertools::Itertools as _;
use rand::Rng as _;
use reqwest::header::{AUTHORIZATION, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret as _, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing as log;

/// Finds the server token in the environment.
pub fn default_token_from_env() -> anyhow::Result<SecretString> {
    std::env::var("GITHUB_TOKEN")
        // kept for retrocompatibility with older deployments
        .or_else(|_| std::env::var("ACCESS_TOKEN"))
        .map(SecretString::from)
        .context("GITHUB_TOKEN or ACCESS_TOKEN environment variable not set")
}

/// Maximum in-flight requests to GitHub per process.
const DEFAULT_MAX_IN_FLIGHT: usize = 10;
/// Total budget for any single outbound call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Process-wide pieces shared by every [`GithubClient`]: one connection
/// pool, one dispatch semaphore, one rate-limit snapshot, one breaker.
pub struct Transport {
    http: Client,
    semaphore: Semaphore,
    pub rate_limit: RateLimitState,
    pub breaker: CircuitBreaker,
    observer: Arc<dyn TransportObserver>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("http", &self.http)
            .field("semaphore", &self.semaphore)
            .field("rate_limit", &self.rate_limit)
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}

impl Transport {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_max_in_flight(DEFAULT_MAX_IN_FLIGHT)
    }

    pub fn with_max_in_flight(max_in_flight: usize) -> anyhow::Result<Self> {
        Self::with_breaker(max_in_flight, CircuitBreaker::with_defaults())
    }

    /// Lets operators (and tests) tune the breaker thresholds.
    pub fn with_breaker(max_in_flight: usize, breaker: CircuitBreaker) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building the shared reqwest client")?;
        Ok(Transport {
            http,
            semaphore: Semaphore::new(max_in_flight),
            rate_limit: RateLimitState::new(),
            breaker,
            observer: Arc::new(LogObserver),
        })
    }

    /// Replaces the metrics observer; chain after construction.
    pub fn with_observer(mut self, observer: Arc<dyn TransportObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The raw pooled client, for callers that bypass retry entirely
    /// (token validation, webhook delivery).
    pub fn raw(&self) -> &Client {
        &self.http
    }
}

/// An authenticated view of GitHub's GraphQL (v4) and REST (v3) APIs.
///
/// Built once per request from the resolved token; all heavy machinery
/// lives in the shared [`Transport`].
#[derive(Clone, Debug)]
pub struct GithubClient {
    transport: Arc<Transport>,
    token: SecretString,
    username: String,
    api_url: String,
    graphql_url: String,
}

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(1);
/// `Retry-After` values beyond this are clamped.
const MAX_RETRY_AFTER_SECS: u64 = 60;
/// 202 (statistics still computing) polling budget.
const ACCEPTED_POLL_LIMIT: u32 = 60;
const ACCEPTED_POLL_PAUSE: Duration = Duration::from_secs(2);

enum Outcome {
    Success(serde_json::Value),
    /// 202: GitHub is still materialising the statistics.
    Accepted,
    Failed {
        err: ClientError,
        retry_after: Option<u64>,
    },
}

impl GithubClient {
    pub fn new(
        transport: Arc<Transport>,
        username: &str,
        token: SecretString,
    ) -> anyhow::Result<Self> {
        if username.trim().is_empty() {
            anyhow::bail!("GitHub username must not be empty");
        }
        if token.expose_secret().trim().is_empty() {
            anyhow::bail!("GitHub access token must not be empty");
        }
        Ok(GithubClient {
            transport,
            token,
            username: username.to_string(),
            api_url: std::env::var("GITHUB_API_URL")
                .unwrap_or_else(|_| "https://api.github.com".to_string()),
            graphql_url: std::env::var("GITHUB_GRAPHQL_API_URL")
                .unwrap_or_else(|_| "https://api.github.com/graphql".to_string()),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Issues a GraphQL query and fails on a non-empty `errors` array.
    pub async fn graphql(&self, query: &str) -> Result<serde_json::Value, ClientError> {
        let body = serde_json::json!({ "query": query });
        let result = self
            .execute(|| {
                self.transport
                    .http
                    .post(&self.graphql_url)
                    .json(&body)
                    .configure(self)
            })
            .await?;
        if let Some(errors) = result["errors"].as_array() {
            let messages = errors
                .iter()
                .map(|err| err["message"].as_str().unwrap_or_default())
                .format("; ")
                .to_string();
            return Err(ClientError::Graphql(messages));
        }
        Ok(result)
    }

    /// Issues a REST GET against `path` (leading slash optional).
    pub async fn rest(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value, ClientError> {
        let url = format!("{}/{}", self.api_url, path.trim_start_matches('/'));
        self.execute(|| {
            self.transport
                .http
                .get(&url)
                .query(params)
                .configure(self)
        })
        .await
    }

    /// Dispatches with the rate-limit governor, semaphore fairness, retry
    /// with exponential back-off, and 202 polling.
    async fn execute(
        &self,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<serde_json::Value, ClientError> {
        let mut attempt: u32 = 0;
        let mut accepted_polls: u32 = 0;
        loop {
            if !self.transport.breaker.allow() {
                self.transport.observer.on_breaker_rejection();
                return Err(ClientError::BreakerOpen);
            }
            if let Some(delay) = self.transport.rate_limit.throttle_delay() {
                log::info!(?delay, "rate limit nearly exhausted, waiting for reset");
                self.transport.observer.on_throttle(delay);
                tokio::time::sleep(delay).await;
            }

            let result = {
                let _permit = self
                    .transport
                    .semaphore
                    .acquire()
                    .await
                    .expect("transport semaphore closed");
                build().send().await
            };

            match self.classify(result).await {
                Outcome::Success(value) => return Ok(value),
                Outcome::Accepted => {
                    accepted_polls += 1;
                    if accepted_polls >= ACCEPTED_POLL_LIMIT {
                        log::warn!("giving up after {accepted_polls} 202 responses");
                        return Err(ClientError::Incomplete);
                    }
                    log::debug!("202 received, polling again (attempt {accepted_polls})");
                    tokio::time::sleep(ACCEPTED_POLL_PAUSE).await;
                }
                Outcome::Failed { err, retry_after } => {
                    attempt += 1;
                    if !err.is_retryable() || attempt >= MAX_ATTEMPTS {
                        return Err(err);
                    }
                    let delay = match retry_after {
                        Some(secs) => Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS)),
                        None => backoff_with_jitter(attempt),
                    };
                    log::warn!("retrying after {delay:?} (attempt {attempt}): {err}");
                    self.transport.observer.on_retry();
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn classify(&self, result: Result<Response, reqwest::Error>) -> Outcome {
        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                self.transport.breaker.on_failure();
                return Outcome::Failed {
                    err: ClientError::Network(e),
                    retry_after: None,
                };
            }
        };

        self.transport.rate_limit.observe(resp.headers());
        let status = resp.status();
        self.transport.observer.on_response(status.as_u16());
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        if status == StatusCode::ACCEPTED {
            self.transport.breaker.on_success();
            return Outcome::Accepted;
        }

        if status.is_success() {
            return match resp.json::<serde_json::Value>().await {
                Ok(value) => {
                    self.transport.breaker.on_success();
                    Outcome::Success(value)
                }
                // Treated like a 5xx: the payload may exist on retry.
                Err(e) => {
                    self.transport.breaker.on_failure();
                    Outcome::Failed {
                        err: ClientError::Decode(e.to_string()),
                        retry_after,
                    }
                }
            };
        }

        let body = resp.text().await.unwrap_or_default();
        let err = if status == StatusCode::FORBIDDEN && body.to_lowercase().contains("rate limit")
        {
            ClientError::RateLimited { retry_after }
        } else {
            ClientError::Status {
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            }
        };
        if err.trips_breaker() {
            self.transport.breaker.on_failure();
        } else {
            // A 4xx proves GitHub is reachable.
            self.transport.breaker.on_success();
        }
        Outcome::Failed { err, retry_after }
    }
}

fn backoff_with_jitter(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE * 2u32.saturating_pow(attempt.saturating_sub(1));
    exp + Duration::from_millis(rand::thread_rng().gen_range(0..500))
}

trait RequestSend: Sized {
    fn configure(self, g: &GithubClient) -> Self;
}

impl RequestSend for RequestBuilder {
    fn configure(self, g: &GithubClient) -> RequestBuilder {
        let mut auth = reqwest::header::HeaderValue::from_maybe_shared(format!(
            "Bearer {}",
            g.token.expose_secret()
        ))
        .unwrap_or_else(|_| reqwest::header::HeaderValue::from_static(""));
        auth.set_sensitive(true);
        self.header(USER_AGENT, "octostats").header(AUTHORIZATION, &auth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> Arc<Transport> {
        Arc::new(Transport::new().unwrap())
    }

    #[test]
    fn blank_username_is_rejected() {
        let err = GithubClient::new(transport(), "  ", SecretString::from("t")).unwrap_err();
        assert!(err.to_string().contains("username"));
    }

    #[test]
    fn blank_token_is_rejected() {
        let err = GithubClient::new(transport(), "alice", SecretString::from(" ")).unwrap_err();
        assert!(err.to_string().contains("token"));
    }

    #[test]
    fn backoff_grows_exponentially() {
        let first = backoff_with_jitter(1);
        let third = backoff_with_jitter(3);
        assert!(first >= Duration::from_secs(1) && first < Duration::from_millis(1500));
        assert!(third >= Duration::from_secs(4) && third < Duration::from_millis(4500));
    }
}
