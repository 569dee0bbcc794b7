//! Registry client with retry and proxy identity rotation
//!
//! [`RegistryClient::fetch`] never fails: every attempt ends in a classified
//! [`FetchOutcome`]. Throttling, server errors, timeouts and transport errors
//! are retried after a fixed delay up to the attempt budget; not-found and
//! unexpected statuses end the lookup immediately.
//!
//! With a [`ProxyRotation`] configured, each attempt (retries included) goes
//! out through a fresh proxy session username, which makes the proxy hand out
//! a new exit address.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Proxy, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::Identifier;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const SESSION_SUFFIX_LEN: usize = 8;

/// Result of one lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Document body
    Success(String),
    /// The registry has no such entity
    NotFound,
    Failure(FetchFailure),
}

/// Why a lookup produced no document
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    #[error("throttled (status {0})")]
    Throttled(u16),

    #[error("server error (status {0})")]
    ServerError(u16),

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status {0}")]
    UnexpectedStatus(u16),
}

impl FetchFailure {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchFailure::UnexpectedStatus(_))
    }
}

/// Lookup capability used by fetch workers
#[async_trait]
pub trait Registry: Send + Sync {
    async fn fetch(&self, id: &Identifier) -> FetchOutcome;
}

/// Client tuning
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub endpoint: String,
    /// Total attempts per lookup
    pub max_attempts: u32,
    /// Fixed pause between attempts
    pub retry_delay: Duration,
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Log the first failed attempt of every lookup at warn level
    pub verbose_failures: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            endpoint: crate::config::DEFAULT_REGISTRY_URL.to_string(),
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(15),
            verbose_failures: false,
        }
    }
}

/// Base proxy credential from which per-attempt sessions are derived
#[derive(Clone)]
pub struct ProxyRotation {
    url: String,
    username_base: String,
    password: String,
}

impl ProxyRotation {
    pub fn new(
        url: impl Into<String>,
        username_base: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            username_base: username_base.into(),
            password: password.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// `{base}-{8 random alphanumerics}`
    pub fn session_username(&self) -> String {
        let suffix: String = std::iter::repeat_with(fastrand::alphanumeric)
            .take(SESSION_SUFFIX_LEN)
            .collect();
        format!("{}-{}", self.username_base, suffix)
    }

    fn session_proxy(&self) -> reqwest::Result<Proxy> {
        Ok(Proxy::all(&self.url)?.basic_auth(&self.session_username(), &self.password))
    }
}

impl std::fmt::Debug for ProxyRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyRotation")
            .field("url", &self.url)
            .field("username_base", &self.username_base)
            .finish_non_exhaustive()
    }
}

/// Client for the SAFER carrier snapshot endpoint
#[derive(Debug)]
pub struct RegistryClient {
    settings: FetchSettings,
    proxy: Option<ProxyRotation>,
    /// Shared pooled client for direct connections
    direct: Client,
}

enum Attempt {
    Done(FetchOutcome),
    Retry(FetchFailure),
}

enum StatusClass {
    Success,
    NotFound,
    Retryable(FetchFailure),
    Terminal(FetchFailure),
}

impl RegistryClient {
    pub fn new(settings: FetchSettings, proxy: Option<ProxyRotation>) -> anyhow::Result<Self> {
        if let Some(rotation) = &proxy {
            Proxy::all(rotation.url())
                .with_context(|| format!("Invalid proxy URL: {}", rotation.url()))?;
        }

        let direct = client_builder(&settings)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            settings,
            proxy,
            direct,
        })
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Proxy credentials are fixed per `reqwest::Client`, so a rotating
    /// session needs its own client.
    fn client_for_attempt(&self) -> reqwest::Result<Client> {
        match &self.proxy {
            None => Ok(self.direct.clone()),
            Some(rotation) => client_builder(&self.settings)
                .proxy(rotation.session_proxy()?)
                .build(),
        }
    }

    async fn attempt(&self, id: &Identifier) -> Attempt {
        let client = match self.client_for_attempt() {
            Ok(client) => client,
            Err(e) => return Attempt::Retry(FetchFailure::Transport(e.to_string())),
        };

        let form = [
            ("searchtype", "ANY"),
            ("query_type", "queryCarrierSnapshot"),
            ("query_param", "USDOT"),
            ("query_string", id.as_str()),
        ];

        let response = match client.post(&self.settings.endpoint).form(&form).send().await {
            Ok(response) => response,
            Err(e) => return Attempt::Retry(classify_error(&e)),
        };

        match classify_status(response.status()) {
            StatusClass::Success => match response.text().await {
                Ok(body) => Attempt::Done(FetchOutcome::Success(body)),
                Err(e) => Attempt::Retry(classify_error(&e)),
            },
            StatusClass::NotFound => Attempt::Done(FetchOutcome::NotFound),
            StatusClass::Retryable(failure) => Attempt::Retry(failure),
            StatusClass::Terminal(failure) => Attempt::Done(FetchOutcome::Failure(failure)),
        }
    }
}

#[async_trait]
impl Registry for RegistryClient {
    async fn fetch(&self, id: &Identifier) -> FetchOutcome {
        let budget = self.settings.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let failure = match self.attempt(id).await {
                Attempt::Done(outcome) => {
                    if let FetchOutcome::Failure(failure) = &outcome {
                        debug!(usdot = %id, attempt, %failure, "Lookup failed without retry");
                    }
                    return outcome;
                }
                Attempt::Retry(failure) => failure,
            };

            if attempt == 1 && self.settings.verbose_failures {
                warn!(usdot = %id, %failure, "First attempt failed");
            } else {
                debug!(usdot = %id, attempt, budget, %failure, "Attempt failed");
            }

            if attempt >= budget {
                return FetchOutcome::Failure(failure);
            }

            tokio::time::sleep(self.settings.retry_delay).await;
            attempt += 1;
        }
    }
}

fn client_builder(settings: &FetchSettings) -> ClientBuilder {
    Client::builder()
        .timeout(settings.timeout)
        .user_agent(USER_AGENT)
}

fn classify_status(status: StatusCode) -> StatusClass {
    match status {
        StatusCode::OK => StatusClass::Success,
        StatusCode::NOT_FOUND => StatusClass::NotFound,
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
            StatusClass::Retryable(FetchFailure::Throttled(status.as_u16()))
        }
        s if s.is_server_error() => StatusClass::Retryable(FetchFailure::ServerError(s.as_u16())),
        s => StatusClass::Terminal(FetchFailure::UnexpectedStatus(s.as_u16())),
    }
}

fn classify_error(error: &reqwest::Error) -> FetchFailure {
    if error.is_timeout() {
        FetchFailure::Timeout
    } else {
        FetchFailure::Transport(error.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_session_username_format() {
        let rotation = ProxyRotation::new("http://proxy.example:7777", "customer-acct", "pw");
        let username = rotation.session_username();

        let suffix = username
            .strip_prefix("customer-acct-")
            .expect("base prefix");
        assert_eq!(suffix.len(), SESSION_SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_session_username_rotates() {
        let rotation = ProxyRotation::new("http://proxy.example:7777", "base", "pw");
        let names: std::collections::HashSet<_> =
            (0..50).map(|_| rotation.session_username()).collect();
        assert!(names.len() > 45, "session usernames should almost never repeat");
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(classify_status(StatusCode::OK), StatusClass::Success));
        assert!(matches!(classify_status(StatusCode::NOT_FOUND), StatusClass::NotFound));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            StatusClass::Retryable(FetchFailure::Throttled(429))
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN),
            StatusClass::Retryable(FetchFailure::Throttled(403))
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY),
            StatusClass::Retryable(FetchFailure::ServerError(502))
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST),
            StatusClass::Terminal(FetchFailure::UnexpectedStatus(400))
        ));
        assert!(matches!(
            classify_status(StatusCode::MOVED_PERMANENTLY),
            StatusClass::Terminal(FetchFailure::UnexpectedStatus(301))
        ));
    }

    #[test]
    fn test_other_success_codes_are_unexpected() {
        assert!(matches!(
            classify_status(StatusCode::CREATED),
            StatusClass::Terminal(FetchFailure::UnexpectedStatus(201))
        ));
        assert!(matches!(
            classify_status(StatusCode::NO_CONTENT),
            StatusClass::Terminal(FetchFailure::UnexpectedStatus(204))
        ));
    }

    #[test]
    fn test_unexpected_status_not_retryable() {
        assert!(!FetchFailure::UnexpectedStatus(418).is_retryable());
        assert!(FetchFailure::Timeout.is_retryable());
        assert!(FetchFailure::Throttled(429).is_retryable());
    }

    #[test]
    fn test_invalid_proxy_url_rejected() {
        let rotation = ProxyRotation::new("http://[not-an-address", "base", "pw");
        assert!(RegistryClient::new(FetchSettings::default(), Some(rotation)).is_err());
    }

    #[test]
    fn test_debug_hides_proxy_password() {
        let rotation = ProxyRotation::new("http://proxy:1", "base", "hunter2");
        assert!(!format!("{rotation:?}").contains("hunter2"));
    }
}
