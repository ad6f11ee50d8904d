//! Shared plumbing for the remote embedding and chat services: error
//! classification, retry with exponential backoff, and thin ureq helpers.


use std::io::BufReader;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, warn};

const EXPONENTIAL_BACKOFF_BASE: u32 = 2;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Failure of a call to a remote model service, classified from structured
/// HTTP status codes and transport error kinds.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("authentication failed (HTTP {status}); check the API key")]
    Authentication { status: u16 },
    #[error("quota or rate limit exceeded (HTTP 429)")]
    Quota,
    #[error("service returned HTTP {0}")]
    Status(u16),
    #[error("could not reach service: {0}")]
    Connection(String),
    #[error("invalid response from service: {0}")]
    InvalidResponse(String),
    #[error("request was cancelled")]
    Cancelled,
    #[error("background task failed: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Transient failures worth another attempt
    #[inline]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Quota => true,
            Self::Status(status) => *status >= 500,
            _ => false,
        }
    }

    /// Failures that will repeat for every call made with the same credentials
    #[inline]
    pub fn is_fatal_for_batch(&self) -> bool {
        matches!(self, Self::Authentication { .. } | Self::Quota)
    }
}

impl From<ureq::Error> for ServiceError {
    #[inline]
    fn from(error: ureq::Error) -> Self {
        match error {
            ureq::Error::StatusCode(status @ (401 | 403)) => Self::Authentication { status },
            ureq::Error::StatusCode(429) => Self::Quota,
            ureq::Error::StatusCode(status) => Self::Status(status),
            ureq::Error::ConnectionFailed
            | ureq::Error::HostNotFound
            | ureq::Error::Timeout(_)
            | ureq::Error::Io(_) => Self::Connection(error.to_string()),
            other => Self::InvalidResponse(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    #[inline]
    fn from(error: serde_json::Error) -> Self {
        Self::InvalidResponse(error.to_string())
    }
}

/// How many times to attempt a call and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    #[inline]
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay: DEFAULT_BASE_DELAY,
        }
    }

    #[inline]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay before retrying after the given (1-based) failed attempt
    #[inline]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(EXPONENTIAL_BACKOFF_BASE.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Run a blocking call, retrying transient failures with exponential backoff
    pub fn run<T, F>(&self, what: &str, mut call: F) -> Result<T, ServiceError>
    where
        F: FnMut() -> Result<T, ServiceError>,
    {
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            debug!("{} attempt {}/{}", what, attempt, self.attempts);

            match call() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    warn!(
                        "{} failed with {}, attempt {}/{}",
                        what, e, attempt, self.attempts
                    );
                    last_error = Some(e);

                    if attempt < self.attempts {
                        let delay = self.delay_for(attempt);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
                Err(e) => {
                    warn!("{} failed with non-retryable error: {}", what, e);
                    return Err(e);
                }
            }
        }

        error!("All {} attempts failed for {}", self.attempts, what);
        Err(last_error.unwrap_or_else(|| ServiceError::Internal(format!("{what} never ran"))))
    }
}

impl Default for RetryPolicy {
    #[inline]
    fn default() -> Self {
        Self::new(3)
    }
}

/// Build a ureq agent whose timeout covers the whole call, body included
#[inline]
pub fn build_agent(timeout: Duration, user_agent: Option<&str>) -> ureq::Agent {
    let builder = ureq::Agent::config_builder().timeout_global(Some(timeout));
    match user_agent {
        Some(user_agent) => builder.user_agent(user_agent).build().into(),
        None => builder.build().into(),
    }
}

/// GET a URL and return the body as text
pub fn get_text(
    agent: &ureq::Agent,
    url: &str,
    api_key: Option<&str>,
) -> Result<String, ServiceError> {
    let mut request = agent.get(url);
    if let Some(key) = api_key {
        request = request.header("Authorization", &format!("Bearer {key}"));
    }

    let mut response = request.call()?;
    Ok(response.body_mut().read_to_string()?)
}

/// POST a JSON body and return the response body as text
pub fn post_json(
    agent: &ureq::Agent,
    url: &str,
    body: &str,
    api_key: Option<&str>,
) -> Result<String, ServiceError> {
    let mut response = send_json(agent, url, body, api_key)?;
    Ok(response.body_mut().read_to_string()?)
}

/// POST a JSON body and hand back a buffered reader over the streamed response
pub fn post_json_streaming(
    agent: &ureq::Agent,
    url: &str,
    body: &str,
    api_key: Option<&str>,
) -> Result<BufReader<ureq::BodyReader<'static>>, ServiceError> {
    let response = send_json(agent, url, body, api_key)?;
    Ok(BufReader::new(response.into_body().into_reader()))
}

fn send_json(
    agent: &ureq::Agent,
    url: &str,
    body: &str,
    api_key: Option<&str>,
) -> Result<ureq::http::Response<ureq::Body>, ServiceError> {
    let mut request = agent.post(url).header("Content-Type", "application/json");
    if let Some(key) = api_key {
        request = request.header("Authorization", &format!("Bearer {key}"));
    }

    Ok(request.send(body)?)
}

/// Run a blocking service call on tokio's blocking pool
pub async fn run_blocking<T, F>(call: F) -> Result<T, ServiceError>
where
    F: FnOnce() -> Result<T, ServiceError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?
}

/// Read an API key from the named environment variable, ignoring blank values
#[inline]
pub fn api_key_from_env(var: Option<&str>) -> Option<String> {
    let var = var?;
    std::env::var(var)
        .ok()
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
}
