use anyhow::{Context, Result, anyhow, bail};
use reqwest::StatusCode;
use reqwest::blocking::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Bounded retry with linear backoff for transient collaborator failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

/// Failure of a single attempt
#[derive(Debug)]
pub enum Attempt {
    /// Worth trying again: timeouts, connection resets, 429 and 5xx
    Transient(anyhow::Error),
    /// Retrying cannot help
    Fatal(anyhow::Error),
}

/// Run `call` until it succeeds, fails fatally, or the policy is exhausted
pub fn with_retry<T>(
    policy: &RetryPolicy,
    service: &str,
    mut call: impl FnMut() -> std::result::Result<T, Attempt>,
) -> Result<T> {
    let attempts = policy.max_retries + 1;
    let mut last_error = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let wait = policy.backoff * attempt;
            tracing::warn!(
                service,
                attempt = attempt + 1,
                attempts,
                wait_ms = wait.as_millis() as u64,
                "Retrying collaborator call"
            );
            std::thread::sleep(wait);
        }

        match call() {
            Ok(value) => return Ok(value),
            Err(Attempt::Fatal(e)) => return Err(e.context(format!("{service} request failed"))),
            Err(Attempt::Transient(e)) => {
                tracing::debug!(service, error = %e, "Transient failure");
                last_error = Some(e);
            }
        }
    }

    let error = last_error.unwrap_or_else(|| anyhow!("no attempts made"));
    Err(error.context(format!("{service} failed after {attempts} attempts")))
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Send a request and classify the outcome for [`with_retry`]
pub fn send(request: RequestBuilder) -> std::result::Result<Response, Attempt> {
    let response = request.send().map_err(|e| {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            Attempt::Transient(anyhow::Error::new(e))
        } else {
            Attempt::Fatal(anyhow::Error::new(e))
        }
    })?;

    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else if is_transient_status(status) {
        Err(Attempt::Transient(anyhow!("returned status {status}")))
    } else {
        Err(Attempt::Fatal(anyhow!("returned error status {status}")))
    }
}

/// Send with retries and decode a JSON body
///
/// `build` is called once per attempt since a `RequestBuilder` is consumed by sending.
pub fn fetch_json<T: DeserializeOwned>(
    policy: &RetryPolicy,
    service: &str,
    build: impl Fn() -> RequestBuilder,
) -> Result<T> {
    let response = with_retry(policy, service, || send(build()))?;
    response
        .json()
        .with_context(|| format!("Failed to parse {service} JSON response"))
}

/// Build a blocking client with the crate's user agent
pub fn http_client(timeout: Duration) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .user_agent(super::USER_AGENT)
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// Fail unless a batch endpoint answered once per input
pub fn ensure_len(actual: usize, expected: usize, service: &str) -> Result<()> {
    if actual != expected {
        bail!("{service} returned {actual} results for {expected} inputs");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_retry_recovers_from_transient() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let result = with_retry(&policy, "test", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(Attempt::Transient(anyhow!("busy")))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retry_gives_up() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let result: Result<()> = with_retry(&policy, "test", || {
            calls.set(calls.get() + 1);
            Err(Attempt::Transient(anyhow!("busy")))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
        assert!(format!("{:#}", result.unwrap_err()).contains("after 3 attempts"));
    }

    #[test]
    fn test_fatal_is_not_retried() {
        let calls = Cell::new(0);
        let result: Result<()> = with_retry(&RetryPolicy::default(), "test", || {
            calls.set(calls.get() + 1);
            Err(Attempt::Fatal(anyhow!("bad request")))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_transient_status() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::GATEWAY_TIMEOUT));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
    }
}
