//! HTTP health checking for the application web endpoint.

use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::error::HostError;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default connection timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Health checker for the web endpoint.
#[derive(Debug, Clone)]
pub struct HealthChecker {
    /// HTTP client for health checks.
    client: Client,
}

impl HealthChecker {
    /// Creates a new health checker.
    ///
    /// Redirects are not followed: the database selector answers 303 on a
    /// fresh install, which already proves the server is up.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new() -> Result<Self, HostError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| HostError::Http {
                url: String::new(),
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self { client })
    }

    /// Returns the status code of a GET request, or `None` if nothing answered.
    ///
    /// # Errors
    ///
    /// Returns an error for requests that fail for reasons other than the
    /// endpoint being unreachable, such as a malformed URL.
    pub async fn status(&self, url: &str) -> Result<Option<u16>, HostError> {
        match self.client.get(url).send().await {
            Ok(response) => Ok(Some(response.status().as_u16())),
            Err(e) if e.is_connect() || e.is_timeout() => {
                debug!("Endpoint {url} unreachable: {e}");
                Ok(None)
            }
            Err(e) => Err(HostError::Http {
                url: url.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// Returns true for statuses that prove the server is serving requests.
#[must_use]
pub const fn is_healthy_status(status: u16) -> bool {
    matches!(status, 200..=399)
}
