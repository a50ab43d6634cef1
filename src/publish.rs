//! Upload of signed results to the results API.

use crate::{Result, SigningError};
use log::{info, warn};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use std::time::Duration;

const USER_AGENT_VALUE: &str = concat!("scorecard-signing/", env!("CARGO_PKG_VERSION"));

/// Delays between publish attempts; one more attempt than entries is made
pub const DEFAULT_BACKOFF_SCHEDULE: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(10),
];

/// Per-attempt deadline for a publish request
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Body of a publish request
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    /// The result JSON, verbatim
    pub result: String,
    /// Git ref the result was computed on
    pub branch: String,
    /// Proves the caller runs inside the repository's workflow
    pub access_token: String,
    pub tlog_index: i64,
    /// Serialized Sigstore bundle
    pub bundle: String,
}

impl std::fmt::Debug for PublishRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishRequest")
            .field("branch", &self.branch)
            .field("access_token", &"<redacted>")
            .field("tlog_index", &self.tlog_index)
            .finish_non_exhaustive()
    }
}

/// Results API client that retries on a fixed schedule
#[derive(Debug, Clone)]
pub struct RetryingPublisher {
    client: reqwest::Client,
    base_url: String,
    backoff: Vec<Duration>,
    timeout: Duration,
}

impl RetryingPublisher {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            backoff: DEFAULT_BACKOFF_SCHEDULE.to_vec(),
            timeout: PUBLISH_TIMEOUT,
        })
    }

    /// Replace the delays between attempts
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Endpoint results for `repo_name` (`owner/name`) are posted to
    pub fn endpoint(&self, repo_name: &str) -> String {
        format!("{}/projects/github.com/{}", self.base_url, repo_name)
    }

    /// Publish a signed result
    ///
    /// # Arguments
    /// * `result` - The result JSON that was signed
    /// * `repo_name` - Repository in `owner/name` form
    /// * `branch` - Git ref the result was computed on
    /// * `access_token` - The workflow's `ghs_` token
    /// * `tlog_index` - Transparency log index of the signature
    /// * `bundle` - Serialized bundle
    pub async fn publish(
        &self,
        result: &str,
        repo_name: &str,
        branch: &str,
        access_token: &str,
        tlog_index: i64,
        bundle: &str,
    ) -> Result<()> {
        let request = PublishRequest {
            result: result.to_string(),
            branch: branch.to_string(),
            access_token: access_token.to_string(),
            tlog_index,
            bundle: bundle.to_string(),
        };
        self.publish_request(repo_name, &request).await
    }

    /// Post `request`, retrying after each delay in the schedule
    ///
    /// Returns on the first 201. Every other status and every transport
    /// error counts as a failed attempt.
    pub async fn publish_request(&self, repo_name: &str, request: &PublishRequest) -> Result<()> {
        let url = self.endpoint(repo_name);
        let body = serde_json::to_vec(request)?;

        let mut last_error = match self.post(&url, &body).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        for delay in &self.backoff {
            warn!("error sending results to webapp: {}", last_error);
            warn!("retrying in {:?}...", delay);
            tokio::time::sleep(*delay).await;

            match self.post(&url, &body).await {
                Ok(()) => return Ok(()),
                Err(e) => last_error = e,
            }
        }

        Err(SigningError::PublishRetriesExhausted {
            attempts: self.backoff.len() + 1,
            source: Box::new(last_error),
        })
    }

    async fn post(&self, url: &str, body: &[u8]) -> Result<()> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| SigningError::Publish(format!("executing results API call: {}", e)))?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let text = response.text().await.map_err(|e| {
                SigningError::Publish(format!("reading response body: {}", e))
            })?;
            return Err(SigningError::Publish(format!(
                "http response {}, status: {}, error: {}",
                status.as_u16(),
                status,
                text
            )));
        }

        info!("Results published to {}", url);
        Ok(())
    }
}
