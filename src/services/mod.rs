pub mod fulcio;
pub mod rekor;
pub mod tsa;

use crate::bundle::TransparencyLogEntry;
use crate::{Result, SigningError};
use async_trait::async_trait;
use log::warn;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::time::Duration;

pub use fulcio::FulcioClient;
pub use rekor::RekorClient;
pub use tsa::TsaClient;

const USER_AGENT_VALUE: &str = concat!("scorecard-signing/", env!("CARGO_PKG_VERSION"));

/// Connection settings shared by all signing service clients
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Service base URL (for a TSA, the full timestamp endpoint)
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Extra attempts after the first on transient failures
    pub retries: u32,
    /// Delay before the first retry; doubles for each later one
    pub retry_backoff: Duration,
}

impl ServiceOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
            retries: 3,
            retry_backoff: Duration::from_secs(1),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub(crate) fn http_client(&self) -> Result<reqwest::Client> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        Ok(reqwest::Client::builder()
            .default_headers(headers)
            .timeout(self.timeout)
            .build()?)
    }
}

/// Certificate chain returned by a certificate authority, leaf first, DER
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    chain: Vec<Vec<u8>>,
}

impl IssuedCertificate {
    pub fn new(chain: Vec<Vec<u8>>) -> Result<Self> {
        if chain.is_empty() {
            return Err(SigningError::CertificateIssuer(
                "certificate chain is empty".into(),
            ));
        }
        Ok(Self { chain })
    }

    pub fn leaf(&self) -> &[u8] {
        &self.chain[0]
    }

    pub fn chain(&self) -> &[Vec<u8>] {
        &self.chain
    }
}

/// Trait for certificate authorities that bind an ephemeral key to an identity
#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    /// Request a short-lived certificate for `public_key_pem`
    ///
    /// `proof_of_possession` is a signature by the matching private key over
    /// the identity token's subject.
    async fn issue(
        &self,
        identity_token: &str,
        public_key_pem: &str,
        proof_of_possession: &[u8],
    ) -> Result<IssuedCertificate>;

    /// Get the issuer type name for logging
    fn issuer_type(&self) -> &'static str;
}

/// Trait for RFC 3161 timestamp authorities
#[async_trait]
pub trait TimestampAuthority: Send + Sync {
    /// Timestamp `signature`, returning the DER TimeStampResp
    async fn timestamp(&self, signature: &[u8]) -> Result<Vec<u8>>;

    /// Get the authority type name for logging
    fn authority_type(&self) -> &'static str;
}

/// Trait for transparency logs that record the signing event
#[async_trait]
pub trait TransparencyLog: Send + Sync {
    /// Upload the signature and return the log entry that records it
    async fn submit(
        &self,
        signature: &[u8],
        certificate_der: &[u8],
        payload_digest: &[u8; 32],
    ) -> Result<TransparencyLogEntry>;

    /// Get the log type name for logging
    fn log_type(&self) -> &'static str;
}

fn is_transient(outcome: &std::result::Result<reqwest::Response, reqwest::Error>) -> bool {
    match outcome {
        Ok(response) => {
            response.status() == StatusCode::TOO_MANY_REQUESTS
                || response.status().is_server_error()
        }
        Err(e) => e.is_timeout() || e.is_connect(),
    }
}

/// Send a request, retrying on timeouts, connection failures, 429 and 5xx
///
/// The final outcome is handed back untouched, so a persistent 503 reaches the
/// caller as a response rather than an error.
pub(crate) async fn send_with_retries<F>(
    service: &str,
    options: &ServiceOptions,
    build: F,
) -> std::result::Result<reqwest::Response, reqwest::Error>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut delay = options.retry_backoff;
    let mut attempt = 0;
    loop {
        let outcome = build().send().await;
        if attempt >= options.retries || !is_transient(&outcome) {
            return outcome;
        }
        attempt += 1;
        match &outcome {
            Ok(response) => warn!(
                "{} returned {}, retrying in {:?} ({}/{})",
                service,
                response.status(),
                delay,
                attempt,
                options.retries
            ),
            Err(e) => warn!(
                "{} request failed: {}, retrying in {:?} ({}/{})",
                service, e, delay, attempt, options.retries
            ),
        }
        tokio::time::sleep(delay).await;
        delay = delay.saturating_mul(2);
    }
}

/// Status and body of a failed response, for error messages
pub(crate) async fn error_body(response: reqwest::Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(body) => format!("{}: {}", status, body),
        Err(e) => format!("{}, reading response body: {}", status, e),
    }
}
