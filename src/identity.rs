//! OIDC identity tokens for certificate issuance.

use crate::{Result, SigningError};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use log::{debug, warn};
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use std::time::Duration;
use zeroize::Zeroizing;

const ENV_REQUEST_URL: &str = "ACTIONS_ID_TOKEN_REQUEST_URL";
const ENV_REQUEST_TOKEN: &str = "ACTIONS_ID_TOKEN_REQUEST_TOKEN";
const SIGSTORE_AUDIENCE: &str = "sigstore";
const MAX_ATTEMPTS: usize = 3;

/// Trait for anything that can hand out an OIDC identity token
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Obtain a fresh identity token
    async fn identity_token(&self) -> Result<Zeroizing<String>>;

    /// Get the provider type name for logging
    fn provider_type(&self) -> &'static str;
}

/// Identity provider wrapping a token obtained elsewhere
pub struct StaticIdentity {
    token: Zeroizing<String>,
}

impl StaticIdentity {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Zeroizing::new(token.into()),
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn identity_token(&self) -> Result<Zeroizing<String>> {
        if self.token.is_empty() {
            return Err(SigningError::EmptyIdentityToken);
        }
        Ok(self.token.clone())
    }

    fn provider_type(&self) -> &'static str {
        "Static"
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    value: String,
}

/// GitHub Actions OIDC provider
///
/// Requests a token scoped to the `sigstore` audience from the runner's token
/// endpoint. Needs the workflow to grant `id-token: write`.
pub struct GithubActionsIdentity {
    client: reqwest::Client,
    request_url: String,
    request_token: Zeroizing<String>,
    retry_delay: Duration,
}

impl GithubActionsIdentity {
    pub fn new(request_url: impl Into<String>, request_token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            request_url: request_url.into(),
            request_token: Zeroizing::new(request_token.into()),
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Read the runner-provided request URL and token once
    pub fn from_env() -> Result<Self> {
        let url = std::env::var(ENV_REQUEST_URL).map_err(|_| {
            SigningError::IdentityProvider(format!(
                "{} is not set; does the workflow have `id-token: write`?",
                ENV_REQUEST_URL
            ))
        })?;
        let token = std::env::var(ENV_REQUEST_TOKEN).map_err(|_| {
            SigningError::IdentityProvider(format!("{} is not set", ENV_REQUEST_TOKEN))
        })?;
        Self::new(url, token)
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn token_url(&self) -> String {
        // The runner URL already carries a query string
        format!("{}&audience={}", self.request_url, SIGSTORE_AUDIENCE)
    }
}

#[async_trait]
impl IdentityProvider for GithubActionsIdentity {
    async fn identity_token(&self) -> Result<Zeroizing<String>> {
        let url = self.token_url();
        let auth_value = Zeroizing::new(format!("bearer {}", self.request_token.as_str()));

        let mut attempt = 1;
        let response = loop {
            match self
                .client
                .get(&url)
                .header(AUTHORIZATION, auth_value.as_str())
                .send()
                .await
            {
                Ok(response) => break response,
                Err(e) if attempt < MAX_ATTEMPTS => {
                    warn!("error fetching GitHub OIDC token (will retry): {}", e);
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(SigningError::IdentityProvider(format!(
                        "fetching GitHub OIDC token: {}",
                        e
                    )));
                }
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.map_err(|e| {
                SigningError::IdentityProvider(format!("reading response body: {}", e))
            })?;
            return Err(SigningError::IdentityProvider(format!(
                "OIDC token endpoint returned {}: {}",
                status, body
            )));
        }

        let payload: TokenResponse = response.json().await.map_err(|e| {
            SigningError::IdentityProvider(format!("Failed to parse OIDC token response: {}", e))
        })?;
        if payload.value.is_empty() {
            return Err(SigningError::EmptyIdentityToken);
        }
        debug!("Obtained GitHub OIDC token after {} attempt(s)", attempt);

        Ok(Zeroizing::new(payload.value))
    }

    fn provider_type(&self) -> &'static str {
        "GitHub Actions"
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
    email: Option<String>,
}

/// Subject the proof of possession must be computed over
///
/// Reads the JWT claims without verifying them; Fulcio does the
/// verification. Email-bearing tokens are proven over the email, everything
/// else over `sub`.
pub fn token_subject(identity_token: &str) -> Result<String> {
    let mut parts = identity_token.split('.');
    let claims_b64 = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(claims), Some(_), None) => claims,
        _ => {
            return Err(SigningError::MalformedIdentityToken(
                "expected three dot-separated segments".into(),
            ));
        }
    };

    let claims_json = URL_SAFE_NO_PAD
        .decode(claims_b64.trim_end_matches('='))
        .map_err(|e| SigningError::MalformedIdentityToken(format!("claims are not base64url: {}", e)))?;
    let claims: Claims = serde_json::from_slice(&claims_json)
        .map_err(|e| SigningError::MalformedIdentityToken(format!("claims are not JSON: {}", e)))?;

    claims
        .email
        .or(claims.sub)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SigningError::MalformedIdentityToken("no `sub` or `email` claim".into()))
}
