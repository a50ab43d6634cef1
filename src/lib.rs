use thiserror::Error;

pub mod bundle;
pub mod identity;
pub mod keys;
pub mod publish;
pub mod services;
pub mod session;
pub mod trust;

// Re-export commonly used types
pub use bundle::{Bundle, BundleBuilder, extract_tlog_index, extract_tlog_index_from_json};
pub use identity::{GithubActionsIdentity, IdentityProvider, StaticIdentity};
pub use keys::EphemeralKeypair;
pub use publish::{DEFAULT_BACKOFF_SCHEDULE, PublishRequest, RetryingPublisher};
pub use services::{CertificateIssuer, IssuedCertificate, ServiceOptions, TimestampAuthority, TransparencyLog};
pub use session::{SessionOptions, SignedResult, SigningServices, SigningSession};
pub use trust::{
    Service, ServiceConfiguration, ServiceSelector, SigningConfig, TrustRootSource, TrustedRoot,
};

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("error token empty")]
    EmptyToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("identity token empty")]
    EmptyIdentityToken,

    #[error("malformed identity token: {0}")]
    MalformedIdentityToken(String),

    #[error("payload empty")]
    EmptyPayload,

    #[error("payload is not valid UTF-8: {0}")]
    NonUtf8Payload(#[from] std::str::Utf8Error),

    #[error("Identity provider error: {0}")]
    IdentityProvider(String),

    #[error("Trust root error: {0}")]
    TrustRoot(String),

    #[error("Service selection failed: {0}")]
    ServiceSelection(String),

    #[error("Key error: {0}")]
    Key(String),

    #[error("Certificate issuer error: {0}")]
    CertificateIssuer(String),

    #[error("Timestamp authority error: {0}")]
    TimestampAuthority(String),

    #[error("Transparency log error: {0}")]
    TransparencyLog(String),

    #[error("no rekor tlog entries")]
    NoTlogEntries,

    #[error("Malformed bundle: {0}")]
    MalformedBundle(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("error sending results to webapp after {attempts} attempts: {source}")]
    PublishRetriesExhausted {
        attempts: usize,
        #[source]
        source: Box<SigningError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SigningError>;

// ===== Convenience entry point =====

/// Sign a result payload against the public-good Sigstore instance and publish it
///
/// # Arguments
/// * `payload` - The JSON result to sign and publish
/// * `repo_name` - Repository the result belongs to (e.g., "org/repo")
/// * `repo_ref` - Branch reference the result was computed on (e.g., "refs/heads/main")
/// * `access_token` - The workflow's default `ghs_` token
/// * `identity_token` - OIDC identity token for certificate issuance
/// * `publish_base_url` - Base URL of the results API
pub async fn sign_and_publish(
    payload: &[u8],
    repo_name: &str,
    repo_ref: &str,
    access_token: &str,
    identity_token: &str,
    publish_base_url: &str,
) -> Result<SignedResult> {
    // Reject bad input before any network traffic
    let session = SigningSession::new(access_token, identity_token)?;
    let result = std::str::from_utf8(payload)?;

    let trust_root = trust::tuf::TufTrustRoot::new()?;
    let signed = session.sign(payload, &trust_root).await?;

    let publisher = RetryingPublisher::new(publish_base_url)?;
    session
        .publish(&publisher, result, repo_name, repo_ref, &signed)
        .await?;

    Ok(signed)
}
