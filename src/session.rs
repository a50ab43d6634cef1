use crate::bundle::{Bundle, BundleBuilder, extract_tlog_index};
use crate::identity::token_subject;
use crate::keys::EphemeralKeypair;
use crate::publish::RetryingPublisher;
use crate::services::{
    CertificateIssuer, FulcioClient, RekorClient, ServiceOptions, TimestampAuthority,
    TransparencyLog, TsaClient,
};
use crate::trust::{SigningConfig, TrustRootSource, select_service, select_services};
use crate::{Result, SigningError};
use chrono::{DateTime, Utc};
use log::{debug, info};
use sha2::{Digest, Sha256};
use std::time::Duration;
use zeroize::Zeroizing;

/// Prefix of the short-lived token GitHub hands each workflow run
pub const GITHUB_SERVICE_TOKEN_PREFIX: &str = "ghs_";

/// Major API versions this crate can talk to
pub const CA_API_VERSIONS: &[u32] = &[1];
pub const TSA_API_VERSIONS: &[u32] = &[1];
/// Newer log versions advertised by the signing config are ignored
pub const TLOG_API_VERSIONS: &[u32] = &[1];

/// Per-service connection settings used when building clients from a signing config
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub ca_timeout: Duration,
    pub tsa_timeout: Duration,
    pub tlog_timeout: Duration,
    /// Internal retries of each service client on transient failures
    pub retries: u32,
    pub retry_backoff: Duration,
    /// Evaluate service validity at this instant instead of the current time
    pub now: Option<DateTime<Utc>>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            ca_timeout: Duration::from_secs(30),
            tsa_timeout: Duration::from_secs(30),
            tlog_timeout: Duration::from_secs(90),
            retries: 3,
            retry_backoff: Duration::from_secs(1),
            now: None,
        }
    }
}

/// Check the access token looks like a workflow's default `GITHUB_TOKEN`
pub fn validate_access_token(token: &str) -> Result<()> {
    if token.is_empty() {
        return Err(SigningError::EmptyToken);
    }
    if !token.starts_with(GITHUB_SERVICE_TOKEN_PREFIX) {
        return Err(SigningError::InvalidToken(
            "not a default GITHUB_TOKEN".into(),
        ));
    }
    Ok(())
}

/// Clients for one signing operation
pub struct SigningServices {
    pub certificate_issuer: Box<dyn CertificateIssuer>,
    /// May be empty
    pub timestamp_authorities: Vec<Box<dyn TimestampAuthority>>,
    pub transparency_log: Box<dyn TransparencyLog>,
}

impl SigningServices {
    /// Select endpoints from `config` and build HTTP clients for them
    ///
    /// The transparency log is pinned to the versions in [`TLOG_API_VERSIONS`]
    /// even when the config advertises newer ones.
    pub fn from_signing_config(config: &SigningConfig, options: &SessionOptions) -> Result<Self> {
        let now = options.now.unwrap_or_else(Utc::now);
        let service_options = |url: &str, timeout: Duration| {
            ServiceOptions::new(url)
                .with_timeout(timeout)
                .with_retries(options.retries)
                .with_retry_backoff(options.retry_backoff)
        };

        let ca = select_service("certificate authority", &config.ca_urls, CA_API_VERSIONS, now)?;
        debug!("Selected certificate authority {} (v{})", ca.url, ca.major_api_version);
        let certificate_issuer: Box<dyn CertificateIssuer> = Box::new(FulcioClient::new(service_options(
            &ca.url,
            options.ca_timeout,
        ))?);

        let mut timestamp_authorities: Vec<Box<dyn TimestampAuthority>> = Vec::new();
        for tsa in select_services(
            "timestamp authority",
            &config.tsa_urls,
            &config.tsa_config,
            TSA_API_VERSIONS,
            now,
        )? {
            debug!("Selected timestamp authority {}", tsa.url);
            timestamp_authorities.push(Box::new(TsaClient::new(service_options(
                &tsa.url,
                options.tsa_timeout,
            ))?));
        }

        let log = select_service(
            "transparency log",
            &config.rekor_tlog_urls,
            TLOG_API_VERSIONS,
            now,
        )?;
        debug!("Selected transparency log {} (v{})", log.url, log.major_api_version);
        let transparency_log: Box<dyn TransparencyLog> = Box::new(RekorClient::new(service_options(
            &log.url,
            options.tlog_timeout,
        ))?);

        Ok(Self {
            certificate_issuer,
            timestamp_authorities,
            transparency_log,
        })
    }
}

/// Output of a successful signing operation
#[derive(Debug, Clone)]
pub struct SignedResult {
    pub bundle: Bundle,
    /// Compact JSON of `bundle`
    pub bundle_json: String,
    pub tlog_index: i64,
}

/// One invocation's validated credentials
///
/// Tokens are kept in zeroizing buffers and never logged.
pub struct SigningSession {
    access_token: Zeroizing<String>,
    identity_token: Zeroizing<String>,
    options: SessionOptions,
}

impl SigningSession {
    /// Validate both tokens without touching the network
    pub fn new(access_token: &str, identity_token: &str) -> Result<Self> {
        validate_access_token(access_token)?;
        if identity_token.is_empty() {
            return Err(SigningError::EmptyIdentityToken);
        }

        Ok(Self {
            access_token: Zeroizing::new(access_token.to_string()),
            identity_token: Zeroizing::new(identity_token.to_string()),
            options: SessionOptions::default(),
        })
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Sign `payload` with services resolved from `trust_root`
    pub async fn sign(
        &self,
        payload: &[u8],
        trust_root: &dyn TrustRootSource,
    ) -> Result<SignedResult> {
        if payload.is_empty() {
            return Err(SigningError::EmptyPayload);
        }

        // Dropped at the end of this call
        let keypair = EphemeralKeypair::generate();

        debug!("Resolving signing config from {} trust root", trust_root.source_type());
        let config = trust_root.signing_config().await?;
        let services = SigningServices::from_signing_config(&config, &self.options)?;

        self.sign_with_keypair(payload, &keypair, &services).await
    }

    /// Sign `payload` using already constructed service clients
    pub async fn sign_with_services(
        &self,
        payload: &[u8],
        services: &SigningServices,
    ) -> Result<SignedResult> {
        if payload.is_empty() {
            return Err(SigningError::EmptyPayload);
        }

        let keypair = EphemeralKeypair::generate();
        self.sign_with_keypair(payload, &keypair, services).await
    }

    async fn sign_with_keypair(
        &self,
        payload: &[u8],
        keypair: &EphemeralKeypair,
        services: &SigningServices,
    ) -> Result<SignedResult> {
        let bundle = self.produce_bundle(payload, keypair, services).await?;

        let tlog_index = extract_tlog_index(&bundle)?;
        let bundle_json = bundle.to_json()?;
        debug!("Bundle: {}", bundle_json);
        info!("Signed result recorded at transparency log index {}", tlog_index);

        Ok(SignedResult {
            bundle,
            bundle_json,
            tlog_index,
        })
    }

    async fn produce_bundle(
        &self,
        payload: &[u8],
        keypair: &EphemeralKeypair,
        services: &SigningServices,
    ) -> Result<Bundle> {
        let digest: [u8; 32] = Sha256::digest(payload).into();
        let signature = keypair.sign(payload);

        let subject = token_subject(&self.identity_token)?;
        let proof = keypair.sign(subject.as_bytes());
        let certificate = services
            .certificate_issuer
            .issue(&self.identity_token, &keypair.public_key_pem()?, &proof)
            .await?;
        debug!(
            "{} issued a chain of {} certificate(s)",
            services.certificate_issuer.issuer_type(),
            certificate.chain().len()
        );

        let mut builder = BundleBuilder::new()
            .certificate(certificate.leaf().to_vec())
            .message_signature(digest, signature.clone());

        for tsa in &services.timestamp_authorities {
            let response = tsa.timestamp(&signature).await?;
            debug!("Obtained {} timestamp", tsa.authority_type());
            builder = builder.add_rfc3161_timestamp(response);
        }

        let entry = services
            .transparency_log
            .submit(&signature, certificate.leaf(), &digest)
            .await?;
        debug!(
            "{} entry created at index {}",
            services.transparency_log.log_type(),
            entry.log_index
        );

        builder.add_tlog_entry(entry).build()
    }

    /// Publish a signed result with this session's access token
    pub async fn publish(
        &self,
        publisher: &RetryingPublisher,
        result: &str,
        repo_name: &str,
        branch: &str,
        signed: &SignedResult,
    ) -> Result<()> {
        publisher
            .publish(
                result,
                repo_name,
                branch,
                &self.access_token,
                signed.tlog_index,
                &signed.bundle_json,
            )
            .await
    }
}

impl std::fmt::Debug for SigningSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningSession")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
