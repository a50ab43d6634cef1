pub mod file;
pub mod trusted_root;
pub mod tuf;

pub use trusted_root::TrustedRoot;

use crate::{Result, SigningError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

pub const SIGNING_CONFIG_MEDIA_TYPE: &str = "application/vnd.dev.sigstore.signingconfig.v0.2+json";

/// Window during which a service endpoint may be used
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityPeriod {
    pub start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl ValidityPeriod {
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && self.end.map_or(true, |end| now < end)
    }
}

/// A single service endpoint advertised by the signing config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub url: String,
    pub major_api_version: u32,
    pub valid_for: ValidityPeriod,
    #[serde(default)]
    pub operator: String,
}

/// How many of the matching services a client should use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceSelector {
    #[serde(rename = "SERVICE_SELECTOR_UNDEFINED")]
    Undefined,
    #[serde(rename = "ALL")]
    All,
    #[default]
    #[serde(rename = "ANY")]
    Any,
    #[serde(rename = "EXACT")]
    Exact,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfiguration {
    #[serde(default)]
    pub selector: ServiceSelector,
    /// Only meaningful for [`ServiceSelector::Exact`]
    #[serde(default)]
    pub count: u32,
}

/// Service endpoints valid for signing, as distributed through the trust root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningConfig {
    pub media_type: String,
    #[serde(default)]
    pub ca_urls: Vec<Service>,
    #[serde(default)]
    pub oidc_urls: Vec<Service>,
    #[serde(default)]
    pub rekor_tlog_urls: Vec<Service>,
    #[serde(default)]
    pub tsa_urls: Vec<Service>,
    #[serde(default)]
    pub rekor_tlog_config: ServiceConfiguration,
    #[serde(default)]
    pub tsa_config: ServiceConfiguration,
}

impl SigningConfig {
    pub fn from_json(json: &[u8]) -> Result<Self> {
        let config: SigningConfig = serde_json::from_slice(json)?;
        if config.media_type != SIGNING_CONFIG_MEDIA_TYPE {
            return Err(SigningError::TrustRoot(format!(
                "unsupported signing config media type: {}",
                config.media_type
            )));
        }
        Ok(config)
    }
}

/// Trait for different sources of the signing configuration and trust material
#[async_trait]
pub trait TrustRootSource: Send + Sync {
    /// Resolve the signing configuration valid right now
    async fn signing_config(&self) -> Result<SigningConfig>;

    /// Resolve the CA, transparency log and timestamp authority roots
    async fn trusted_root(&self) -> Result<TrustedRoot> {
        Err(SigningError::TrustRoot(format!(
            "{} source does not provide a trusted root",
            self.source_type()
        )))
    }

    /// Get the source type name for logging
    fn source_type(&self) -> &'static str;
}

fn is_eligible(service: &Service, supported_versions: &[u32], now: DateTime<Utc>) -> bool {
    supported_versions.contains(&service.major_api_version) && service.valid_for.contains(now)
}

/// Pick one endpoint for `kind`
///
/// Only services valid at `now` with a supported major version qualify. The
/// highest qualifying version wins; ties go to the first listed service.
pub fn select_service(
    kind: &str,
    services: &[Service],
    supported_versions: &[u32],
    now: DateTime<Utc>,
) -> Result<Service> {
    let mut selected: Option<&Service> = None;
    for service in services {
        if !is_eligible(service, supported_versions, now) {
            continue;
        }
        match selected {
            Some(current) if current.major_api_version >= service.major_api_version => {}
            _ => selected = Some(service),
        }
    }

    selected.cloned().ok_or_else(|| {
        SigningError::ServiceSelection(format!(
            "no {} matches API versions {:?} at {}",
            kind,
            supported_versions,
            now.to_rfc3339()
        ))
    })
}

/// Pick the endpoints for `kind` according to `config`
///
/// An empty service list is a valid, empty selection. A non-empty list with
/// nothing eligible is an error.
pub fn select_services(
    kind: &str,
    services: &[Service],
    config: &ServiceConfiguration,
    supported_versions: &[u32],
    now: DateTime<Utc>,
) -> Result<Vec<Service>> {
    if services.is_empty() {
        return Ok(Vec::new());
    }

    let highest = services
        .iter()
        .filter(|s| is_eligible(s, supported_versions, now))
        .map(|s| s.major_api_version)
        .max()
        .ok_or_else(|| {
            SigningError::ServiceSelection(format!(
                "no {} matches API versions {:?} at {}",
                kind,
                supported_versions,
                now.to_rfc3339()
            ))
        })?;

    let candidates: Vec<&Service> = services
        .iter()
        .filter(|s| s.major_api_version == highest && is_eligible(s, supported_versions, now))
        .collect();

    match config.selector {
        ServiceSelector::All => Ok(candidates.into_iter().cloned().collect()),
        ServiceSelector::Any => Ok(candidates
            .choose(&mut rand::thread_rng())
            .map(|s| vec![(*s).clone()])
            .unwrap_or_default()),
        ServiceSelector::Exact => {
            let count = config.count as usize;
            if count == 0 || candidates.len() < count {
                return Err(SigningError::ServiceSelection(format!(
                    "{} selector requires exactly {} service(s), {} available",
                    kind,
                    count,
                    candidates.len()
                )));
            }
            Ok(candidates.into_iter().take(count).cloned().collect())
        }
        ServiceSelector::Undefined => Err(SigningError::ServiceSelection(format!(
            "undefined selector for {}",
            kind
        ))),
    }
}
