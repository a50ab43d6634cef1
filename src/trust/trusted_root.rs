use crate::trust::ValidityPeriod;
use crate::{Result, SigningError};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

pub const TRUSTED_ROOT_MEDIA_TYPE_PREFIX: &str = "application/vnd.dev.sigstore.trustedroot";

/// Roots of trust for the certificate authorities, logs and timestamp
/// authorities of a Sigstore deployment
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedRoot {
    pub media_type: String,
    #[serde(default)]
    pub tlogs: Vec<TransparencyLogInstance>,
    #[serde(default)]
    pub certificate_authorities: Vec<CertificateAuthority>,
    #[serde(default)]
    pub ctlogs: Vec<TransparencyLogInstance>,
    #[serde(default)]
    pub timestamp_authorities: Vec<CertificateAuthority>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransparencyLogInstance {
    pub base_url: String,
    #[serde(default)]
    pub hash_algorithm: String,
    pub public_key: PublicKey,
    pub log_id: TrustedLogId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKey {
    /// Base64 DER SubjectPublicKeyInfo
    #[serde(default)]
    pub raw_bytes: Option<String>,
    #[serde(default)]
    pub key_details: String,
    #[serde(default)]
    pub valid_for: Option<ValidityPeriod>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedLogId {
    pub key_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateAuthority {
    #[serde(default)]
    pub uri: String,
    pub cert_chain: CertificateChain,
    #[serde(default)]
    pub valid_for: Option<ValidityPeriod>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CertificateChain {
    pub certificates: Vec<RawCertificate>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCertificate {
    pub raw_bytes: String,
}

fn valid_at(period: Option<&ValidityPeriod>, now: DateTime<Utc>) -> bool {
    period.map_or(true, |p| p.contains(now))
}

fn decode(what: &str, value: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(value)
        .map_err(|e| SigningError::TrustRoot(format!("invalid base64 in {}: {}", what, e)))
}

fn chain_certificates(authorities: &[CertificateAuthority], now: DateTime<Utc>) -> Result<Vec<Vec<u8>>> {
    authorities
        .iter()
        .filter(|ca| valid_at(ca.valid_for.as_ref(), now))
        .flat_map(|ca| ca.cert_chain.certificates.iter())
        .map(|cert| decode("certificate", &cert.raw_bytes))
        .collect()
}

impl TrustedRoot {
    pub fn from_json(json: &[u8]) -> Result<Self> {
        let root: TrustedRoot = serde_json::from_slice(json).map_err(|e| {
            SigningError::TrustRoot(format!("Failed to parse trusted root: {}", e))
        })?;
        if !root.media_type.starts_with(TRUSTED_ROOT_MEDIA_TYPE_PREFIX) {
            return Err(SigningError::TrustRoot(format!(
                "unsupported trusted root media type: {}",
                root.media_type
            )));
        }
        Ok(root)
    }

    /// DER certificates of the certificate authorities valid at `now`
    pub fn ca_certificates(&self, now: DateTime<Utc>) -> Result<Vec<Vec<u8>>> {
        chain_certificates(&self.certificate_authorities, now)
    }

    /// DER certificates of the timestamp authorities valid at `now`
    pub fn tsa_certificates(&self, now: DateTime<Utc>) -> Result<Vec<Vec<u8>>> {
        chain_certificates(&self.timestamp_authorities, now)
    }

    /// DER public keys of the transparency logs valid at `now`, keyed by the
    /// base64 log ID used in bundles
    pub fn tlog_keys(&self, now: DateTime<Utc>) -> Result<BTreeMap<String, Vec<u8>>> {
        let mut keys = BTreeMap::new();
        for tlog in &self.tlogs {
            if !valid_at(tlog.public_key.valid_for.as_ref(), now) {
                continue;
            }
            if let Some(raw) = &tlog.public_key.raw_bytes {
                keys.insert(tlog.log_id.key_id.clone(), decode(&tlog.base_url, raw)?);
            }
        }
        Ok(keys)
    }
}
