use crate::{Result, SigningError};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const BUNDLE_V03_MEDIA_TYPE: &str = "application/vnd.dev.sigstore.bundle.v0.3+json";

/// Sigstore bundle in its protobuf-JSON shape
///
/// Byte fields are base64 strings and 64-bit integers are decimal strings, as
/// the protobuf JSON mapping requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub media_type: String,
    pub verification_material: VerificationMaterial,
    pub message_signature: MessageSignature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMaterial {
    pub certificate: Certificate,
    pub tlog_entries: Vec<TransparencyLogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_verification_data: Option<TimestampVerificationData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    /// Base64 DER of the leaf certificate
    pub raw_bytes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimestampVerificationData {
    pub rfc3161_timestamps: Vec<Rfc3161Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rfc3161Timestamp {
    /// Base64 DER of the TimeStampResp
    pub signed_timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransparencyLogEntry {
    #[serde(default = "zero")]
    pub log_index: String,
    pub log_id: LogId,
    pub kind_version: KindVersion,
    #[serde(default = "zero")]
    pub integrated_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inclusion_promise: Option<InclusionPromise>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inclusion_proof: Option<InclusionProof>,
    pub canonicalized_body: String,
}

/// Protobuf JSON drops zero-valued int64 fields; they read back as "0"
fn zero() -> String {
    "0".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogId {
    pub key_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindVersion {
    pub kind: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionPromise {
    pub signed_entry_timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionProof {
    #[serde(default = "zero")]
    pub log_index: String,
    pub root_hash: String,
    #[serde(default = "zero")]
    pub tree_size: String,
    pub hashes: Vec<String>,
    pub checkpoint: Checkpoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub envelope: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSignature {
    pub message_digest: MessageDigest,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDigest {
    pub algorithm: String,
    pub digest: String,
}

impl Bundle {
    /// Canonical JSON text: compact, fields in declaration order
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| SigningError::MalformedBundle(format!("Failed to parse bundle: {}", e)))
    }

    /// DER bytes of the signing certificate
    pub fn certificate_der(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(&self.verification_material.certificate.raw_bytes)
            .map_err(|e| SigningError::MalformedBundle(format!("Failed to decode certificate: {}", e)))
    }
}

/// Assembles a bundle from the outputs of the signing services
#[derive(Debug, Default)]
pub struct BundleBuilder {
    certificate: Option<Vec<u8>>,
    message_signature: Option<([u8; 32], Vec<u8>)>,
    tlog_entries: Vec<TransparencyLogEntry>,
    rfc3161_timestamps: Vec<Vec<u8>>,
}

impl BundleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the leaf signing certificate (DER)
    pub fn certificate(mut self, der: Vec<u8>) -> Self {
        self.certificate = Some(der);
        self
    }

    /// Set the SHA-256 digest of the payload and the DER signature over it
    pub fn message_signature(mut self, digest: [u8; 32], signature: Vec<u8>) -> Self {
        self.message_signature = Some((digest, signature));
        self
    }

    pub fn add_tlog_entry(mut self, entry: TransparencyLogEntry) -> Self {
        self.tlog_entries.push(entry);
        self
    }

    /// Add a DER-encoded RFC 3161 TimeStampResp
    pub fn add_rfc3161_timestamp(mut self, response: Vec<u8>) -> Self {
        self.rfc3161_timestamps.push(response);
        self
    }

    /// Build the bundle; fails unless it has a certificate, a signature and at
    /// least one transparency log entry
    pub fn build(self) -> Result<Bundle> {
        let certificate = self
            .certificate
            .ok_or_else(|| SigningError::MalformedBundle("certificate not set".into()))?;
        let (digest, signature) = self
            .message_signature
            .ok_or_else(|| SigningError::MalformedBundle("message signature not set".into()))?;
        if self.tlog_entries.is_empty() {
            return Err(SigningError::NoTlogEntries);
        }

        let timestamp_verification_data = if self.rfc3161_timestamps.is_empty() {
            None
        } else {
            Some(TimestampVerificationData {
                rfc3161_timestamps: self
                    .rfc3161_timestamps
                    .iter()
                    .map(|ts| Rfc3161Timestamp {
                        signed_timestamp: BASE64.encode(ts),
                    })
                    .collect(),
            })
        };

        Ok(Bundle {
            media_type: BUNDLE_V03_MEDIA_TYPE.to_string(),
            verification_material: VerificationMaterial {
                certificate: Certificate {
                    raw_bytes: BASE64.encode(certificate),
                },
                tlog_entries: self.tlog_entries,
                timestamp_verification_data,
            },
            message_signature: MessageSignature {
                message_digest: MessageDigest {
                    algorithm: "SHA2_256".to_string(),
                    digest: BASE64.encode(digest),
                },
                signature: BASE64.encode(signature),
            },
        })
    }
}

/// Log index of the bundle's first transparency log entry
///
/// We only submit to one log, so the first entry is the only one. A bundle
/// without entries is an error, never index 0.
pub fn extract_tlog_index(bundle: &Bundle) -> Result<i64> {
    let entry = bundle
        .verification_material
        .tlog_entries
        .first()
        .ok_or(SigningError::NoTlogEntries)?;

    entry.log_index.parse::<i64>().map_err(|e| {
        SigningError::MalformedBundle(format!("invalid log index {:?}: {}", entry.log_index, e))
    })
}

/// Same as [`extract_tlog_index`] for a serialized bundle of any version
///
/// Accepts the index as either a decimal string or a JSON number. A missing
/// index reads as 0 only when the entry carries `logId` and `kindVersion`;
/// otherwise the entry is malformed.
pub fn extract_tlog_index_from_json(json: &str) -> Result<i64> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| SigningError::MalformedBundle(format!("Failed to parse bundle: {}", e)))?;

    let entry = value
        .get("verificationMaterial")
        .and_then(|vm| vm.get("tlogEntries"))
        .and_then(|entries| entries.as_array())
        .and_then(|entries| entries.first())
        .ok_or(SigningError::NoTlogEntries)?;

    match entry.get("logIndex") {
        Some(Value::String(s)) => s
            .parse::<i64>()
            .map_err(|e| SigningError::MalformedBundle(format!("invalid log index {:?}: {}", s, e))),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| SigningError::MalformedBundle(format!("invalid log index {}", n))),
        None if entry.get("logId").is_some() && entry.get("kindVersion").is_some() => Ok(0),
        None => Err(SigningError::MalformedBundle(
            "tlog entry has no log index".into(),
        )),
        Some(other) => Err(SigningError::MalformedBundle(format!(
            "invalid log index {}",
            other
        ))),
    }
}
