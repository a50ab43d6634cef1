use crate::bundle::{
    Checkpoint, InclusionPromise, InclusionProof, KindVersion, LogId, TransparencyLogEntry,
};
use crate::services::{ServiceOptions, TransparencyLog, error_body, send_with_retries};
use crate::{Result, SigningError};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use log::debug;
use pem::{EncodeConfig, LineEnding, Pem};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const ENTRY_KIND: &str = "hashedrekord";
const ENTRY_VERSION: &str = "0.0.1";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProposedEntry {
    kind: &'static str,
    api_version: &'static str,
    spec: HashedRekordSpec,
}

#[derive(Debug, Serialize)]
struct HashedRekordSpec {
    signature: EntrySignature,
    data: EntryData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EntrySignature {
    content: String,
    public_key: EntryPublicKey,
}

#[derive(Debug, Serialize)]
struct EntryPublicKey {
    content: String,
}

#[derive(Debug, Serialize)]
struct EntryData {
    hash: EntryHash,
}

#[derive(Debug, Serialize)]
struct EntryHash {
    algorithm: &'static str,
    value: String,
}

/// One value of the `{uuid: entry}` map Rekor answers with
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogEntry {
    body: String,
    integrated_time: i64,
    #[serde(rename = "logID")]
    log_id: String,
    log_index: i64,
    verification: Option<Verification>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Verification {
    inclusion_proof: Option<RekorInclusionProof>,
    signed_entry_timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RekorInclusionProof {
    checkpoint: String,
    hashes: Vec<String>,
    log_index: i64,
    root_hash: String,
    tree_size: i64,
}

/// Client for a Rekor v1 transparency log
pub struct RekorClient {
    client: reqwest::Client,
    options: ServiceOptions,
}

impl RekorClient {
    pub fn new(options: ServiceOptions) -> Result<Self> {
        Ok(Self {
            client: options.http_client()?,
            options,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/v1/log/entries", self.options.base_url)
    }
}

fn proposed_entry(
    signature: &[u8],
    certificate_der: &[u8],
    payload_digest: &[u8; 32],
) -> ProposedEntry {
    let certificate_pem = pem::encode_config(
        &Pem::new("CERTIFICATE", certificate_der.to_vec()),
        EncodeConfig::new().set_line_ending(LineEnding::LF),
    );

    ProposedEntry {
        kind: ENTRY_KIND,
        api_version: ENTRY_VERSION,
        spec: HashedRekordSpec {
            signature: EntrySignature {
                content: BASE64.encode(signature),
                public_key: EntryPublicKey {
                    content: BASE64.encode(certificate_pem),
                },
            },
            data: EntryData {
                hash: EntryHash {
                    algorithm: "sha256",
                    value: hex::encode(payload_digest),
                },
            },
        },
    }
}

fn hex_to_base64(field: &str, value: &str) -> Result<String> {
    let bytes = hex::decode(value).map_err(|e| {
        SigningError::TransparencyLog(format!("{} is not valid hex: {}", field, e))
    })?;
    Ok(BASE64.encode(bytes))
}

/// Convert a Rekor v1 entry into its bundle form, requiring an inclusion proof
fn into_bundle_entry(entry: LogEntry) -> Result<TransparencyLogEntry> {
    let verification = entry.verification.ok_or_else(|| {
        SigningError::TransparencyLog("entry has no verification data".into())
    })?;
    let proof = verification.inclusion_proof.ok_or_else(|| {
        SigningError::TransparencyLog("entry has no inclusion proof".into())
    })?;

    let hashes = proof
        .hashes
        .iter()
        .map(|h| hex_to_base64("inclusion proof hash", h))
        .collect::<Result<Vec<_>>>()?;

    Ok(TransparencyLogEntry {
        log_index: entry.log_index.to_string(),
        log_id: LogId {
            key_id: hex_to_base64("logID", &entry.log_id)?,
        },
        kind_version: KindVersion {
            kind: ENTRY_KIND.to_string(),
            version: ENTRY_VERSION.to_string(),
        },
        integrated_time: entry.integrated_time.to_string(),
        inclusion_promise: verification
            .signed_entry_timestamp
            .map(|set| InclusionPromise {
                signed_entry_timestamp: set,
            }),
        inclusion_proof: Some(InclusionProof {
            log_index: proof.log_index.to_string(),
            root_hash: hex_to_base64("rootHash", &proof.root_hash)?,
            tree_size: proof.tree_size.to_string(),
            hashes,
            checkpoint: Checkpoint {
                envelope: proof.checkpoint,
            },
        }),
        canonicalized_body: entry.body,
    })
}

#[async_trait]
impl TransparencyLog for RekorClient {
    async fn submit(
        &self,
        signature: &[u8],
        certificate_der: &[u8],
        payload_digest: &[u8; 32],
    ) -> Result<TransparencyLogEntry> {
        let request = proposed_entry(signature, certificate_der, payload_digest);

        let url = self.endpoint();
        debug!("Uploading hashedrekord entry to {}", url);
        let response = send_with_retries("rekor", &self.options, || {
            self.client
                .post(&url)
                .header(CONTENT_TYPE, "application/json")
                .header(ACCEPT, "application/json")
                .json(&request)
        })
        .await
        .map_err(|e| SigningError::TransparencyLog(format!("Failed to reach {}: {}", url, e)))?;

        if response.status() != StatusCode::CREATED {
            return Err(SigningError::TransparencyLog(format!(
                "Rekor returned {}",
                error_body(response).await
            )));
        }

        let entries: HashMap<String, LogEntry> = response.json().await.map_err(|e| {
            SigningError::TransparencyLog(format!("Failed to parse response from {}: {}", url, e))
        })?;
        let (uuid, entry) = entries.into_iter().next().ok_or_else(|| {
            SigningError::TransparencyLog("no entry returned in response".into())
        })?;
        debug!("Rekor entry {} at index {}", uuid, entry.log_index);

        into_bundle_entry(entry)
    }

    fn log_type(&self) -> &'static str {
        "Rekor"
    }
}
