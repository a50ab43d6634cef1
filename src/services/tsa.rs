use crate::services::{ServiceOptions, TimestampAuthority, error_body, send_with_retries};
use crate::{Result, SigningError};
use async_trait::async_trait;
use der::asn1::{BitString, ObjectIdentifier, OctetString, Uint};
use der::{Any, Decode, Encode, Sequence, Tag};
use log::debug;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use sha2::{Digest, Sha256};
use spki::AlgorithmIdentifierOwned;

const SHA256_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");

/// PKIStatus values that carry a token
const STATUS_GRANTED: u8 = 0;
const STATUS_GRANTED_WITH_MODS: u8 = 1;

#[derive(Debug, Sequence)]
struct MessageImprint {
    hash_algorithm: AlgorithmIdentifierOwned,
    hashed_message: OctetString,
}

#[derive(Debug, Sequence)]
struct TimeStampReq {
    version: u8,
    message_imprint: MessageImprint,
    #[asn1(optional = "true")]
    req_policy: Option<ObjectIdentifier>,
    #[asn1(optional = "true")]
    nonce: Option<Uint>,
    #[asn1(default = "Default::default")]
    cert_req: bool,
}

#[derive(Debug, Sequence)]
struct PkiStatusInfo {
    status: u8,
    #[asn1(optional = "true")]
    status_string: Option<Vec<String>>,
    #[asn1(optional = "true")]
    fail_info: Option<BitString>,
}

#[derive(Debug, Sequence)]
struct TimeStampResp {
    status: PkiStatusInfo,
    #[asn1(optional = "true")]
    time_stamp_token: Option<Any>,
}

/// DER TimeStampReq over SHA-256(`signature`) asking for the TSA certificate
fn timestamp_request(signature: &[u8], nonce: u64) -> Result<Vec<u8>> {
    let digest = Sha256::digest(signature);
    let request = TimeStampReq {
        version: 1,
        message_imprint: MessageImprint {
            hash_algorithm: AlgorithmIdentifierOwned {
                oid: SHA256_OID,
                parameters: Some(Any::new(Tag::Null, Vec::new()).map_err(asn1_error)?),
            },
            hashed_message: OctetString::new(digest.to_vec()).map_err(asn1_error)?,
        },
        req_policy: None,
        nonce: Some(Uint::new(&nonce.to_be_bytes()).map_err(asn1_error)?),
        cert_req: true,
    };
    request.to_der().map_err(asn1_error)
}

/// Check a DER TimeStampResp was granted and carries a token
fn check_response(response: &[u8]) -> Result<()> {
    let parsed = TimeStampResp::from_der(response).map_err(|e| {
        SigningError::TimestampAuthority(format!("Failed to parse timestamp response: {}", e))
    })?;

    let status = parsed.status.status;
    if status != STATUS_GRANTED && status != STATUS_GRANTED_WITH_MODS {
        let reason = parsed
            .status
            .status_string
            .map(|s| s.join("; "))
            .unwrap_or_default();
        return Err(SigningError::TimestampAuthority(format!(
            "timestamp request rejected with status {} {}",
            status, reason
        )));
    }
    if parsed.time_stamp_token.is_none() {
        return Err(SigningError::TimestampAuthority(
            "granted response contains no timestamp token".into(),
        ));
    }
    Ok(())
}

fn asn1_error(e: der::Error) -> SigningError {
    SigningError::TimestampAuthority(format!("ASN.1 error: {}", e))
}

/// RFC 3161 timestamp authority reachable over HTTP
pub struct TsaClient {
    client: reqwest::Client,
    options: ServiceOptions,
}

impl TsaClient {
    /// `options.base_url` is the full timestamp endpoint, not a host
    pub fn new(options: ServiceOptions) -> Result<Self> {
        Ok(Self {
            client: options.http_client()?,
            options,
        })
    }
}

#[async_trait]
impl TimestampAuthority for TsaClient {
    async fn timestamp(&self, signature: &[u8]) -> Result<Vec<u8>> {
        let request = timestamp_request(signature, rand::random())?;

        let url = &self.options.base_url;
        debug!("Requesting RFC 3161 timestamp from {}", url);
        let response = send_with_retries("timestamp authority", &self.options, || {
            self.client
                .post(url)
                .header(CONTENT_TYPE, "application/timestamp-query")
                .header(ACCEPT, "application/timestamp-reply")
                .body(request.clone())
        })
        .await
        .map_err(|e| SigningError::TimestampAuthority(format!("Failed to reach {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(SigningError::TimestampAuthority(format!(
                "{} returned {}",
                url,
                error_body(response).await
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| {
                SigningError::TimestampAuthority(format!("Failed to read response from {}: {}", url, e))
            })?
            .to_vec();
        check_response(&body)?;
        Ok(body)
    }

    fn authority_type(&self) -> &'static str {
        "RFC 3161"
    }
}
