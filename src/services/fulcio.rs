use crate::services::{
    CertificateIssuer, IssuedCertificate, ServiceOptions, error_body, send_with_retries,
};
use crate::{Result, SigningError};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use log::debug;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use x509_parser::prelude::{FromDer, GeneralName, ParsedExtension, X509Certificate};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SigningCertificateRequest<'a> {
    credentials: Credentials<'a>,
    public_key_request: PublicKeyRequest<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Credentials<'a> {
    oidc_identity_token: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PublicKeyRequest<'a> {
    public_key: PublicKey<'a>,
    proof_of_possession: String,
}

#[derive(Debug, Serialize)]
struct PublicKey<'a> {
    algorithm: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SigningCertificateResponse {
    signed_certificate_embedded_sct: Option<SignedCertificate>,
    signed_certificate_detached_sct: Option<SignedCertificate>,
}

#[derive(Debug, Deserialize)]
struct SignedCertificate {
    chain: CertificateChain,
}

#[derive(Debug, Deserialize)]
struct CertificateChain {
    certificates: Vec<String>,
}

/// Client for the Fulcio v2 certificate authority
pub struct FulcioClient {
    client: reqwest::Client,
    options: ServiceOptions,
}

impl FulcioClient {
    pub fn new(options: ServiceOptions) -> Result<Self> {
        Ok(Self {
            client: options.http_client()?,
            options,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/v2/signingCert", self.options.base_url)
    }
}

#[async_trait]
impl CertificateIssuer for FulcioClient {
    async fn issue(
        &self,
        identity_token: &str,
        public_key_pem: &str,
        proof_of_possession: &[u8],
    ) -> Result<IssuedCertificate> {
        let request = SigningCertificateRequest {
            credentials: Credentials {
                oidc_identity_token: identity_token,
            },
            public_key_request: PublicKeyRequest {
                public_key: PublicKey {
                    algorithm: "ECDSA",
                    content: public_key_pem,
                },
                proof_of_possession: BASE64.encode(proof_of_possession),
            },
        };

        let url = self.endpoint();
        debug!("Requesting signing certificate from {}", url);
        let response = send_with_retries("fulcio", &self.options, || {
            self.client
                .post(&url)
                .header(CONTENT_TYPE, "application/json")
                .header(AUTHORIZATION, format!("Bearer {}", identity_token))
                .json(&request)
        })
        .await
        .map_err(|e| SigningError::CertificateIssuer(format!("Failed to reach {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(SigningError::CertificateIssuer(format!(
                "Fulcio returned {}",
                error_body(response).await
            )));
        }

        let body: SigningCertificateResponse = response.json().await.map_err(|e| {
            SigningError::CertificateIssuer(format!("Failed to parse response from {}: {}", url, e))
        })?;
        let signed = body
            .signed_certificate_embedded_sct
            .or(body.signed_certificate_detached_sct)
            .ok_or_else(|| {
                SigningError::CertificateIssuer("response contains no certificate".into())
            })?;

        let mut chain = Vec::with_capacity(signed.chain.certificates.len());
        for pem_cert in &signed.chain.certificates {
            let parsed = pem::parse(pem_cert).map_err(|e| {
                SigningError::CertificateIssuer(format!("Failed to parse PEM certificate: {}", e))
            })?;
            chain.push(parsed.into_contents());
        }

        let issued = IssuedCertificate::new(chain)?;
        if let Some(identity) = leaf_identity(issued.leaf()) {
            debug!("Fulcio issued certificate for {}", identity);
        }
        Ok(issued)
    }

    fn issuer_type(&self) -> &'static str {
        "Fulcio"
    }
}

/// First SAN of the leaf, used only for logging
fn leaf_identity(der: &[u8]) -> Option<String> {
    let (_, cert) = X509Certificate::from_der(der).ok()?;
    for ext in cert.extensions() {
        if let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() {
            for name in &san.general_names {
                match name {
                    GeneralName::URI(uri) => return Some(uri.to_string()),
                    GeneralName::RFC822Name(email) => return Some(email.to_string()),
                    _ => {}
                }
            }
        }
    }
    None
}
