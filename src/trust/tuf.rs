use crate::trust::{SigningConfig, TrustRootSource, TrustedRoot};
use crate::{Result, SigningError};
use async_trait::async_trait;
use futures::TryStreamExt;
use log::debug;
use tough::{ExpirationEnforcement, Repository, RepositoryLoader, TargetName};
use url::Url;

pub const DEFAULT_TUF_MIRROR: &str = "https://tuf-repo-cdn.sigstore.dev";
pub const SIGNING_CONFIG_TARGET: &str = "signing_config.v0.2.json";
pub const TRUSTED_ROOT_TARGET: &str = "trusted_root.json";

/// Initial root of the public-good Sigstore TUF repository
const SIGSTORE_ROOT: &[u8] = include_bytes!("sigstore_root.json");

/// Trust material distributed through a Sigstore TUF repository
///
/// Every call loads the repository afresh: the root chain is walked from the
/// embedded root, then timestamp, snapshot and targets are checked for
/// signature threshold, version and expiry before any target is read.
pub struct TufTrustRoot {
    root: Vec<u8>,
    mirror: String,
}

impl TufTrustRoot {
    pub fn new() -> Result<Self> {
        Self::with_mirror(DEFAULT_TUF_MIRROR)
    }

    pub fn with_mirror(mirror: impl Into<String>) -> Result<Self> {
        let mirror = mirror.into().trim_end_matches('/').to_string();
        // Fail on a bad URL here rather than at first use
        repository_urls(&mirror)?;

        Ok(Self {
            root: SIGSTORE_ROOT.to_vec(),
            mirror,
        })
    }

    /// Trust `root_json` instead of the embedded Sigstore root
    pub fn with_root(mut self, root_json: impl Into<Vec<u8>>) -> Self {
        self.root = root_json.into();
        self
    }

    async fn load_repository(&self) -> Result<Repository> {
        let (metadata_base, targets_base) = repository_urls(&self.mirror)?;
        debug!("Loading TUF repository from {}", metadata_base);

        RepositoryLoader::new(&self.root, metadata_base, targets_base)
            .expiration_enforcement(ExpirationEnforcement::Safe)
            .load()
            .await
            .map_err(|e| {
                SigningError::TrustRoot(format!(
                    "Failed to load TUF repository {}: {}",
                    self.mirror, e
                ))
            })
    }

    /// Download a target whose length and hashes match the signed targets role
    pub async fn fetch_target(&self, name: &str) -> Result<Vec<u8>> {
        let repository = self.load_repository().await?;
        let target = TargetName::new(name)
            .map_err(|e| SigningError::TrustRoot(format!("invalid target name {}: {}", name, e)))?;

        let stream = repository
            .read_target(&target)
            .await
            .map_err(|e| SigningError::TrustRoot(format!("Failed to read target {}: {}", name, e)))?
            .ok_or_else(|| SigningError::TrustRoot(format!("target {} not found", name)))?;

        let chunks: Vec<_> = stream.try_collect().await.map_err(|e| {
            SigningError::TrustRoot(format!("Failed to download target {}: {}", name, e))
        })?;
        debug!("Fetched TUF target {}", name);

        Ok(chunks.concat())
    }
}

fn repository_urls(mirror: &str) -> Result<(Url, Url)> {
    let parse = |url: String| {
        Url::parse(&url)
            .map_err(|e| SigningError::TrustRoot(format!("invalid TUF mirror {}: {}", url, e)))
    };
    Ok((
        parse(format!("{}/", mirror))?,
        parse(format!("{}/targets/", mirror))?,
    ))
}

#[async_trait]
impl TrustRootSource for TufTrustRoot {
    async fn signing_config(&self) -> Result<SigningConfig> {
        let content = self.fetch_target(SIGNING_CONFIG_TARGET).await?;
        SigningConfig::from_json(&content)
    }

    async fn trusted_root(&self) -> Result<TrustedRoot> {
        let content = self.fetch_target(TRUSTED_ROOT_TARGET).await?;
        TrustedRoot::from_json(&content)
    }

    fn source_type(&self) -> &'static str {
        "TUF"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_root_is_a_root_role() {
        let root: serde_json::Value = serde_json::from_slice(SIGSTORE_ROOT).unwrap();
        assert_eq!(root["signed"]["_type"], "root");
        assert!(!root["signatures"].as_array().unwrap().is_empty());
    }

    #[test]
    fn repository_urls_end_with_slash() {
        let (metadata, targets) = repository_urls("https://tuf.example").unwrap();
        assert_eq!(metadata.as_str(), "https://tuf.example/");
        assert_eq!(targets.as_str(), "https://tuf.example/targets/");
    }

    #[test]
    fn rejects_unparseable_mirror() {
        assert!(matches!(
            TufTrustRoot::with_mirror("not a url"),
            Err(SigningError::TrustRoot(_))
        ));
    }
}
