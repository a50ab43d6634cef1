use crate::trust::{SigningConfig, TrustRootSource, TrustedRoot};
use crate::{Result, SigningError};
use async_trait::async_trait;
use log::debug;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Signing config read from a local `signing_config.v0.2.json`
///
/// Useful for staging or private Sigstore deployments. The file is read again
/// on every call so a long-running process picks up edits.
pub struct FileTrustRoot {
    path: PathBuf,
    trusted_root_path: Option<PathBuf>,
}

impl FileTrustRoot {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            trusted_root_path: None,
        }
    }

    /// Also serve a local `trusted_root.json`
    pub fn with_trusted_root(mut self, path: impl AsRef<Path>) -> Self {
        self.trusted_root_path = Some(path.as_ref().to_path_buf());
        self
    }
}

async fn read(what: &str, path: &Path) -> Result<Vec<u8>> {
    debug!("Loading {} from {:?}", what, path);
    fs::read(path).await.map_err(|e| {
        SigningError::TrustRoot(format!("Failed to read {} {}: {}", what, path.display(), e))
    })
}

#[async_trait]
impl TrustRootSource for FileTrustRoot {
    async fn signing_config(&self) -> Result<SigningConfig> {
        let content = read("signing config", &self.path).await?;
        SigningConfig::from_json(&content)
    }

    async fn trusted_root(&self) -> Result<TrustedRoot> {
        let path = self.trusted_root_path.as_ref().ok_or_else(|| {
            SigningError::TrustRoot("no trusted root file configured".into())
        })?;
        let content = read("trusted root", path).await?;
        TrustedRoot::from_json(&content)
    }

    fn source_type(&self) -> &'static str {
        "File"
    }
}
