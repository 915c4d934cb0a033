//! Release signature fetch, verification and caching.
//!
//! Run once per resolved release digest. Verification failures are logged,
//! never fatal, and the signature is cached whatever the verdict.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use a3s_mirror_core::digest::digest_hex;
use a3s_mirror_core::error::{MirrorError, Result};

/// Where release signatures are published.
pub const SIGNATURE_BASE_URL: &str =
    "https://mirror.openshift.com/pub/openshift-v4/signatures/openshift/release";

/// Checks a detached release signature against the trusted release key.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, digest_hex: &str, signature: &[u8]) -> Result<()>;
}

/// Accepts any non-empty signature document.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonEmptySignature;

impl SignatureVerifier for NonEmptySignature {
    fn verify(&self, digest_hex: &str, signature: &[u8]) -> Result<()> {
        if signature.is_empty() {
            return Err(MirrorError::Other(format!(
                "empty signature for sha256:{}",
                digest_hex
            )));
        }
        Ok(())
    }
}

/// Verdict for one release image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureOutcome {
    Verified,
    Rejected,
}

/// Post-resolution signature step.
#[async_trait]
pub trait ReleaseSignatures: Send + Sync {
    /// Fetch-if-absent, verify and cache the signature of `image`.
    async fn verify_and_cache(&self, image: &str) -> Result<SignatureOutcome>;
}

/// Signature cache under `<archive>/signatures`, filled over HTTP.
pub struct SignatureStore {
    http: reqwest::Client,
    base_url: String,
    dir: PathBuf,
    verifier: Arc<dyn SignatureVerifier>,
}

impl SignatureStore {
    pub fn new(dir: impl Into<PathBuf>, verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: SIGNATURE_BASE_URL.to_string(),
            dir: dir.into(),
            verifier,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch(&self, hex: &str) -> Result<Vec<u8>> {
        let url = format!("{}/sha256={}/signature-1", self.base_url, hex);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| MirrorError::Other(format!("failed to fetch {}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(MirrorError::Other(format!(
                "failed to fetch {}: {}",
                url,
                response.status()
            )));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| MirrorError::Other(format!("failed to read {}: {}", url, e)))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl ReleaseSignatures for SignatureStore {
    async fn verify_and_cache(&self, image: &str) -> Result<SignatureOutcome> {
        let hex = digest_hex(image).ok_or_else(|| {
            MirrorError::Other(format!("release image {} is not pinned by digest", image))
        })?;
        let cached = self.dir.join(hex);

        let signature = if cached.exists() {
            tokio::fs::read(&cached).await?
        } else {
            self.fetch(hex).await?
        };

        let outcome = match self.verifier.verify(hex, &signature) {
            Ok(()) => {
                tracing::info!(digest = %hex, "Release signature verified");
                SignatureOutcome::Verified
            }
            Err(e) => {
                tracing::warn!(digest = %hex, error = %e, "Release signature rejected");
                SignatureOutcome::Rejected
            }
        };

        if !cached.exists() {
            tokio::fs::create_dir_all(&self.dir).await?;
            tokio::fs::write(&cached, &signature).await?;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> SignatureStore {
        SignatureStore::new(dir.path().join("signatures"), Arc::new(NonEmptySignature))
            .with_base_url("http://127.0.0.1:1")
    }

    #[tokio::test]
    async fn test_cached_signature_is_not_fetched() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("signatures")).unwrap();
        std::fs::write(dir.path().join("signatures/abc"), b"signature").unwrap();

        let outcome = store(&dir)
            .verify_and_cache("quay.io/ocp/release@sha256:abc")
            .await
            .unwrap();
        assert_eq!(outcome, SignatureOutcome::Verified);
    }

    #[tokio::test]
    async fn test_rejected_signature_stays_cached() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("signatures")).unwrap();
        std::fs::write(dir.path().join("signatures/abc"), b"").unwrap();

        let outcome = store(&dir)
            .verify_and_cache("quay.io/ocp/release@sha256:abc")
            .await
            .unwrap();
        assert_eq!(outcome, SignatureOutcome::Rejected);
        assert!(dir.path().join("signatures/abc").exists());
    }

    #[tokio::test]
    async fn test_unpinned_image_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir)
            .verify_and_cache("quay.io/ocp/release:4.14")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir)
            .verify_and_cache("quay.io/ocp/release@sha256:def")
            .await
            .is_err());
    }
}
