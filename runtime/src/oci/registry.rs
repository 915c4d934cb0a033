//! Registry-backed image transfer.
//!
//! Uses the `oci-distribution` crate to pull images into local OCI layouts
//! and to push local layouts to a registry.

use std::path::{Path, PathBuf};
use std::time::Duration;

use a3s_mirror_core::error::{MirrorError, Result};
use a3s_mirror_core::work::{DOCKER_PROTOCOL, OCI_PROTOCOL};
use a3s_mirror_core::TransferOptions;
use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol, Config, ImageLayer};
use oci_distribution::manifest::OciImageManifest;
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference};

use crate::cancel::CancelToken;
use crate::transfer::{ProgressSink, Transfer};

/// A transfer endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Endpoint {
    Registry(String),
    Layout(PathBuf),
}

impl Endpoint {
    fn parse(raw: &str) -> Result<Self> {
        if let Some(reference) = raw.strip_prefix(DOCKER_PROTOCOL) {
            return Ok(Self::Registry(reference.to_string()));
        }
        if let Some(path) = raw.strip_prefix(OCI_PROTOCOL) {
            let path = path.strip_prefix("//").unwrap_or(path);
            return Ok(Self::Layout(PathBuf::from(path)));
        }
        Err(MirrorError::Config(format!(
            "'{}' is not a docker:// or oci: location",
            raw
        )))
    }
}

/// Copies images between registries and local OCI layouts.
///
/// Registry access is anonymous.
pub struct RegistryTransfer {
    verified: Client,
    unverified: Client,
}

impl RegistryTransfer {
    pub fn new() -> Self {
        Self {
            verified: Self::client(false),
            unverified: Self::client(true),
        }
    }

    fn client(accept_invalid_certificates: bool) -> Client {
        Client::new(ClientConfig {
            protocol: ClientProtocol::Https,
            accept_invalid_certificates,
            ..Default::default()
        })
    }

    fn client_for(&self, tls_verify: bool) -> &Client {
        if tls_verify {
            &self.verified
        } else {
            &self.unverified
        }
    }

    async fn copy_once(
        &self,
        source: &Endpoint,
        destination: &Endpoint,
        options: &TransferOptions,
        progress: &dyn ProgressSink,
    ) -> Result<()> {
        match (source, destination) {
            (Endpoint::Registry(reference), Endpoint::Layout(path)) => {
                let client = self.client_for(options.src_tls_verify);
                pull(client, &parse_reference(reference)?, path, progress).await
            }
            (Endpoint::Layout(path), Endpoint::Registry(reference)) => {
                let client = self.client_for(options.dest_tls_verify);
                push(client, path, &parse_reference(reference)?, progress).await
            }
            _ => Err(MirrorError::Other(
                "only registry to layout and layout to registry copies are supported".to_string(),
            )),
        }
    }
}

impl Default for RegistryTransfer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transfer for RegistryTransfer {
    async fn transfer(
        &self,
        cancel: &CancelToken,
        source: &str,
        destination: &str,
        options: &TransferOptions,
        progress: &dyn ProgressSink,
    ) -> Result<()> {
        let failed = |message: String| MirrorError::Transfer {
            from: source.to_string(),
            to: destination.to_string(),
            message,
        };

        let src = Endpoint::parse(source).map_err(|e| failed(e.to_string()))?;
        let dest = Endpoint::parse(destination).map_err(|e| failed(e.to_string()))?;

        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                result = self.copy_once(&src, &dest, options, progress) => result,
                _ = cancel.cancelled() => return Err(failed("cancelled".to_string())),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) if attempt < options.retries => {
                    attempt += 1;
                    tracing::warn!(
                        source = %source,
                        attempt,
                        error = %e,
                        "Transfer failed, retrying"
                    );
                    progress.report(&format!("retry {} after error: {}", attempt, e));
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(1 << attempt.min(5))) => {}
                        _ = cancel.cancelled() => return Err(failed("cancelled".to_string())),
                    }
                }
                Err(e) => return Err(failed(e.to_string())),
            }
        }
    }
}

fn parse_reference(reference: &str) -> Result<Reference> {
    reference.parse::<Reference>().map_err(|e| {
        MirrorError::ImageReference(format!("'{}': {}", reference, e))
    })
}

fn registry_error(reference: &Reference, message: String) -> MirrorError {
    MirrorError::Registry {
        registry: reference.registry().to_string(),
        message,
    }
}

/// Pull an image and write it as an OCI image layout to `target_dir`.
async fn pull(
    client: &Client,
    reference: &Reference,
    target_dir: &Path,
    progress: &dyn ProgressSink,
) -> Result<()> {
    tracing::debug!(
        reference = %reference,
        target = %target_dir.display(),
        "Pulling image into layout"
    );

    // Resolves multi-arch indexes to the default platform
    let auth = RegistryAuth::Anonymous;
    let (manifest, manifest_digest) = client
        .pull_image_manifest(reference, &auth)
        .await
        .map_err(|e| registry_error(reference, format!("Failed to pull manifest: {}", e)))?;
    progress.report(&format!("manifest {}", manifest_digest));

    let blobs_dir = target_dir.join("blobs").join("sha256");
    std::fs::create_dir_all(&blobs_dir)?;

    let manifest_json = serde_json::to_vec(&manifest)?;
    std::fs::write(blobs_dir.join(hex_of(&manifest_digest)), &manifest_json)?;

    let mut config_data: Vec<u8> = Vec::new();
    client
        .pull_blob(reference, &manifest.config, &mut config_data)
        .await
        .map_err(|e| registry_error(reference, format!("Failed to pull config blob: {}", e)))?;
    std::fs::write(blobs_dir.join(hex_of(&manifest.config.digest)), &config_data)?;

    for layer in &manifest.layers {
        if blobs_dir.join(hex_of(&layer.digest)).exists() {
            continue;
        }
        let mut layer_data: Vec<u8> = Vec::new();
        client
            .pull_blob(reference, layer, &mut layer_data)
            .await
            .map_err(|e| {
                registry_error(reference, format!("Failed to pull layer {}: {}", layer.digest, e))
            })?;
        std::fs::write(blobs_dir.join(hex_of(&layer.digest)), &layer_data)?;
        progress.report(&format!("layer {} ({} bytes)", layer.digest, layer_data.len()));
    }

    std::fs::write(
        target_dir.join("oci-layout"),
        r#"{"imageLayoutVersion":"1.0.0"}"#,
    )?;

    let index = serde_json::json!({
        "schemaVersion": 2,
        "manifests": [{
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "digest": manifest_digest,
            "size": manifest_json.len()
        }]
    });
    std::fs::write(
        target_dir.join("index.json"),
        serde_json::to_string_pretty(&index)?,
    )?;

    tracing::info!(
        reference = %reference,
        digest = %manifest_digest,
        "Image copied to layout"
    );
    Ok(())
}

/// Push the first image of the layout at `image_dir` to `reference`.
async fn push(
    client: &Client,
    image_dir: &Path,
    reference: &Reference,
    progress: &dyn ProgressSink,
) -> Result<()> {
    tracing::debug!(
        reference = %reference,
        source = %image_dir.display(),
        "Pushing layout to registry"
    );

    let index_data = std::fs::read_to_string(image_dir.join("index.json"))?;
    let index: serde_json::Value = serde_json::from_str(&index_data)?;
    let manifest_digest = index["manifests"][0]["digest"]
        .as_str()
        .ok_or_else(|| MirrorError::Other("No manifest digest in index.json".to_string()))?;

    let blobs_dir = image_dir.join("blobs").join("sha256");
    let manifest_data = std::fs::read(blobs_dir.join(hex_of(manifest_digest)))?;
    let manifest: OciImageManifest = serde_json::from_slice(&manifest_data)?;

    let config_data = std::fs::read(blobs_dir.join(hex_of(&manifest.config.digest)))?;
    let config = Config::new(config_data, manifest.config.media_type.clone(), None);

    let mut layers = Vec::new();
    for layer_desc in &manifest.layers {
        let layer_data = std::fs::read(blobs_dir.join(hex_of(&layer_desc.digest)))?;
        layers.push(ImageLayer::new(
            layer_data,
            layer_desc.media_type.clone(),
            None,
        ));
    }
    progress.report(&format!("pushing {} layers", layers.len()));

    let auth = RegistryAuth::Anonymous;
    let response = client
        .push(reference, &layers, config, &auth, Some(manifest))
        .await
        .map_err(|e| registry_error(reference, format!("Failed to push image: {}", e)))?;

    tracing::info!(
        reference = %reference,
        manifest_url = %response.manifest_url,
        "Image pushed"
    );
    Ok(())
}

fn hex_of(digest: &str) -> &str {
    digest.strip_prefix("sha256:").unwrap_or(digest)
}
