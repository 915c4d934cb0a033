//! OCI image layout reader.
//!
//! Walks `index.json` → manifest → config inside a local layout written by a
//! previous transfer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use a3s_mirror_core::error::{MirrorError, Result};
use oci_spec::image::{ImageIndex, ImageManifest};
use serde::Deserialize;

/// Label naming the directory of declarative configs inside a catalog image.
pub const INDEX_CONFIGS_LABEL: &str = "operators.operatorframework.io.index.configs.v1";

/// A local OCI image layout.
#[derive(Debug, Clone)]
pub struct OciLayout {
    root_dir: PathBuf,
}

/// The subset of an image config document the collectors read.
#[derive(Debug, Default, Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    config: Option<ContainerConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct ContainerConfig {
    #[serde(default, rename = "Labels")]
    labels: Option<HashMap<String, String>>,
}

impl OciLayout {
    /// Open a layout, checking that `index.json` is present.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root_dir = path.as_ref().to_path_buf();
        let index_path = root_dir.join("index.json");
        if !index_path.exists() {
            return Err(MirrorError::Other(format!(
                "Not a valid OCI layout: missing index.json in {}",
                root_dir.display()
            )));
        }
        Ok(Self { root_dir })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.root_dir.join("blobs").join("sha256")
    }

    /// Path of a blob given its `sha256:<hex>` digest.
    pub fn blob_path(&self, digest: &str) -> PathBuf {
        let hex = digest.strip_prefix("sha256:").unwrap_or(digest);
        self.blobs_dir().join(hex)
    }

    /// Load the image index from index.json.
    pub fn index(&self) -> Result<ImageIndex> {
        let index_path = self.root_dir.join("index.json");
        let content = std::fs::read_to_string(&index_path).map_err(|e| {
            MirrorError::Other(format!(
                "Failed to read index.json at {}: {}",
                index_path.display(),
                e
            ))
        })?;

        serde_json::from_str(&content)
            .map_err(|e| MirrorError::Other(format!("Failed to parse index.json: {}", e)))
    }

    /// Digest of the first manifest listed in the index.
    ///
    /// Only the first entry is dereferenced; the index is not matched against
    /// a platform.
    pub fn first_manifest_digest(&self) -> Result<String> {
        let index = self.index()?;
        let digest = index
            .manifests()
            .first()
            .ok_or_else(|| {
                MirrorError::Other(format!(
                    "No manifests in index.json at {}",
                    self.root_dir.display()
                ))
            })?
            .digest()
            .to_string();

        if !digest.contains("sha256") {
            return Err(MirrorError::Other(format!(
                "Manifest digest '{}' is not a sha256 digest",
                digest
            )));
        }
        Ok(digest)
    }

    /// Load an image manifest from blobs.
    pub fn manifest(&self, digest: &str) -> Result<ImageManifest> {
        let blob_path = self.blob_path(digest);
        let content = std::fs::read_to_string(&blob_path).map_err(|e| {
            MirrorError::Other(format!(
                "Failed to read manifest {}: {}",
                blob_path.display(),
                e
            ))
        })?;

        serde_json::from_str(&content)
            .map_err(|e| MirrorError::Other(format!("Failed to parse manifest {}: {}", digest, e)))
    }

    /// Load the manifest referenced by the first index entry.
    pub fn first_manifest(&self) -> Result<ImageManifest> {
        let digest = self.first_manifest_digest()?;
        self.manifest(&digest)
    }

    /// Labels of the image config referenced by `manifest`.
    pub fn config_labels(&self, manifest: &ImageManifest) -> Result<HashMap<String, String>> {
        let digest = manifest.config().digest().to_string();
        let blob_path = self.blob_path(&digest);
        let content = std::fs::read_to_string(&blob_path).map_err(|e| {
            MirrorError::Other(format!(
                "Failed to read config {}: {}",
                blob_path.display(),
                e
            ))
        })?;

        let document: ConfigDocument = serde_json::from_str(&content)
            .map_err(|e| MirrorError::Other(format!("Failed to parse config {}: {}", digest, e)))?;

        Ok(document
            .config
            .and_then(|c| c.labels)
            .unwrap_or_default())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use sha2::{Digest, Sha256};
    use tempfile::TempDir;

    fn write_blob(root: &Path, content: &[u8]) -> String {
        let hex = hex::encode(Sha256::digest(content));
        let blobs = root.join("blobs").join("sha256");
        std::fs::create_dir_all(&blobs).unwrap();
        std::fs::write(blobs.join(&hex), content).unwrap();
        format!("sha256:{}", hex)
    }

    /// Write a single-manifest layout with the given config labels and layers.
    pub(crate) fn create_oci_layout(
        root: &Path,
        labels: &[(&str, &str)],
        layers: &[Vec<u8>],
    ) -> String {
        let labels: HashMap<&str, &str> = labels.iter().copied().collect();
        let config = serde_json::json!({
            "architecture": "amd64",
            "os": "linux",
            "config": { "Labels": labels },
            "rootfs": { "type": "layers", "diff_ids": [] }
        });
        let config_bytes = serde_json::to_vec(&config).unwrap();
        let config_digest = write_blob(root, &config_bytes);

        let layer_descriptors: Vec<serde_json::Value> = layers
            .iter()
            .map(|layer| {
                let digest = write_blob(root, layer);
                serde_json::json!({
                    "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                    "digest": digest,
                    "size": layer.len()
                })
            })
            .collect();

        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": {
                "mediaType": "application/vnd.oci.image.config.v1+json",
                "digest": config_digest,
                "size": config_bytes.len()
            },
            "layers": layer_descriptors
        });
        let manifest_bytes = serde_json::to_vec(&manifest).unwrap();
        let manifest_digest = write_blob(root, &manifest_bytes);

        let index = serde_json::json!({
            "schemaVersion": 2,
            "manifests": [{
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": manifest_digest,
                "size": manifest_bytes.len()
            }]
        });
        std::fs::write(root.join("index.json"), serde_json::to_vec(&index).unwrap()).unwrap();
        std::fs::write(root.join("oci-layout"), r#"{"imageLayoutVersion":"1.0.0"}"#).unwrap();
        manifest_digest
    }

    #[test]
    fn test_open_missing_index() {
        let dir = TempDir::new().unwrap();
        assert!(OciLayout::open(dir.path()).is_err());
    }

    #[test]
    fn test_walk_index_manifest_config() {
        let dir = TempDir::new().unwrap();
        let digest = create_oci_layout(dir.path(), &[(INDEX_CONFIGS_LABEL, "/configs")], &[]);

        let layout = OciLayout::open(dir.path()).unwrap();
        assert_eq!(layout.first_manifest_digest().unwrap(), digest);

        let manifest = layout.first_manifest().unwrap();
        let labels = layout.config_labels(&manifest).unwrap();
        assert_eq!(labels.get(INDEX_CONFIGS_LABEL).map(String::as_str), Some("/configs"));
    }

    #[test]
    fn test_empty_index_is_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("index.json"),
            r#"{"schemaVersion":2,"manifests":[]}"#,
        )
        .unwrap();
        let layout = OciLayout::open(dir.path()).unwrap();
        let err = layout.first_manifest_digest().unwrap_err();
        assert!(err.to_string().contains("No manifests"));
    }

    #[test]
    fn test_non_sha256_digest_is_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("index.json"),
            r#"{"schemaVersion":2,"manifests":[{"mediaType":"application/vnd.oci.image.manifest.v1+json","digest":"md5:abc","size":1}]}"#,
        )
        .unwrap();
        let layout = OciLayout::open(dir.path()).unwrap();
        assert!(layout.first_manifest_digest().is_err());
    }

    #[test]
    fn test_blob_path() {
        let layout = OciLayout {
            root_dir: PathBuf::from("/img"),
        };
        assert_eq!(
            layout.blob_path("sha256:abc"),
            PathBuf::from("/img/blobs/sha256/abc")
        );
    }
}
