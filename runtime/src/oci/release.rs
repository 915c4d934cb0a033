//! Release payload reader.
//!
//! A release payload image carries `release-manifests/image-references`, an
//! ImageStream document listing every component image of the release by tag.
//! The payload config may relocate the manifests directory with the
//! [`RELEASE_MANIFESTS_LABEL`] label.

use std::collections::HashMap;
use std::path::Path;

use a3s_mirror_core::error::{MirrorError, Result};
use serde::Deserialize;

use super::catalog::RelatedImage;

/// Layer subtree holding the release manifests when the payload is unlabelled.
pub const RELEASE_MANIFESTS_DIR: &str = "release-manifests";

/// Config label naming the release manifests directory.
pub const RELEASE_MANIFESTS_LABEL: &str = "io.openshift.release.manifests";

/// File inside the release manifests listing component images.
pub const IMAGE_REFERENCES_FILE: &str = "image-references";

#[derive(Debug, Deserialize)]
struct ImageStream {
    #[serde(default)]
    spec: ImageStreamSpec,
}

#[derive(Debug, Default, Deserialize)]
struct ImageStreamSpec {
    #[serde(default)]
    tags: Vec<TagReference>,
}

#[derive(Debug, Deserialize)]
struct TagReference {
    name: String,
    #[serde(default)]
    from: Option<ObjectReference>,
}

#[derive(Debug, Deserialize)]
struct ObjectReference {
    name: String,
}

/// Layer path of the release manifests for a payload with config `labels`.
pub fn release_manifests_dir(labels: &HashMap<String, String>) -> String {
    labels
        .get(RELEASE_MANIFESTS_LABEL)
        .map(|dir| dir.trim_matches('/'))
        .filter(|dir| !dir.is_empty())
        .unwrap_or(RELEASE_MANIFESTS_DIR)
        .to_string()
}

/// Component images declared by an extracted release payload.
///
/// `manifests_dir` is the extracted manifests directory; tags without a
/// `from` reference are skipped.
pub fn read_image_references(manifests_dir: &Path) -> Result<Vec<RelatedImage>> {
    let path = manifests_dir.join(IMAGE_REFERENCES_FILE);
    let content = std::fs::read_to_string(&path).map_err(|e| {
        MirrorError::collection(
            "release",
            format!("failed to read {}: {}", path.display(), e),
        )
    })?;

    let stream: ImageStream = serde_json::from_str(&content).map_err(|e| {
        MirrorError::collection(
            "release",
            format!("failed to parse {}: {}", path.display(), e),
        )
    })?;

    Ok(stream
        .spec
        .tags
        .into_iter()
        .filter_map(|tag| {
            tag.from.map(|from| RelatedImage {
                name: tag.name,
                image: from.name,
            })
        })
        .collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn image_references(tags: &[(&str, &str)]) -> String {
        let tags: Vec<serde_json::Value> = tags
            .iter()
            .map(|(name, image)| {
                serde_json::json!({
                    "name": name,
                    "from": { "kind": "DockerImage", "name": image }
                })
            })
            .collect();
        serde_json::json!({
            "kind": "ImageStream",
            "apiVersion": "image.openshift.io/v1",
            "spec": { "tags": tags }
        })
        .to_string()
    }

    #[test]
    fn test_read_image_references() {
        let dir = TempDir::new().unwrap();
        let manifests = dir.path().join(RELEASE_MANIFESTS_DIR);
        std::fs::create_dir_all(&manifests).unwrap();
        std::fs::write(
            manifests.join(IMAGE_REFERENCES_FILE),
            image_references(&[
                ("cli", "quay.io/ocp/release@sha256:111"),
                ("etcd", "quay.io/ocp/release@sha256:222"),
            ]),
        )
        .unwrap();

        let images = read_image_references(&manifests).unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].name, "cli");
        assert_eq!(images[1].image, "quay.io/ocp/release@sha256:222");
    }

    #[test]
    fn test_tag_without_source_skipped() {
        let dir = TempDir::new().unwrap();
        let manifests = dir.path().join(RELEASE_MANIFESTS_DIR);
        std::fs::create_dir_all(&manifests).unwrap();
        std::fs::write(
            manifests.join(IMAGE_REFERENCES_FILE),
            r#"{"spec":{"tags":[{"name":"cli"}]}}"#,
        )
        .unwrap();
        assert!(read_image_references(&manifests).unwrap().is_empty());
    }

    #[test]
    fn test_missing_file_is_collection_error() {
        let dir = TempDir::new().unwrap();
        let err = read_image_references(dir.path()).unwrap_err();
        assert!(matches!(err, MirrorError::Collection { .. }));
    }

    #[test]
    fn test_release_manifests_dir_from_label() {
        let mut labels = HashMap::new();
        assert_eq!(release_manifests_dir(&labels), RELEASE_MANIFESTS_DIR);

        labels.insert(RELEASE_MANIFESTS_LABEL.to_string(), "/manifests/".to_string());
        assert_eq!(release_manifests_dir(&labels), "manifests");

        labels.insert(RELEASE_MANIFESTS_LABEL.to_string(), "/".to_string());
        assert_eq!(release_manifests_dir(&labels), RELEASE_MANIFESTS_DIR);
    }
}
