//! Image name parsing for archive paths.
//!
//! Splits references like `registry.redhat.io/ubi8/ubi@sha256:abc` into the
//! registry, namespace and component segments used to lay out local copies.

use a3s_mirror_core::error::{MirrorError, Result};

/// Registry, namespace and component of an image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageName {
    /// First segment, usually the registry host (e.g., "quay.io")
    pub repository: String,
    /// Second segment (e.g., "openshift-release-dev")
    pub namespace: String,
    /// Third segment without tag or digest (e.g., "ocp-release")
    pub component: String,
}

impl ImageName {
    /// Parse a `registry/namespace/component[:tag|@digest]` reference.
    ///
    /// A `docker://` prefix is ignored. Fewer than three `/`-separated
    /// segments is an error.
    pub fn parse(reference: &str) -> Result<Self> {
        let trimmed = reference
            .trim()
            .strip_prefix(a3s_mirror_core::work::DOCKER_PROTOCOL)
            .unwrap_or_else(|| reference.trim());

        let parts: Vec<&str> = trimmed.split('/').collect();
        if parts.len() < 3 {
            return Err(MirrorError::ImageReference(format!(
                "'{}' must have the form registry/namespace/component",
                reference
            )));
        }

        let component = strip_tag_or_digest(parts[2]);
        if parts[0].is_empty() || parts[1].is_empty() || component.is_empty() {
            return Err(MirrorError::ImageReference(format!(
                "'{}' has an empty segment",
                reference
            )));
        }

        Ok(Self {
            repository: parts[0].to_string(),
            namespace: parts[1].to_string(),
            component: component.to_string(),
        })
    }
}

/// `name:tag@digest`, `name@digest` and `name:tag` all become `name`.
fn strip_tag_or_digest(segment: &str) -> &str {
    let name = segment.split_once('@').map_or(segment, |(name, _digest)| name);
    name.split_once(':').map_or(name, |(name, _tag)| name)
}

/// Last path segment of a reference with `:` turned into `/`.
///
/// `registry.redhat.io/redhat/redhat-operator-index:v4.14` becomes
/// `redhat-operator-index/v4.14`.
pub fn catalog_path(reference: &str) -> String {
    let last = reference.rsplit('/').next().unwrap_or(reference);
    let last = last.split('@').next().unwrap_or(last);
    last.replace(':', "/")
}
