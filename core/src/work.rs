//! Copy work items.

use serde::{Deserialize, Serialize};

/// Registry transport prefix.
pub const DOCKER_PROTOCOL: &str = "docker://";

/// Local OCI layout transport prefix.
pub const OCI_PROTOCOL: &str = "oci:";

/// A single protocol-qualified copy from `source` to `destination`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CopyWorkItem {
    pub source: String,
    pub destination: String,
}

impl CopyWorkItem {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

impl std::fmt::Display for CopyWorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.source, self.destination)
    }
}
