use thiserror::Error;

/// A3S Mirror error types
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Malformed declarative input or invalid flag combination
    #[error("Configuration error: {0}")]
    Config(String),

    /// Upgrade graph or version failure for a single channel
    #[error("Resolution error: {channel} - {message}")]
    Resolution { channel: String, message: String },

    /// Missing or malformed OCI index, manifest or catalog
    #[error("Collection error: {collector} - {message}")]
    Collection { collector: String, message: String },

    /// A single image copy failed
    #[error("Transfer failed: {from} -> {to}: {message}")]
    Transfer {
        from: String,
        to: String,
        message: String,
    },

    /// One or more copies in a batch failed
    #[error("{failed} transfer(s) failed in batch {batch}, refer to logs for details")]
    Batch { failed: usize, batch: usize },

    /// Configuration drift between the archive and registry passes
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Image reference could not be parsed
    #[error("Invalid image reference: {0}")]
    ImageReference(String),

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    Registry { registry: String, message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl MirrorError {
    /// Shorthand for a collection error attributed to `collector`.
    pub fn collection(collector: &str, message: impl Into<String>) -> Self {
        MirrorError::Collection {
            collector: collector.to_string(),
            message: message.into(),
        }
    }

    /// Shorthand for a resolution error attributed to `channel`.
    pub fn resolution(channel: &str, message: impl Into<String>) -> Self {
        MirrorError::Resolution {
            channel: channel.to_string(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(err: serde_json::Error) -> Self {
        MirrorError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for MirrorError {
    fn from(err: serde_yaml::Error) -> Self {
        MirrorError::Serialization(err.to_string())
    }
}

/// Result type alias for A3S Mirror operations
pub type Result<T> = std::result::Result<T, MirrorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = MirrorError::Config("--from is required".to_string());
        assert_eq!(error.to_string(), "Configuration error: --from is required");
    }

    #[test]
    fn test_resolution_error_display() {
        let error = MirrorError::resolution("stable-4.14", "no versions found");
        assert_eq!(
            error.to_string(),
            "Resolution error: stable-4.14 - no versions found"
        );
    }

    #[test]
    fn test_collection_error_display() {
        let error = MirrorError::collection("operator", "no manifests in index");
        assert_eq!(
            error.to_string(),
            "Collection error: operator - no manifests in index"
        );
    }

    #[test]
    fn test_transfer_error_display() {
        let error = MirrorError::Transfer {
            from: "docker://quay.io/a/b".to_string(),
            to: "oci:/tmp/b".to_string(),
            message: "timeout".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Transfer failed: docker://quay.io/a/b -> oci:/tmp/b: timeout"
        );
    }

    #[test]
    fn test_batch_error_display() {
        let error = MirrorError::Batch { failed: 1, batch: 2 };
        assert_eq!(
            error.to_string(),
            "1 transfer(s) failed in batch 2, refer to logs for details"
        );
    }

    #[test]
    fn test_consistency_error_display() {
        let error = MirrorError::Consistency("configuration changed".to_string());
        assert_eq!(error.to_string(), "Consistency error: configuration changed");
    }

    #[test]
    fn test_registry_error_display() {
        let error = MirrorError::Registry {
            registry: "quay.io".to_string(),
            message: "unauthorized".to_string(),
        };
        assert_eq!(error.to_string(), "Registry error: quay.io - unauthorized");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let error: MirrorError = io_error.into();
        assert!(error.to_string().starts_with("I/O error:"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let error: MirrorError = json_err.into();
        assert!(error.to_string().starts_with("Serialization error:"));
    }

    #[test]
    fn test_serde_yaml_error_conversion() {
        let yaml_err = serde_yaml::from_str::<Vec<String>>("key: value").unwrap_err();
        let error: MirrorError = yaml_err.into();
        assert!(matches!(error, MirrorError::Serialization(_)));
    }
}
