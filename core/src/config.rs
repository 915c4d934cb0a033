//! Declarative image set configuration.
//!
//! The operator-authored YAML document describing what to mirror: platform
//! release channels, operator catalogs and plain additional images.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MirrorError, Result};

/// Expected value of the `kind` field.
pub const IMAGE_SET_CONFIGURATION_KIND: &str = "ImageSetConfiguration";

/// Architecture mirrored when none is declared.
pub const DEFAULT_ARCHITECTURE: &str = "amd64";

/// Top-level declarative configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSetConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default)]
    pub mirror: Mirror,
}

/// What to mirror.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mirror {
    #[serde(default)]
    pub platform: Platform,

    #[serde(default)]
    pub operators: Vec<Operator>,

    #[serde(default)]
    pub additional_images: Vec<AdditionalImage>,
}

/// Release payload selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Platform {
    #[serde(default)]
    pub architectures: Vec<String>,

    #[serde(default)]
    pub channels: Vec<ReleaseChannel>,
}

/// Kind of release stream a channel belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    #[default]
    Ocp,
    Okd,
    /// Any other value; rejected per channel by the resolver
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ocp => write!(f, "ocp"),
            Self::Okd => write!(f, "okd"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A named release channel with optional version bounds.
///
/// Empty bounds are resolved against the upgrade graph and written back for
/// the rest of the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseChannel {
    pub name: String,

    #[serde(default, rename = "type")]
    pub channel_type: ChannelType,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub min_version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub max_version: String,

    #[serde(default)]
    pub full: bool,

    #[serde(default)]
    pub shortest_path: bool,
}

impl ReleaseChannel {
    /// Only the channel head is mirrored when the channel is not full.
    pub fn heads_only(&self) -> bool {
        !self.full
    }
}

/// An operator catalog and an optional package filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operator {
    pub catalog: String,

    #[serde(default)]
    pub packages: Vec<OperatorPackage>,
}

/// A package restriction within a catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorPackage {
    pub name: String,

    #[serde(default)]
    pub channels: Vec<OperatorChannel>,
}

/// A channel restriction within a package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorChannel {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub min_version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub max_version: String,
}

/// A plain image reference to mirror as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdditionalImage {
    pub name: String,
}

impl ImageSetConfiguration {
    /// Load and validate a configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MirrorError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml(&content)?;
        tracing::debug!(path = %path.display(), "Loaded image set configuration");
        Ok(config)
    }

    /// Parse and validate a configuration from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| MirrorError::Config(format!("Invalid image set configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration back to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Reject documents that are structurally valid YAML but not usable.
    pub fn validate(&self) -> Result<()> {
        if let Some(kind) = &self.kind {
            if kind != IMAGE_SET_CONFIGURATION_KIND {
                return Err(MirrorError::Config(format!(
                    "unexpected kind '{}', expected {}",
                    kind, IMAGE_SET_CONFIGURATION_KIND
                )));
            }
        }
        for channel in &self.mirror.platform.channels {
            if channel.name.is_empty() {
                return Err(MirrorError::Config(
                    "release channel without a name".to_string(),
                ));
            }
        }
        for operator in &self.mirror.operators {
            if operator.catalog.is_empty() {
                return Err(MirrorError::Config(
                    "operator entry without a catalog".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Architectures to mirror, defaulting to amd64.
    pub fn architectures(&self) -> Vec<String> {
        if self.mirror.platform.architectures.is_empty() {
            vec![DEFAULT_ARCHITECTURE.to_string()]
        } else {
            self.mirror.platform.architectures.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
kind: ImageSetConfiguration
apiVersion: mirror.openshift.io/v1alpha2
mirror:
  platform:
    channels:
      - name: stable-4.14
        minVersion: 4.14.1
        maxVersion: 4.14.3
      - name: stable-4.15
        type: okd
        shortestPath: true
  operators:
    - catalog: registry.redhat.io/redhat/redhat-operator-index:v4.14
      packages:
        - name: aws-load-balancer-operator
          channels:
            - name: stable-v1
              minVersion: 1.0.0
  additionalImages:
    - name: registry.redhat.io/ubi8/ubi:latest
"#;

    #[test]
    fn test_parse_sample() {
        let config = ImageSetConfiguration::from_yaml(SAMPLE).unwrap();
        let channels = &config.mirror.platform.channels;
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].channel_type, ChannelType::Ocp);
        assert_eq!(channels[0].min_version, "4.14.1");
        assert!(channels[0].heads_only());
        assert_eq!(channels[1].channel_type, ChannelType::Okd);
        assert!(channels[1].shortest_path);
        assert_eq!(config.mirror.operators[0].packages[0].channels[0].min_version, "1.0.0");
        assert_eq!(config.mirror.additional_images[0].name, "registry.redhat.io/ubi8/ubi:latest");
    }

    #[test]
    fn test_default_architecture() {
        let config = ImageSetConfiguration::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.architectures(), vec!["amd64".to_string()]);
    }

    #[test]
    fn test_unknown_channel_type_is_deferred() {
        let yaml = "mirror:\n  platform:\n    channels:\n      - name: x\n        type: rhcos\n";
        let config = ImageSetConfiguration::from_yaml(yaml).unwrap();
        assert_eq!(config.mirror.platform.channels[0].channel_type, ChannelType::Unknown);
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let yaml = "kind: Pod\nmirror: {}\n";
        let err = ImageSetConfiguration::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, MirrorError::Config(_)));
    }

    #[test]
    fn test_malformed_yaml_is_config_error() {
        let err = ImageSetConfiguration::from_yaml("mirror: [").unwrap_err();
        assert!(matches!(err, MirrorError::Config(_)));
    }

    #[test]
    fn test_yaml_roundtrip_is_equal() {
        let config = ImageSetConfiguration::from_yaml(SAMPLE).unwrap();
        let again = ImageSetConfiguration::from_yaml(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(config, again);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("isc.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = ImageSetConfiguration::load(&path).unwrap();
        assert_eq!(config.mirror.operators.len(), 1);
    }

    #[test]
    fn test_load_missing_file() {
        let err = ImageSetConfiguration::load("/nonexistent/isc.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
