//! On-disk layout of a mirror archive.
//!
//! ```text
//! <root>/
//! ├── .metadata.json               (archive run history)
//! ├── .publish-metadata.json       (registry publish history)
//! ├── .imagesetconfig-<n>.yaml     (archive run configuration snapshots)
//! ├── .publish-imagesetconfig-<n>.yaml
//! ├── release-index/<hex>/         (release payload index images)
//! ├── hold-release/<hex>/          (extracted release manifests)
//! ├── release-images/<tag>/        (release component images)
//! ├── operator-catalogs/<catalog>/ (catalog index images)
//! ├── hold-operator/<catalog>/     (extracted declarative configs)
//! ├── operator-images/<bundle>/<namespace>/<name>/
//! ├── additional-images/<namespace>/<component>/
//! ├── signatures/<hex>             (cached release signatures)
//! └── logs/batch-<n>.log
//! ```

use std::path::{Path, PathBuf};

pub const RELEASE_IMAGES_DIR: &str = "release-images";
pub const RELEASE_INDEX_DIR: &str = "release-index";
pub const HOLD_RELEASE_DIR: &str = "hold-release";
pub const OPERATOR_IMAGES_DIR: &str = "operator-images";
pub const OPERATOR_CATALOGS_DIR: &str = "operator-catalogs";
pub const HOLD_OPERATOR_DIR: &str = "hold-operator";
pub const ADDITIONAL_IMAGES_DIR: &str = "additional-images";
pub const SIGNATURES_DIR: &str = "signatures";
pub const LOGS_DIR: &str = "logs";
pub const ARCHIVE_METADATA_FILE: &str = ".metadata.json";
pub const PUBLISH_METADATA_FILE: &str = ".publish-metadata.json";

/// Paths inside an archive root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLayout {
    root: PathBuf,
}

impl ArchiveLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn release_images(&self) -> PathBuf {
        self.root.join(RELEASE_IMAGES_DIR)
    }

    pub fn release_index(&self, digest_hex: &str) -> PathBuf {
        self.root.join(RELEASE_INDEX_DIR).join(digest_hex)
    }

    pub fn hold_release(&self, digest_hex: &str) -> PathBuf {
        self.root.join(HOLD_RELEASE_DIR).join(digest_hex)
    }

    pub fn operator_images(&self) -> PathBuf {
        self.root.join(OPERATOR_IMAGES_DIR)
    }

    pub fn operator_catalog(&self, catalog_path: &str) -> PathBuf {
        self.root.join(OPERATOR_CATALOGS_DIR).join(catalog_path)
    }

    pub fn hold_operator(&self, catalog_path: &str) -> PathBuf {
        self.root.join(HOLD_OPERATOR_DIR).join(catalog_path)
    }

    pub fn additional_images(&self) -> PathBuf {
        self.root.join(ADDITIONAL_IMAGES_DIR)
    }

    pub fn signatures(&self) -> PathBuf {
        self.root.join(SIGNATURES_DIR)
    }

    pub fn logs(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    pub fn batch_log(&self, batch: usize) -> PathBuf {
        self.logs().join(format!("batch-{}.log", batch))
    }

    pub fn archive_metadata(&self) -> PathBuf {
        self.root.join(ARCHIVE_METADATA_FILE)
    }

    pub fn publish_metadata(&self) -> PathBuf {
        self.root.join(PUBLISH_METADATA_FILE)
    }

    pub fn config_snapshot(&self, ordinal: u64) -> PathBuf {
        self.root.join(format!(".imagesetconfig-{}.yaml", ordinal))
    }

    pub fn publish_config_snapshot(&self, ordinal: u64) -> PathBuf {
        self.root
            .join(format!(".publish-imagesetconfig-{}.yaml", ordinal))
    }
}
