//! Work item collectors.
//!
//! Each collector turns one category of the declarative configuration into
//! copy work items. In `ToArchive` mode items copy remote images into the
//! archive; in `ToRegistry` mode collectors walk the archive and pair every
//! local layout with its registry destination.

mod additional;
mod operator;
mod release;

pub use additional::AdditionalCollector;
pub use operator::OperatorCollector;
pub use release::ReleaseCollector;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use a3s_mirror_core::error::{MirrorError, Result};
use a3s_mirror_core::work::{DOCKER_PROTOCOL, OCI_PROTOCOL};
use a3s_mirror_core::{ArchiveLayout, CopyWorkItem, MirrorMode, MirrorOptions, TransferOptions};

use crate::cancel::CancelToken;
use crate::oci::LayerExtractor;
use crate::transfer::{NoProgress, Transfer};

/// Produces the copy work items for one image category.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    async fn collect(&self, cancel: &CancelToken) -> Result<Vec<CopyWorkItem>>;

    /// Failures from the last `collect` that did not stop collection but
    /// must fail the run once the collected items are copied. Drains.
    fn take_deferred_errors(&self) -> Vec<MirrorError> {
        Vec::new()
    }
}

/// Collaborators and paths shared by every collector of a run.
#[derive(Clone)]
pub struct CollectorContext {
    pub mode: MirrorMode,
    /// Protocol-qualified destination as given on the command line
    pub destination: String,
    /// Registry prefix in `ToRegistry` mode
    pub registry: Option<String>,
    pub layout: ArchiveLayout,
    pub transfer: Arc<dyn Transfer>,
    pub extractor: Arc<dyn LayerExtractor>,
    pub transfer_options: TransferOptions,
}

impl CollectorContext {
    pub fn new(
        options: &MirrorOptions,
        transfer: Arc<dyn Transfer>,
        extractor: Arc<dyn LayerExtractor>,
    ) -> Result<Self> {
        Ok(Self {
            mode: options.mode(),
            destination: options.destination.to_string(),
            registry: options.registry().map(str::to_string),
            layout: options.layout()?,
            transfer,
            extractor,
            transfer_options: options.transfer.clone(),
        })
    }

    /// Registry prefix, required in `ToRegistry` mode.
    fn registry(&self, collector: &str) -> Result<&str> {
        self.registry.as_deref().ok_or_else(|| {
            MirrorError::collection(collector, "no registry destination for publishing")
        })
    }

    /// Copy a remote image straight into a local layout, outside any batch.
    async fn fetch_layout(
        &self,
        cancel: &CancelToken,
        collector: &str,
        image: &str,
        target: &Path,
    ) -> Result<()> {
        let source = docker_ref(image);
        let destination = oci_ref(target);
        tracing::info!(image = %image, target = %target.display(), "Copying index image");
        self.transfer
            .transfer(
                cancel,
                &source,
                &destination,
                &self.transfer_options,
                &NoProgress,
            )
            .await
            .map_err(|e| MirrorError::collection(collector, e.to_string()))
    }
}

pub(crate) fn oci_ref(path: &Path) -> String {
    format!("{}{}", OCI_PROTOCOL, path.display())
}

pub(crate) fn docker_ref(image: &str) -> String {
    if image.starts_with(DOCKER_PROTOCOL) {
        image.to_string()
    } else {
        format!("{}{}", DOCKER_PROTOCOL, image)
    }
}

/// Relative paths of OCI layouts exactly `depth` directories below `root`.
///
/// A missing `root` yields no layouts.
pub(crate) fn find_layouts(root: &Path, depth: usize) -> Result<Vec<Vec<String>>> {
    let mut found = Vec::new();
    if root.is_dir() {
        walk(root, depth, &mut Vec::new(), &mut found)?;
    }
    found.sort();
    Ok(found)
}

fn walk(
    dir: &Path,
    remaining: usize,
    prefix: &mut Vec<String>,
    found: &mut Vec<Vec<String>>,
) -> Result<()> {
    if remaining == 0 {
        if dir.join("index.json").is_file() {
            found.push(prefix.clone());
        }
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path: PathBuf = entry.path();
        if path.is_dir() {
            prefix.push(entry.file_name().to_string_lossy().into_owned());
            walk(&path, remaining - 1, prefix, found)?;
            prefix.pop();
        }
    }
    Ok(())
}

/// Short identifier for related images declared without a name.
pub(crate) fn synthesize_name(image: &str) -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let hash = Sha256::digest(format!("{}{}", nanos, image).as_bytes());
    hex::encode(hash)[..6].to_string()
}
