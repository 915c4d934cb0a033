//! OCI layer extraction.
//!
//! Extracts the subtree of an image's layers selected by a path label
//! (e.g. `/configs` in catalog images, `release-manifests` in release
//! payloads) into a target directory.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

use a3s_mirror_core::error::{MirrorError, Result};
use flate2::read::GzDecoder;
use oci_spec::image::ImageManifest;
use tar::Archive;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Capability for extracting labeled layer content to disk.
pub trait LayerExtractor: Send + Sync {
    /// Extract entries under `selector` from every layer of `manifest`,
    /// reading blobs from `blobs_dir` and preserving relative paths under
    /// `target_dir`.
    fn extract_layers(
        &self,
        blobs_dir: &Path,
        target_dir: &Path,
        selector: &str,
        manifest: &ImageManifest,
    ) -> Result<()>;
}

/// Extracts tar and tar+gzip layers.
#[derive(Debug, Default, Clone, Copy)]
pub struct TarLayerExtractor;

impl LayerExtractor for TarLayerExtractor {
    fn extract_layers(
        &self,
        blobs_dir: &Path,
        target_dir: &Path,
        selector: &str,
        manifest: &ImageManifest,
    ) -> Result<()> {
        std::fs::create_dir_all(target_dir).map_err(|e| {
            MirrorError::Other(format!(
                "Failed to create target directory {}: {}",
                target_dir.display(),
                e
            ))
        })?;

        let selector = normalize(Path::new(selector));
        let mut extracted = 0usize;
        for layer in manifest.layers() {
            let digest = layer.digest().to_string();
            let hex = digest.strip_prefix("sha256:").unwrap_or(&digest);
            extracted += extract_matching(&blobs_dir.join(hex), target_dir, &selector)?;
        }

        tracing::debug!(
            selector = %selector.display(),
            target = %target_dir.display(),
            entries = extracted,
            "Extracted labeled layer content"
        );
        Ok(())
    }
}

/// Extract entries of one layer under `selector`, returning how many were written.
fn extract_matching(layer_path: &Path, target_dir: &Path, selector: &Path) -> Result<usize> {
    let reader = open_layer(layer_path)?;
    let mut archive = Archive::new(reader);
    let entries = archive.entries().map_err(|e| {
        MirrorError::Other(format!(
            "Failed to read layer {}: {}",
            layer_path.display(),
            e
        ))
    })?;

    let mut count = 0;
    for entry in entries {
        let mut entry = entry?;
        let path = normalize(&entry.path()?);
        if !path.starts_with(selector) {
            continue;
        }
        // unpack_in refuses paths escaping target_dir
        if entry.unpack_in(target_dir)? {
            count += 1;
        }
    }
    Ok(count)
}

/// Open a layer blob, transparently decompressing gzip.
fn open_layer(layer_path: &Path) -> Result<Box<dyn Read>> {
    let mut file = File::open(layer_path).map_err(|e| {
        MirrorError::Other(format!(
            "Failed to open layer file {}: {}",
            layer_path.display(),
            e
        ))
    })?;

    let mut magic = [0u8; 2];
    let read = file.read(&mut magic)?;
    let file = File::open(layer_path)?;
    if read == 2 && magic == GZIP_MAGIC {
        Ok(Box::new(GzDecoder::new(BufReader::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Drop root and `.` components so `/configs/x` and `./configs/x` compare equal.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_) | Component::ParentDir))
        .collect()
}
