//! Additional image collector.

use std::collections::BTreeSet;

use async_trait::async_trait;

use a3s_mirror_core::config::AdditionalImage;
use a3s_mirror_core::error::{MirrorError, Result};
use a3s_mirror_core::work::{DOCKER_PROTOCOL, OCI_PROTOCOL};
use a3s_mirror_core::{CopyWorkItem, MirrorMode};

use super::{docker_ref, find_layouts, oci_ref, Collector, CollectorContext};
use crate::cancel::CancelToken;
use crate::oci::ImageName;

const NAME: &str = "additional";

/// Mirrors standalone images listed in the configuration.
pub struct AdditionalCollector {
    ctx: CollectorContext,
    images: Vec<AdditionalImage>,
}

impl AdditionalCollector {
    pub fn new(ctx: CollectorContext, images: Vec<AdditionalImage>) -> Self {
        Self { ctx, images }
    }

    fn collect_to_archive(&self) -> Result<Vec<CopyWorkItem>> {
        let root = self.ctx.layout.additional_images();
        let mut planned = BTreeSet::new();
        let mut items = Vec::new();

        for image in &self.images {
            let name = ImageName::parse(&image.name)
                .map_err(|e| MirrorError::collection(NAME, e.to_string()))?;
            let target = root.join(&name.namespace).join(&name.component);
            if target.join("index.json").is_file() {
                tracing::debug!(image = %image.name, "Cache hit, skipping");
                continue;
            }
            if !planned.insert(target.clone()) {
                tracing::warn!(
                    image = %image.name,
                    target = %target.display(),
                    "Another image already maps to this archive path, skipping"
                );
                continue;
            }
            items.push(CopyWorkItem::new(docker_ref(&image.name), oci_ref(&target)));
        }

        tracing::info!(images = items.len(), "Collected additional images");
        Ok(items)
    }

    fn collect_to_registry(&self) -> Result<Vec<CopyWorkItem>> {
        let registry = self.ctx.registry(NAME)?;
        let root = self.ctx.layout.additional_images();
        let items = find_layouts(&root, 2)?
            .into_iter()
            .map(|segments| {
                let path = segments.join("/");
                CopyWorkItem::new(
                    oci_ref(&root.join(&path)),
                    docker_ref(&format!("{}/{}", registry, path)),
                )
            })
            .collect::<Vec<_>>();
        tracing::info!(images = items.len(), "Collected archived additional images");
        Ok(items)
    }
}

#[async_trait]
impl Collector for AdditionalCollector {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn collect(&self, _cancel: &CancelToken) -> Result<Vec<CopyWorkItem>> {
        let destination = &self.ctx.destination;
        if !destination.starts_with(OCI_PROTOCOL) && !destination.starts_with(DOCKER_PROTOCOL) {
            return Err(MirrorError::collection(
                NAME,
                format!(
                    "destination '{}' must start with {} or {}",
                    destination, OCI_PROTOCOL, DOCKER_PROTOCOL
                ),
            ));
        }

        match self.ctx.mode {
            MirrorMode::ToArchive => self.collect_to_archive(),
            MirrorMode::ToRegistry => self.collect_to_registry(),
        }
    }
}
