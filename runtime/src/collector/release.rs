//! Release payload collector.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use a3s_mirror_core::config::ReleaseChannel;
use a3s_mirror_core::digest::digest_hex;
use a3s_mirror_core::error::{MirrorError, Result};
use a3s_mirror_core::{CopyWorkItem, MirrorMode};

use super::{docker_ref, find_layouts, oci_ref, Collector, CollectorContext};
use crate::cancel::CancelToken;
use crate::cincinnati::Resolver;
use crate::oci::{read_image_references, release_manifests_dir, OciLayout};

const NAME: &str = "release";

/// Resolves release channels and mirrors every component of each payload.
pub struct ReleaseCollector {
    ctx: CollectorContext,
    resolver: Resolver,
    channels: Vec<ReleaseChannel>,
    architectures: Vec<String>,
    /// Channel resolution failures of the last collection
    unresolved: Mutex<Vec<MirrorError>>,
}

impl ReleaseCollector {
    pub fn new(
        ctx: CollectorContext,
        resolver: Resolver,
        channels: Vec<ReleaseChannel>,
        architectures: Vec<String>,
    ) -> Self {
        Self {
            ctx,
            resolver,
            channels,
            architectures,
            unresolved: Mutex::new(Vec::new()),
        }
    }

    async fn collect_to_archive(&self, cancel: &CancelToken) -> Result<Vec<CopyWorkItem>> {
        if self.channels.is_empty() {
            return Ok(Vec::new());
        }

        let mut channels = self.channels.clone();
        let resolution = self.resolver.resolve(&mut channels, &self.architectures).await;
        if !resolution.errors.is_empty() {
            tracing::error!(
                failed = resolution.errors.len(),
                "Some release channels failed to resolve, continuing with the rest"
            );
        }
        *self.unresolved.lock() = resolution.errors;

        let layout = &self.ctx.layout;
        let release_images = layout.release_images();
        // Destination directory name to the component image it holds
        let mut claimed: BTreeMap<String, String> = BTreeMap::new();
        let mut items = Vec::new();

        for release in resolution.digests.iter() {
            let hex = digest_hex(release).ok_or_else(|| {
                MirrorError::collection(
                    NAME,
                    format!("release image {} is not pinned by digest", release),
                )
            })?;

            let index_dir = layout.release_index(hex);
            if !index_dir.join("index.json").is_file() {
                self.ctx.fetch_layout(cancel, NAME, release, &index_dir).await?;
            }

            let oci = OciLayout::open(&index_dir)
                .and_then(|oci| oci.first_manifest().map(|m| (oci, m)))
                .and_then(|(oci, m)| oci.config_labels(&m).map(|labels| (oci, m, labels)))
                .map_err(|e| MirrorError::collection(NAME, e.to_string()));
            let (oci, manifest, labels) = oci?;
            let selector = release_manifests_dir(&labels);

            let hold = layout.hold_release(hex);
            let manifests_dir = hold.join(&selector);
            if !manifests_dir.is_dir() {
                self.ctx
                    .extractor
                    .extract_layers(&oci.blobs_dir(), &hold, &selector, &manifest)
                    .map_err(|e| MirrorError::collection(NAME, e.to_string()))?;
            }

            for component in read_image_references(&manifests_dir)? {
                let dir_name = match claimed.get(&component.name) {
                    None => component.name.clone(),
                    Some(image) if image == &component.image => continue,
                    Some(_) => {
                        let suffix = digest_hex(&component.image)
                            .map(|h| h.get(..12).unwrap_or(h))
                            .unwrap_or(hex);
                        format!("{}-{}", component.name, suffix)
                    }
                };
                if claimed.contains_key(&dir_name) {
                    continue;
                }
                claimed.insert(dir_name.clone(), component.image.clone());
                items.push(CopyWorkItem::new(
                    docker_ref(&component.image),
                    oci_ref(&release_images.join(&dir_name)),
                ));
            }
        }

        tracing::info!(
            releases = resolution.digests.len(),
            images = items.len(),
            "Collected release images"
        );
        Ok(items)
    }

    fn collect_to_registry(&self) -> Result<Vec<CopyWorkItem>> {
        let registry = self.ctx.registry(NAME)?;
        let root = self.ctx.layout.release_images();
        let items = find_layouts(&root, 1)?
            .into_iter()
            .map(|segments| {
                let name = segments.join("/");
                CopyWorkItem::new(
                    oci_ref(&root.join(&name)),
                    docker_ref(&format!("{}/{}", registry, name)),
                )
            })
            .collect::<Vec<_>>();
        tracing::info!(images = items.len(), "Collected archived release images");
        Ok(items)
    }
}

#[async_trait]
impl Collector for ReleaseCollector {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn collect(&self, cancel: &CancelToken) -> Result<Vec<CopyWorkItem>> {
        match self.ctx.mode {
            MirrorMode::ToArchive => self.collect_to_archive(cancel).await,
            MirrorMode::ToRegistry => self.collect_to_registry(),
        }
    }

    fn take_deferred_errors(&self) -> Vec<MirrorError> {
        std::mem::take(&mut *self.unresolved.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cincinnati::graph::tests::chain;
    use crate::cincinnati::{Graph, GraphClient};
    use crate::collector::tests::{context, touch_layout, MockTransfer};
    use crate::oci::layers::tests::build_tar;
    use crate::oci::layout::tests::create_oci_layout;
    use crate::oci::release::tests::image_references;
    use crate::oci::RELEASE_MANIFESTS_LABEL;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixed(Graph);

    #[async_trait]
    impl GraphClient for Fixed {
        async fn fetch_graph(&self, _channel: &str, _arch: &str) -> Result<Graph> {
            Ok(self.0.clone())
        }
    }

    fn resolver(graph: Graph) -> Resolver {
        Resolver::new(Arc::new(Fixed(graph)), Arc::new(Fixed(Graph::default())))
    }

    fn channel(min: &str, max: &str) -> ReleaseChannel {
        ReleaseChannel {
            name: "stable-1.0".to_string(),
            min_version: min.to_string(),
            max_version: max.to_string(),
            ..Default::default()
        }
    }

    /// Payload layout whose image-references lists `components`.
    fn payload(dir: &std::path::Path, components: &[(&str, &str)]) {
        let references = image_references(components);
        let layer = build_tar(&[("release-manifests/image-references", references.as_str())]);
        create_oci_layout(dir, &[], &[layer]);
    }

    #[tokio::test]
    async fn test_collects_payload_components() {
        let archive = TempDir::new().unwrap();
        let fixtures = TempDir::new().unwrap();
        payload(
            &fixtures.path().join("100"),
            &[
                ("etcd", "quay.io/ocp/etcd@sha256:e1"),
                ("console", "quay.io/ocp/console@sha256:c1"),
            ],
        );
        payload(
            &fixtures.path().join("110"),
            &[
                ("etcd", "quay.io/ocp/etcd@sha256:e1"),
                ("console", "quay.io/ocp/console@sha256:c2"),
            ],
        );

        let transfer = Arc::new(MockTransfer::default());
        transfer.serve("quay.io/ocp/release@sha256:100", &fixtures.path().join("100"));
        transfer.serve("quay.io/ocp/release@sha256:110", &fixtures.path().join("110"));
        let ctx = context("oci:archive", archive.path(), transfer.clone());

        let collector = ReleaseCollector::new(
            ctx,
            resolver(chain(&["1.0.0", "1.1.0", "1.2.0"])),
            vec![channel("1.0.0", "1.1.0")],
            vec!["amd64".to_string()],
        );
        let items = collector.collect(&CancelToken::new()).await.unwrap();

        let destinations: Vec<String> = items
            .iter()
            .map(|item| {
                item.destination
                    .rsplit('/')
                    .next()
                    .unwrap()
                    .to_string()
            })
            .collect();
        assert_eq!(items.len(), 3);
        assert!(destinations.contains(&"etcd".to_string()));
        assert!(destinations.contains(&"console".to_string()));
        assert!(destinations.contains(&"console-c2".to_string()));
        assert!(archive.path().join("hold-release/100/release-manifests").is_dir());
        assert_eq!(transfer.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_cached_index_is_not_copied_again() {
        let archive = TempDir::new().unwrap();
        payload(
            &archive.path().join("release-index/100"),
            &[("etcd", "quay.io/ocp/etcd@sha256:e1")],
        );
        let transfer = Arc::new(MockTransfer::default());
        let ctx = context("oci:archive", archive.path(), transfer.clone());

        let collector = ReleaseCollector::new(
            ctx,
            resolver(chain(&["1.0.0"])),
            vec![channel("1.0.0", "1.0.0")],
            vec!["amd64".to_string()],
        );
        let items = collector.collect(&CancelToken::new()).await.unwrap();

        assert_eq!(items.len(), 1);
        assert!(transfer.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_missing_payload_manifest_is_collection_error() {
        let archive = TempDir::new().unwrap();
        std::fs::create_dir_all(archive.path().join("release-index/100")).unwrap();
        std::fs::write(
            archive.path().join("release-index/100/index.json"),
            r#"{"schemaVersion":2,"manifests":[]}"#,
        )
        .unwrap();
        let ctx = context("oci:archive", archive.path(), Arc::new(MockTransfer::default()));

        let collector = ReleaseCollector::new(
            ctx,
            resolver(chain(&["1.0.0"])),
            vec![channel("1.0.0", "1.0.0")],
            vec!["amd64".to_string()],
        );
        let err = collector.collect(&CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, MirrorError::Collection { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_tag_with_malformed_digest() {
        let archive = TempDir::new().unwrap();
        payload(
            &archive.path().join("release-index/100"),
            &[("console", "quay.io/ocp/console@sha256:c1")],
        );
        // Byte 12 of the digest falls inside a two-byte character
        payload(
            &archive.path().join("release-index/110"),
            &[("console", "quay.io/ocp/console@sha256:ccccccccccc\u{e9}x")],
        );
        let ctx = context("oci:archive", archive.path(), Arc::new(MockTransfer::default()));

        let collector = ReleaseCollector::new(
            ctx,
            resolver(chain(&["1.0.0", "1.1.0"])),
            vec![channel("1.0.0", "1.1.0")],
            vec!["amd64".to_string()],
        );
        let items = collector.collect(&CancelToken::new()).await.unwrap();

        assert_eq!(items.len(), 2);
        assert!(items
            .iter()
            .any(|item| item.destination.ends_with("/console-ccccccccccc\u{e9}x")));
    }

    #[tokio::test]
    async fn test_labelled_payload_manifests_dir() {
        let archive = TempDir::new().unwrap();
        let references = image_references(&[("etcd", "quay.io/ocp/etcd@sha256:e1")]);
        let layer = build_tar(&[
            ("manifests/image-references", references.as_str()),
            ("release-manifests/image-references", "not the payload document"),
        ]);
        create_oci_layout(
            &archive.path().join("release-index/100"),
            &[(RELEASE_MANIFESTS_LABEL, "/manifests")],
            &[layer],
        );
        let ctx = context("oci:archive", archive.path(), Arc::new(MockTransfer::default()));

        let collector = ReleaseCollector::new(
            ctx,
            resolver(chain(&["1.0.0"])),
            vec![channel("1.0.0", "1.0.0")],
            vec!["amd64".to_string()],
        );
        let items = collector.collect(&CancelToken::new()).await.unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source, "docker://quay.io/ocp/etcd@sha256:e1");
        assert!(archive
            .path()
            .join("hold-release/100/manifests/image-references")
            .is_file());
        assert!(!archive.path().join("hold-release/100/release-manifests").exists());
    }

    #[tokio::test]
    async fn test_unresolved_channels_are_deferred() {
        let archive = TempDir::new().unwrap();
        let ctx = context("oci:archive", archive.path(), Arc::new(MockTransfer::default()));
        let mut bad = channel("1.0.0", "1.0.0");
        bad.name = "stable-9.9".to_string();
        bad.channel_type = a3s_mirror_core::ChannelType::Unknown;

        let collector = ReleaseCollector::new(
            ctx,
            resolver(chain(&["1.0.0"])),
            vec![bad],
            vec!["amd64".to_string()],
        );
        let items = collector.collect(&CancelToken::new()).await.unwrap();

        assert!(items.is_empty());
        let deferred = collector.take_deferred_errors();
        assert_eq!(deferred.len(), 1);
        assert!(matches!(
            &deferred[0],
            MirrorError::Resolution { channel, .. } if channel == "stable-9.9"
        ));
        assert!(collector.take_deferred_errors().is_empty());
    }

    #[tokio::test]
    async fn test_publish_walks_release_images() {
        let archive = TempDir::new().unwrap();
        touch_layout(&archive.path().join("release-images/etcd"));
        touch_layout(&archive.path().join("release-images/console"));
        let ctx = context(
            "docker://registry.local:5000/ocp",
            archive.path(),
            Arc::new(MockTransfer::default()),
        );

        let collector =
            ReleaseCollector::new(ctx, resolver(Graph::default()), Vec::new(), Vec::new());
        let items = collector.collect(&CancelToken::new()).await.unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0].destination,
            "docker://registry.local:5000/ocp/console"
        );
        assert!(items[0].source.starts_with("oci:"));
    }
}
