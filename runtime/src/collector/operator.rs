//! Operator catalog collector.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use a3s_mirror_core::config::Operator;
use a3s_mirror_core::error::{MirrorError, Result};
use a3s_mirror_core::{CopyWorkItem, MirrorMode};

use super::{docker_ref, find_layouts, oci_ref, synthesize_name, Collector, CollectorContext};
use crate::cancel::CancelToken;
use crate::oci::{
    catalog_path, package_filters, Catalog, ImageName, OciLayout, RelatedImage,
    INDEX_CONFIGS_LABEL,
};

const NAME: &str = "operator";

/// Longest tag a registry accepts.
const MAX_TAG_LEN: usize = 128;

/// Mirrors the related images of the selected bundles of each catalog.
pub struct OperatorCollector {
    ctx: CollectorContext,
    operators: Vec<Operator>,
}

/// Bundle and declared name an image was selected under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Selection {
    bundle: String,
    name: String,
}

impl OperatorCollector {
    pub fn new(ctx: CollectorContext, operators: Vec<Operator>) -> Self {
        Self { ctx, operators }
    }

    /// Copy and extract the catalog if needed, then select related images.
    async fn collect_catalog(
        &self,
        cancel: &CancelToken,
        operator: &Operator,
    ) -> Result<BTreeMap<String, Vec<RelatedImage>>> {
        let path = catalog_path(&operator.catalog);
        let layout = &self.ctx.layout;
        let oci_dir = layout.operator_catalog(&path);
        let hold = layout.hold_operator(&path);

        let configs = if hold.is_dir() {
            tracing::debug!(catalog = %operator.catalog, "Using extracted catalog");
            match OciLayout::open(&oci_dir).and_then(|oci| configs_label(&oci)) {
                Ok(label) => configs_dir(&hold, &label),
                Err(e) => {
                    tracing::warn!(
                        catalog = %operator.catalog,
                        error = %e,
                        "Catalog label unavailable, reading the whole extracted catalog"
                    );
                    hold.clone()
                }
            }
        } else {
            if !oci_dir.join("index.json").is_file() {
                self.ctx
                    .fetch_layout(cancel, NAME, &operator.catalog, &oci_dir)
                    .await?;
            }
            let oci = OciLayout::open(&oci_dir)?;
            let manifest = oci.first_manifest()?;
            let label = configs_label(&oci)?;
            self.ctx
                .extractor
                .extract_layers(&oci.blobs_dir(), &hold, &label, &manifest)?;
            configs_dir(&hold, &label)
        };

        let catalog = Catalog::load(&configs)?;
        let filters = package_filters(std::slice::from_ref(operator));
        catalog.related_images(&filters)
    }

    async fn collect_to_archive(&self, cancel: &CancelToken) -> Result<Vec<CopyWorkItem>> {
        // Image reference to the first (bundle, name) it was selected under
        let mut selected: BTreeMap<String, Selection> = BTreeMap::new();
        let mut failed = 0usize;

        for operator in &self.operators {
            match self.collect_catalog(cancel, operator).await {
                Ok(bundles) => {
                    for (bundle, images) in bundles {
                        for related in images {
                            let candidate = Selection {
                                bundle: bundle.clone(),
                                name: related.name,
                            };
                            selected
                                .entry(related.image)
                                .and_modify(|current| {
                                    if candidate < *current {
                                        *current = candidate.clone();
                                    }
                                })
                                .or_insert(candidate);
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(catalog = %operator.catalog, error = %e, "Catalog failed");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(MirrorError::collection(
                NAME,
                format!(
                    "{} of {} catalog(s) failed, refer to logs for details",
                    failed,
                    self.operators.len()
                ),
            ));
        }

        let root = self.ctx.layout.operator_images();
        let mut items = Vec::new();
        for (image, selection) in selected {
            let parsed = ImageName::parse(&image)
                .map_err(|e| MirrorError::collection(NAME, e.to_string()))?;
            let name = if selection.name.is_empty() {
                synthesize_name(&image)
            } else {
                selection.name
            };
            let target = root
                .join(&selection.bundle)
                .join(&parsed.namespace)
                .join(&name);
            if target.join("index.json").is_file() {
                tracing::debug!(image = %image, "Operator image already archived");
                continue;
            }
            items.push(CopyWorkItem::new(docker_ref(&image), oci_ref(&target)));
        }

        tracing::info!(
            catalogs = self.operators.len(),
            images = items.len(),
            "Collected operator images"
        );
        Ok(items)
    }

    fn collect_to_registry(&self) -> Result<Vec<CopyWorkItem>> {
        let registry = self.ctx.registry(NAME)?;
        let root = self.ctx.layout.operator_images();
        let mut items = Vec::new();
        for segments in find_layouts(&root, 3)? {
            let [bundle, namespace, name] = segments.as_slice() else {
                continue;
            };
            let source = root.join(bundle).join(namespace).join(name);
            items.push(CopyWorkItem::new(
                oci_ref(&source),
                docker_ref(&format!(
                    "{}/{}/{}:{}",
                    registry,
                    namespace,
                    name,
                    bundle_tag(bundle)
                )),
            ));
        }
        tracing::info!(images = items.len(), "Collected archived operator images");
        Ok(items)
    }
}

#[async_trait]
impl Collector for OperatorCollector {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn collect(&self, cancel: &CancelToken) -> Result<Vec<CopyWorkItem>> {
        match self.ctx.mode {
            MirrorMode::ToArchive => self.collect_to_archive(cancel).await,
            MirrorMode::ToRegistry => self.collect_to_registry(),
        }
    }
}

fn configs_label(oci: &OciLayout) -> Result<String> {
    let manifest = oci.first_manifest()?;
    oci.config_labels(&manifest)?
        .remove(INDEX_CONFIGS_LABEL)
        .ok_or_else(|| {
            MirrorError::collection(
                NAME,
                format!(
                    "catalog {} has no {} label",
                    oci.root_dir().display(),
                    INDEX_CONFIGS_LABEL
                ),
            )
        })
}

fn configs_dir(hold: &Path, label: &str) -> PathBuf {
    hold.join(label.trim_start_matches('/'))
}

/// Registry tag for a bundle name.
fn bundle_tag(bundle: &str) -> String {
    let tag: String = bundle
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .take(MAX_TAG_LEN)
        .collect();
    tag.trim_start_matches(['.', '-']).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::tests::{context, touch_layout, MockTransfer};
    use crate::oci::catalog::tests::write_catalog;
    use crate::oci::layers::tests::build_tar;
    use crate::oci::layout::tests::create_oci_layout;
    use std::sync::Arc;
    use tempfile::TempDir;

    const CATALOG: &str = "registry.redhat.io/redhat/redhat-operator-index:v4.14";

    /// Catalog image layout carrying the files `write_catalog` produces.
    fn catalog_image(dir: &Path) {
        let scratch = TempDir::new().unwrap();
        write_catalog(scratch.path());
        let etcd = std::fs::read_to_string(scratch.path().join("etcd/catalog.json")).unwrap();
        let redis = std::fs::read_to_string(scratch.path().join("redis/catalog.yaml")).unwrap();
        let layer = build_tar(&[
            ("configs/etcd/catalog.json", etcd.as_str()),
            ("configs/redis/catalog.yaml", redis.as_str()),
            ("bin/opm", "binary"),
        ]);
        create_oci_layout(dir, &[(INDEX_CONFIGS_LABEL, "/configs")], &[layer]);
    }

    fn operator(catalog: &str) -> Operator {
        Operator {
            catalog: catalog.to_string(),
            packages: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_collects_and_dedups_related_images() {
        let archive = TempDir::new().unwrap();
        let fixtures = TempDir::new().unwrap();
        catalog_image(fixtures.path());
        let transfer = Arc::new(MockTransfer::default());
        transfer.serve(CATALOG, fixtures.path());
        let ctx = context("oci:archive", archive.path(), transfer.clone());

        let collector = OperatorCollector::new(ctx, vec![operator(CATALOG)]);
        let items = collector.collect(&CancelToken::new()).await.unwrap();

        // bbb is shared by etcd and redis bundles and collapses to one item
        assert_eq!(items.len(), 2);
        let shared = items
            .iter()
            .find(|i| i.source == "docker://quay.io/coreos/etcd-operator@sha256:bbb")
            .unwrap();
        assert!(shared
            .destination
            .ends_with("operator-images/etcd.v0.9.2/coreos/etcd-operator"));
        assert!(archive
            .path()
            .join("hold-operator/redhat-operator-index/v4.14/configs/etcd/catalog.json")
            .exists());
        assert!(!archive
            .path()
            .join("hold-operator/redhat-operator-index/v4.14/bin")
            .exists());
    }

    #[tokio::test]
    async fn test_extracted_catalog_is_reused() {
        let archive = TempDir::new().unwrap();
        catalog_image(&archive.path().join("operator-catalogs/redhat-operator-index/v4.14"));
        write_catalog(
            &archive
                .path()
                .join("hold-operator/redhat-operator-index/v4.14/configs"),
        );
        let transfer = Arc::new(MockTransfer::default());
        let ctx = context("oci:archive", archive.path(), transfer.clone());

        let collector = OperatorCollector::new(ctx, vec![operator(CATALOG)]);
        let items = collector.collect(&CancelToken::new()).await.unwrap();

        assert_eq!(items.len(), 2);
        assert!(transfer.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_archived_images_are_skipped() {
        let archive = TempDir::new().unwrap();
        write_catalog(
            &archive
                .path()
                .join("hold-operator/redhat-operator-index/v4.14"),
        );
        touch_layout(
            &archive
                .path()
                .join("operator-images/etcd.v0.9.2/coreos/etcd-operator"),
        );
        let ctx = context("oci:archive", archive.path(), Arc::new(MockTransfer::default()));

        let collector = OperatorCollector::new(ctx, vec![operator(CATALOG)]);
        let items = collector.collect(&CancelToken::new()).await.unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source, "docker://quay.io/coreos/etcd@sha256:ccc");
    }

    #[tokio::test]
    async fn test_failed_catalog_does_not_stop_siblings() {
        let archive = TempDir::new().unwrap();
        let fixtures = TempDir::new().unwrap();
        catalog_image(fixtures.path());
        let transfer = Arc::new(MockTransfer::default());
        transfer.serve(CATALOG, fixtures.path());
        let ctx = context("oci:archive", archive.path(), transfer.clone());

        let collector = OperatorCollector::new(
            ctx,
            vec![operator("quay.io/missing/index:v1"), operator(CATALOG)],
        );
        let err = collector.collect(&CancelToken::new()).await.unwrap_err();

        assert!(matches!(err, MirrorError::Collection { .. }));
        assert!(archive
            .path()
            .join("hold-operator/redhat-operator-index/v4.14")
            .is_dir());
    }

    #[tokio::test]
    async fn test_publish_tags_by_bundle() {
        let archive = TempDir::new().unwrap();
        touch_layout(
            &archive
                .path()
                .join("operator-images/etcd.v0.9.2/coreos/etcd-operator"),
        );
        let ctx = context(
            "docker://registry.local:5000",
            archive.path(),
            Arc::new(MockTransfer::default()),
        );

        let collector = OperatorCollector::new(ctx, Vec::new());
        let items = collector.collect(&CancelToken::new()).await.unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].destination,
            "docker://registry.local:5000/coreos/etcd-operator:etcd.v0.9.2"
        );
    }

    #[test]
    fn test_bundle_tag() {
        assert_eq!(bundle_tag("etcd.v0.9.2"), "etcd.v0.9.2");
        assert_eq!(bundle_tag("a+b/c"), "a-b-c");
        assert_eq!(bundle_tag(".hidden"), "hidden");
        assert_eq!(bundle_tag(&"x".repeat(200)).len(), MAX_TAG_LEN);
    }
}
