//! Run orchestration.
//!
//! One invocation: check configuration drift against the run history, run
//! every collector, copy the merged work items in batches, then record the
//! run. Archive runs and registry runs keep separate histories; a registry
//! run must be driven by the configuration its archive was produced from.

use std::collections::HashSet;
use std::sync::Arc;

use a3s_mirror_core::error::{MirrorError, Result};
use a3s_mirror_core::{ArchiveLayout, CopyWorkItem, ImageSetConfiguration, MirrorMode, MirrorOptions};

use crate::batch::BatchWorker;
use crate::cancel::CancelToken;
use crate::cincinnati::{CincinnatiClient, NonEmptySignature, Resolver, SignatureStore};
use crate::collector::{
    AdditionalCollector, Collector, CollectorContext, OperatorCollector, ReleaseCollector,
};
use crate::oci::{RegistryTransfer, TarLayerExtractor};
use crate::sequence::{check_diff, HistoryKind, SequenceTracker};
use crate::transfer::Transfer;

/// What a run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Configuration unchanged since the last recorded run
    NothingToDo,
    /// Work items copied
    Mirrored { images: usize },
}

/// Drives one mirroring run.
pub struct Executor {
    options: MirrorOptions,
    config: ImageSetConfiguration,
    layout: ArchiveLayout,
    collectors: Vec<Box<dyn Collector>>,
    worker: BatchWorker,
}

impl Executor {
    pub fn new(
        options: MirrorOptions,
        config: ImageSetConfiguration,
        collectors: Vec<Box<dyn Collector>>,
        worker: BatchWorker,
    ) -> Result<Self> {
        options.validate()?;
        config.validate()?;
        let layout = options.layout()?;
        Ok(Self {
            options,
            config,
            layout,
            collectors,
            worker,
        })
    }

    /// Executor backed by the update services, registries and tar layers.
    pub fn with_defaults(options: MirrorOptions, config: ImageSetConfiguration) -> Result<Self> {
        options.validate()?;
        let layout = options.layout()?;
        let transfer: Arc<dyn Transfer> = Arc::new(RegistryTransfer::new());
        let ctx = CollectorContext::new(&options, transfer.clone(), Arc::new(TarLayerExtractor))?;

        let signatures = SignatureStore::new(layout.signatures(), Arc::new(NonEmptySignature));
        let resolver = Resolver::new(
            Arc::new(CincinnatiClient::ocp()),
            Arc::new(CincinnatiClient::okd()),
        )
        .with_signatures(Arc::new(signatures));

        let collectors = Self::standard_collectors(ctx, resolver, &config);
        let worker = BatchWorker::new(
            transfer,
            options.transfer.clone(),
            options.batch_size,
            layout,
        );
        Self::new(options, config, collectors, worker)
    }

    /// Release, operator and additional image collectors for `config`.
    pub fn standard_collectors(
        ctx: CollectorContext,
        resolver: Resolver,
        config: &ImageSetConfiguration,
    ) -> Vec<Box<dyn Collector>> {
        vec![
            Box::new(ReleaseCollector::new(
                ctx.clone(),
                resolver,
                config.mirror.platform.channels.clone(),
                config.architectures(),
            )),
            Box::new(OperatorCollector::new(
                ctx.clone(),
                config.mirror.operators.clone(),
            )),
            Box::new(AdditionalCollector::new(
                ctx,
                config.mirror.additional_images.clone(),
            )),
        ]
    }

    pub async fn run(&self, cancel: &CancelToken) -> Result<RunOutcome> {
        tracing::info!(
            mode = %self.options.mode(),
            destination = %self.options.destination,
            archive = %self.layout.root().display(),
            "Starting mirror run"
        );
        match self.options.mode() {
            MirrorMode::ToArchive => self.run_to_archive(cancel).await,
            MirrorMode::ToRegistry => self.run_to_registry(cancel).await,
        }
    }

    async fn run_to_archive(&self, cancel: &CancelToken) -> Result<RunOutcome> {
        let tracker = SequenceTracker::new(HistoryKind::Archive, self.layout.clone());
        let (history, last) = tracker.get_all_metadata()?;

        if !self.options.force && !check_diff(&self.config, last.as_ref()) {
            tracing::info!("Configuration unchanged since the last archive run");
            return Ok(RunOutcome::NothingToDo);
        }

        let images = self.mirror(cancel).await?;
        tracker.write_metadata(history, &self.config, None)?;
        Ok(RunOutcome::Mirrored { images })
    }

    async fn run_to_registry(&self, cancel: &CancelToken) -> Result<RunOutcome> {
        let archive = SequenceTracker::new(HistoryKind::Archive, self.layout.clone());
        let (archive_history, archive_config) = archive.get_all_metadata()?;
        let archive_ordinal = archive_history.current().map(|e| e.ordinal);

        if !self.options.force && check_diff(&self.config, archive_config.as_ref()) {
            return Err(MirrorError::Consistency(format!(
                "configuration differs from the one that produced archive {}; \
                 rerun the archive pass or use --force",
                self.layout.root().display()
            )));
        }

        let publish = SequenceTracker::new(HistoryKind::Publish, self.layout.clone());
        let (publish_history, published_config) = publish.get_all_metadata()?;
        let published_ordinal = publish_history
            .current()
            .and_then(|e| e.archive_ordinal);

        if !self.options.force
            && !check_diff(&self.config, published_config.as_ref())
            && published_ordinal == archive_ordinal
        {
            tracing::info!("Archive already published with this configuration");
            return Ok(RunOutcome::NothingToDo);
        }

        let images = self.mirror(cancel).await?;
        publish.write_metadata(publish_history, &self.config, archive_ordinal)?;
        Ok(RunOutcome::Mirrored { images })
    }

    /// Collect from every collector, then copy the merged list.
    ///
    /// Deferred collector failures fail the run after the copies finish, so
    /// no history is recorded for a partial run.
    async fn mirror(&self, cancel: &CancelToken) -> Result<usize> {
        let items = self.collect(cancel).await?;
        self.worker.run(cancel, &items).await?;

        let deferred: Vec<MirrorError> = self
            .collectors
            .iter()
            .flat_map(|c| c.take_deferred_errors())
            .collect();
        if !deferred.is_empty() {
            return Err(unresolved_channels(&deferred));
        }
        Ok(items.len())
    }

    async fn collect(&self, cancel: &CancelToken) -> Result<Vec<CopyWorkItem>> {
        let mut seen = HashSet::new();
        let mut items = Vec::new();
        for collector in &self.collectors {
            let collected = collector.collect(cancel).await?;
            tracing::info!(
                collector = collector.name(),
                images = collected.len(),
                "Collector finished"
            );
            items.extend(collected.into_iter().filter(|item| seen.insert(item.clone())));
        }
        tracing::info!(images = items.len(), "Collected work items");
        Ok(items)
    }
}

/// Aggregate deferred channel failures into one resolution error.
fn unresolved_channels(errors: &[MirrorError]) -> MirrorError {
    let mut channels: Vec<String> = errors
        .iter()
        .map(|e| match e {
            MirrorError::Resolution { channel, .. } => channel.clone(),
            other => other.to_string(),
        })
        .collect();
    channels.sort();
    channels.dedup();
    MirrorError::Resolution {
        channel: channels.join(", "),
        message: format!(
            "{} release resolution failure(s), refer to logs for details",
            errors.len()
        ),
    }
}
