//! Batched concurrent execution of copy work items.
//!
//! Items run in fixed-size batches. Every item of a batch is attempted
//! concurrently; a batch with any failure stops the run before the next
//! batch starts. Each batch writes its transfer output to
//! `<archive>/logs/batch-<n>.log`, replayed through tracing at the end.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinSet;

use a3s_mirror_core::error::{MirrorError, Result};
use a3s_mirror_core::{ArchiveLayout, CopyWorkItem, TransferOptions};

use crate::cancel::CancelToken;
use crate::transfer::{ProgressSink, Transfer};

/// How a list of work items splits into batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    pub total_items: usize,
    pub batch_size: usize,
    pub full_batches: usize,
    /// Items in the trailing partial batch
    pub remainder: usize,
}

impl BatchPlan {
    pub fn new(total_items: usize, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            total_items,
            batch_size,
            full_batches: total_items / batch_size,
            remainder: total_items % batch_size,
        }
    }

    pub fn batch_count(&self) -> usize {
        self.full_batches + usize::from(self.remainder > 0)
    }

    /// Index ranges of each batch, full batches first.
    pub fn ranges(&self) -> Vec<Range<usize>> {
        let mut ranges = Vec::with_capacity(self.batch_count());
        for batch in 0..self.full_batches {
            let start = batch * self.batch_size;
            ranges.push(start..start + self.batch_size);
        }
        if self.remainder > 0 {
            let start = self.full_batches * self.batch_size;
            ranges.push(start..start + self.remainder);
        }
        ranges
    }
}

/// Transfer output of one batch, shared by its concurrent copies.
struct BatchLog {
    file: Mutex<File>,
}

impl BatchLog {
    fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            file: Mutex::new(File::create(path)?),
        })
    }
}

impl ProgressSink for BatchLog {
    fn report(&self, line: &str) {
        let mut file = self.file.lock();
        if let Err(e) = writeln!(file, "{}", line) {
            tracing::warn!(error = %e, "Failed to write batch log");
        }
    }
}

/// Runs work items through a [`Transfer`] in bounded batches.
pub struct BatchWorker {
    transfer: Arc<dyn Transfer>,
    options: TransferOptions,
    batch_size: usize,
    layout: ArchiveLayout,
}

impl BatchWorker {
    pub fn new(
        transfer: Arc<dyn Transfer>,
        options: TransferOptions,
        batch_size: usize,
        layout: ArchiveLayout,
    ) -> Self {
        Self {
            transfer,
            options,
            batch_size,
            layout,
        }
    }

    /// Copy every item, stopping after the first batch with a failure.
    pub async fn run(&self, cancel: &CancelToken, items: &[CopyWorkItem]) -> Result<()> {
        let plan = BatchPlan::new(items.len(), self.batch_size);
        tracing::info!(
            images = plan.total_items,
            batch_size = plan.batch_size,
            batches = plan.batch_count(),
            remainder = plan.remainder,
            "Starting batched copy"
        );

        let mut written = Vec::new();
        let mut outcome = Ok(());
        for (index, range) in plan.ranges().into_iter().enumerate() {
            if cancel.is_cancelled() {
                outcome = Err(MirrorError::Other(
                    "mirroring cancelled before all batches ran".to_string(),
                ));
                break;
            }

            let batch = index + 1;
            let path = self.layout.batch_log(batch);
            let log = Arc::new(BatchLog::create(&path)?);
            written.push(path);

            let failed = self.run_batch(cancel, &items[range.clone()], log).await;
            if failed > 0 {
                outcome = Err(MirrorError::Batch { failed, batch });
                break;
            }
            tracing::info!(
                batch,
                of = plan.batch_count(),
                images = range.len(),
                "Batch completed"
            );
        }

        replay_logs(&written);
        outcome
    }

    /// Attempt every item of one batch, returning the number that failed.
    async fn run_batch(
        &self,
        cancel: &CancelToken,
        items: &[CopyWorkItem],
        log: Arc<BatchLog>,
    ) -> usize {
        let errors: Arc<Mutex<Vec<MirrorError>>> = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = JoinSet::new();

        for item in items {
            let item = item.clone();
            let transfer = self.transfer.clone();
            let options = self.options.clone();
            let cancel = cancel.clone();
            let log = log.clone();
            let errors = errors.clone();

            tasks.spawn(async move {
                log.report(&format!("copying {}", item));
                let result = transfer
                    .transfer(
                        &cancel,
                        &item.source,
                        &item.destination,
                        &options,
                        log.as_ref(),
                    )
                    .await;
                match result {
                    Ok(()) => log.report(&format!("copied {}", item)),
                    Err(e) => {
                        log.report(&format!("error: {}", e));
                        errors.lock().push(e);
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                errors
                    .lock()
                    .push(MirrorError::Other(format!("copy task failed: {}", e)));
            }
        }

        let errors = errors.lock();
        for e in errors.iter() {
            tracing::error!(error = %e, "Copy failed");
        }
        errors.len()
    }
}

fn replay_logs(paths: &[PathBuf]) {
    for path in paths {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Batch log unavailable");
                continue;
            }
        };
        for line in BufReader::new(file).lines().map_while(|l| l.ok()) {
            tracing::info!(log = %path.display(), "{}", line);
        }
    }
}
