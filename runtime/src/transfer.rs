//! Image transfer capability.
//!
//! The engine never copies bytes itself. Every copy goes through a
//! [`Transfer`] implementation injected at construction time.

use async_trait::async_trait;

use a3s_mirror_core::error::Result;
use a3s_mirror_core::TransferOptions;

use crate::cancel::CancelToken;

/// Receives human-readable progress lines for one transfer.
pub trait ProgressSink: Send + Sync {
    fn report(&self, line: &str);
}

/// Discards progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _line: &str) {}
}

/// Copies one image between protocol-qualified locations.
///
/// `source` and `destination` are `docker://<ref>` for registries and
/// `oci:<path>` or `oci://<path>` for local layouts. Retry policy belongs to
/// the implementation; a returned error is final for this run.
#[async_trait]
pub trait Transfer: Send + Sync {
    async fn transfer(
        &self,
        cancel: &CancelToken,
        source: &str,
        destination: &str,
        options: &TransferOptions,
        progress: &dyn ProgressSink,
    ) -> Result<()>;
}
