//! A3S Mirror Runtime - mirroring engine implementation.
//!
//! This module provides the planning and execution engine: upgrade graph
//! resolution, OCI layout and catalog reading, the release, operator and
//! additional image collectors, batched transfers and the run history.

#![allow(clippy::result_large_err)]

pub mod batch;
pub mod cancel;
pub mod cincinnati;
pub mod collector;
pub mod executor;
pub mod oci;
pub mod sequence;
pub mod transfer;

// Re-export common types
pub use batch::{BatchPlan, BatchWorker};
pub use cancel::CancelToken;
pub use cincinnati::{CincinnatiClient, GraphClient, Resolution, Resolver};
pub use collector::{
    AdditionalCollector, Collector, CollectorContext, OperatorCollector, ReleaseCollector,
};
pub use executor::{Executor, RunOutcome};
pub use oci::{LayerExtractor, RegistryTransfer, TarLayerExtractor};
pub use sequence::{check_diff, HistoryKind, SequenceEntry, SequenceHistory, SequenceTracker};
pub use transfer::{NoProgress, ProgressSink, Transfer};

/// A3S Mirror Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
