//! A3S Mirror Core - Foundational Types
//!
//! This module provides the types shared by the mirroring engine and the CLI:
//! the error taxonomy, the declarative image set configuration, per-run
//! options, the on-disk archive layout, digest sets and copy work items.

pub mod config;
pub mod digest;
pub mod error;
pub mod layout;
pub mod options;
pub mod work;

// Re-export commonly used types
pub use config::{
    AdditionalImage, ChannelType, ImageSetConfiguration, Operator, OperatorChannel,
    OperatorPackage, Platform, ReleaseChannel,
};
pub use digest::DigestSet;
pub use error::{MirrorError, Result};
pub use layout::ArchiveLayout;
pub use options::{Destination, LogLevel, MirrorMode, MirrorOptions, TransferOptions};
pub use work::CopyWorkItem;

/// A3S Mirror version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
