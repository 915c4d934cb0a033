//! Per-run options.
//!
//! Built once from the command line and passed to every component
//! constructor. Nothing in the engine reads process-wide path or mode state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MirrorError, Result};
use crate::layout::ArchiveLayout;
use crate::work::{DOCKER_PROTOCOL, OCI_PROTOCOL};

/// Default number of concurrent transfers per batch.
pub const DEFAULT_BATCH_SIZE: usize = 8;

/// Default working directory for archive-producing runs.
pub const DEFAULT_WORKING_DIR: &str = "working-dir";

/// Where a run writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Local OCI layout root (`oci:<path>` or `oci://<path>`)
    Archive(PathBuf),
    /// Registry prefix (`docker://<registry>/<path>`), stored without the protocol
    Registry(String),
}

impl Destination {
    /// Parse a protocol-qualified destination.
    pub fn parse(raw: &str) -> Result<Self> {
        if let Some(rest) = raw.strip_prefix(DOCKER_PROTOCOL) {
            let registry = rest.trim_end_matches('/');
            if registry.is_empty() {
                return Err(MirrorError::Config(format!(
                    "destination '{}' has an empty registry reference",
                    raw
                )));
            }
            return Ok(Self::Registry(registry.to_string()));
        }
        if let Some(rest) = raw.strip_prefix(OCI_PROTOCOL) {
            let path = rest.strip_prefix("//").unwrap_or(rest);
            if path.is_empty() {
                return Err(MirrorError::Config(format!(
                    "destination '{}' has an empty path",
                    raw
                )));
            }
            return Ok(Self::Archive(PathBuf::from(path)));
        }
        Err(MirrorError::Config(format!(
            "destination '{}' must start with {} or {}",
            raw, OCI_PROTOCOL, DOCKER_PROTOCOL
        )))
    }

    pub fn mode(&self) -> MirrorMode {
        match self {
            Self::Archive(_) => MirrorMode::ToArchive,
            Self::Registry(_) => MirrorMode::ToRegistry,
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Archive(path) => write!(f, "{}{}", OCI_PROTOCOL, path.display()),
            Self::Registry(registry) => write!(f, "{}{}", DOCKER_PROTOCOL, registry),
        }
    }
}

/// Direction of a mirroring pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MirrorMode {
    /// Remote registry to local OCI layout
    ToArchive,
    /// Local OCI layout to destination registry
    ToRegistry,
}

impl std::fmt::Display for MirrorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ToArchive => write!(f, "mirrorToDisk"),
            Self::ToRegistry => write!(f, "diskToMirror"),
        }
    }
}

/// Log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level: tracing::Level = (*self).into();
        write!(f, "{}", level.as_str().to_lowercase())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!(
                "unknown log level: '{}' (supported: error, warn, info, debug, trace)",
                s
            )),
        }
    }
}

/// Options handed to every transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    /// Extra attempts after the first failure
    pub retries: u32,
    /// Verify TLS when talking to the source registry
    pub src_tls_verify: bool,
    /// Verify TLS when talking to the destination registry
    pub dest_tls_verify: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            retries: 2,
            src_tls_verify: true,
            dest_tls_verify: true,
        }
    }
}

/// Everything a mirroring run needs to know besides the declarative config.
#[derive(Debug, Clone)]
pub struct MirrorOptions {
    pub destination: Destination,
    /// Scratch and archive directory for archive-producing runs
    pub working_dir: PathBuf,
    /// Archive produced by a previous run, required for registry publishing
    pub from: Option<PathBuf>,
    pub force: bool,
    pub batch_size: usize,
    pub transfer: TransferOptions,
}

impl MirrorOptions {
    pub fn new(destination: Destination) -> Self {
        Self {
            destination,
            working_dir: PathBuf::from(DEFAULT_WORKING_DIR),
            from: None,
            force: false,
            batch_size: DEFAULT_BATCH_SIZE,
            transfer: TransferOptions::default(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_from(mut self, from: impl Into<PathBuf>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn mode(&self) -> MirrorMode {
        self.destination.mode()
    }

    /// Check flag combinations before any I/O happens.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(MirrorError::Config("batch size must be at least 1".to_string()));
        }
        if self.mode() == MirrorMode::ToRegistry && self.from.is_none() {
            return Err(MirrorError::Config(
                "--from is required when publishing to a registry".to_string(),
            ));
        }
        Ok(())
    }

    /// Root of the local archive this run reads or writes.
    ///
    /// Archive runs write under `<working-dir>/<destination path>`; registry
    /// runs read the archive named by `--from`.
    pub fn archive_root(&self) -> Result<PathBuf> {
        match &self.destination {
            Destination::Archive(path) => Ok(join_relative(&self.working_dir, path)),
            Destination::Registry(_) => self.from.clone().ok_or_else(|| {
                MirrorError::Config("--from is required when publishing to a registry".to_string())
            }),
        }
    }

    pub fn layout(&self) -> Result<ArchiveLayout> {
        Ok(ArchiveLayout::new(self.archive_root()?))
    }

    /// Registry prefix for publishing runs.
    pub fn registry(&self) -> Option<&str> {
        match &self.destination {
            Destination::Registry(registry) => Some(registry),
            Destination::Archive(_) => None,
        }
    }
}

fn join_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
