//! Release channel resolution against the upgrade graph.
//!
//! Turns the declared release channels into the set of release images to
//! mirror:
//!
//! ```text
//!  channel ──► bounds (explicit, or latest / earliest from the graph)
//!          ──► shortest upgrade path  or  every release in [min, max]
//!          ──► per-architecture DigestSet
//!  all OCP channels ──► cross-channel path from lowest min to highest max
//!  every digest ──► signature fetch / verify / cache
//! ```
//!
//! Channel failures are collected and returned next to the digests; they do
//! not stop sibling channels.

mod client;
pub(crate) mod graph;
mod signature;

pub use client::{CincinnatiClient, GraphClient, OCP_GRAPH_URL, OKD_GRAPH_URL};
pub use graph::{Graph, Node, Update};
pub use signature::{
    NonEmptySignature, ReleaseSignatures, SignatureOutcome, SignatureStore, SignatureVerifier,
};

use std::sync::Arc;

use a3s_mirror_core::config::{ChannelType, ReleaseChannel};
use a3s_mirror_core::error::{MirrorError, Result};
use a3s_mirror_core::DigestSet;
use semver::Version;

/// Outcome of resolving every declared channel.
#[derive(Debug, Default)]
pub struct Resolution {
    pub digests: DigestSet,
    /// Per-channel failures, in encounter order
    pub errors: Vec<MirrorError>,
}

/// Resolves release channels into release image digests.
pub struct Resolver {
    ocp: Arc<dyn GraphClient>,
    okd: Arc<dyn GraphClient>,
    signatures: Option<Arc<dyn ReleaseSignatures>>,
}

impl Resolver {
    pub fn new(ocp: Arc<dyn GraphClient>, okd: Arc<dyn GraphClient>) -> Self {
        Self {
            ocp,
            okd,
            signatures: None,
        }
    }

    /// Run the signature step over every resolved digest.
    pub fn with_signatures(mut self, signatures: Arc<dyn ReleaseSignatures>) -> Self {
        self.signatures = Some(signatures);
        self
    }

    fn client(&self, channel: &ReleaseChannel) -> Result<&dyn GraphClient> {
        match channel.channel_type {
            ChannelType::Ocp => Ok(self.ocp.as_ref()),
            ChannelType::Okd => Ok(self.okd.as_ref()),
            ChannelType::Unknown => Err(MirrorError::resolution(
                &channel.name,
                "channel type must be ocp or okd",
            )),
        }
    }

    /// Resolve `channels` for every architecture.
    ///
    /// Bounds derived from the graph are written back into `channels`.
    pub async fn resolve(
        &self,
        channels: &mut [ReleaseChannel],
        architectures: &[String],
    ) -> Resolution {
        let mut resolution = Resolution::default();

        for arch in architectures {
            let mut arch_digests = DigestSet::new();

            for channel in channels.iter_mut() {
                match self.resolve_channel(channel, arch).await {
                    Ok(digests) => {
                        tracing::info!(
                            channel = %channel.name,
                            arch = %arch,
                            min = %channel.min_version,
                            max = %channel.max_version,
                            releases = digests.len(),
                            "Resolved release channel"
                        );
                        arch_digests.merge(&digests);
                    }
                    Err(e) => {
                        tracing::error!(
                            channel = %channel.name,
                            arch = %arch,
                            error = %e,
                            "Channel resolution failed"
                        );
                        resolution.errors.push(e);
                    }
                }
            }

            if channels.len() > 1 {
                match self.resolve_cross_channel(channels, arch).await {
                    Ok(digests) => arch_digests.merge(&digests),
                    Err(e) => {
                        tracing::error!(arch = %arch, error = %e, "Cross-channel resolution failed");
                        resolution.errors.push(e);
                    }
                }
            }

            resolution.digests.merge(&arch_digests);
        }

        if let Some(signatures) = &self.signatures {
            for image in resolution.digests.iter() {
                if let Err(e) = signatures.verify_and_cache(image).await {
                    tracing::warn!(image = %image, error = %e, "Release signature step failed");
                }
            }
        }

        resolution
    }

    /// Fill in missing bounds and collect the channel's release images.
    async fn resolve_channel(&self, channel: &mut ReleaseChannel, arch: &str) -> Result<DigestSet> {
        let client = self.client(channel)?;

        if !channel.min_version.is_empty() && !channel.max_version.is_empty() {
            channel.full = true;
        } else {
            if channel.max_version.is_empty() {
                let latest = client.resolve_channel_bound(&channel.name, arch, false).await?;
                channel.max_version = latest.to_string();
                if channel.min_version.is_empty() && channel.heads_only() {
                    channel.min_version = channel.max_version.clone();
                }
            }
            if channel.min_version.is_empty() {
                let earliest = client.resolve_channel_bound(&channel.name, arch, true).await?;
                channel.min_version = earliest.to_string();
            }
        }

        let min = parse_version(&channel.name, &channel.min_version)?;
        let max = parse_version(&channel.name, &channel.max_version)?;
        let graph = client.fetch_graph(&channel.name, arch).await?;

        let updates = if channel.shortest_path {
            graph.shortest_path(&min, &max).ok_or_else(|| {
                MirrorError::resolution(
                    &channel.name,
                    format!("no upgrade path from {} to {}", min, max),
                )
            })?
        } else {
            graph.in_range(&min, &max)
        };

        if updates.is_empty() {
            return Err(MirrorError::resolution(
                &channel.name,
                format!("no releases between {} and {}", min, max),
            ));
        }
        Ok(updates.into_iter().map(|u| u.image).collect())
    }

    /// Upgrade path from the lowest OCP minimum to the highest OCP maximum.
    async fn resolve_cross_channel(
        &self,
        channels: &[ReleaseChannel],
        arch: &str,
    ) -> Result<DigestSet> {
        let mut lowest: Option<(&str, Version)> = None;
        let mut highest: Option<(&str, Version)> = None;

        for channel in channels
            .iter()
            .filter(|c| c.channel_type == ChannelType::Ocp)
        {
            // Channels that failed to resolve were already reported
            if let Ok(min) = Version::parse(&channel.min_version) {
                if lowest.as_ref().map_or(true, |(_, v)| &min < v) {
                    lowest = Some((channel.name.as_str(), min));
                }
            }
            if let Ok(max) = Version::parse(&channel.max_version) {
                if highest.as_ref().map_or(true, |(_, v)| &max > v) {
                    highest = Some((channel.name.as_str(), max));
                }
            }
        }

        let (Some((low_channel, min)), Some((high_channel, max))) = (lowest, highest) else {
            return Ok(DigestSet::new());
        };

        let mut graph = Graph::default();
        for name in channels_between(low_channel, high_channel) {
            graph.merge(self.ocp.fetch_graph(&name, arch).await?);
        }

        let label = format!("{}..{}", low_channel, high_channel);
        let path = graph.shortest_path(&min, &max).ok_or_else(|| {
            MirrorError::resolution(&label, format!("no upgrade path from {} to {}", min, max))
        })?;

        tracing::info!(
            channels = %label,
            from = %min,
            to = %max,
            releases = path.len(),
            "Resolved cross-channel upgrade path"
        );
        Ok(path.into_iter().map(|u| u.image).collect())
    }
}

fn parse_version(channel: &str, raw: &str) -> Result<Version> {
    Version::parse(raw)
        .map_err(|e| MirrorError::resolution(channel, format!("invalid version '{}': {}", raw, e)))
}

/// Channel names from `low` to `high` inclusive.
///
/// Names shaped `<prefix>-<major>.<minor>` with a shared prefix and major are
/// expanded minor by minor; anything else yields just the two endpoints.
fn channels_between(low: &str, high: &str) -> Vec<String> {
    if low == high {
        return vec![low.to_string()];
    }
    if let (Some((lp, lmaj, lmin)), Some((hp, hmaj, hmin))) =
        (split_channel(low), split_channel(high))
    {
        if lp == hp && lmaj == hmaj && lmin <= hmin {
            return (lmin..=hmin)
                .map(|minor| format!("{}-{}.{}", lp, lmaj, minor))
                .collect();
        }
    }
    vec![low.to_string(), high.to_string()]
}

fn split_channel(name: &str) -> Option<(&str, u64, u64)> {
    let (prefix, version) = name.rsplit_once('-')?;
    let (major, minor) = version.split_once('.')?;
    Some((prefix, major.parse().ok()?, minor.parse().ok()?))
}
