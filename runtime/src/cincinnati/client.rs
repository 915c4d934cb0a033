//! Upgrade graph service client.

use async_trait::async_trait;
use semver::Version;
use uuid::Uuid;

use a3s_mirror_core::error::{MirrorError, Result};

use super::graph::Graph;

/// OCP update service endpoint.
pub const OCP_GRAPH_URL: &str = "https://api.openshift.com/api/upgrades_info/v1/graph";

/// OKD update service endpoint.
pub const OKD_GRAPH_URL: &str = "https://amd64.origin.releases.ci.openshift.org/graph";

/// Capability for reading channel upgrade graphs.
#[async_trait]
pub trait GraphClient: Send + Sync {
    /// Fetch the upgrade graph of `channel` for `arch`.
    async fn fetch_graph(&self, channel: &str, arch: &str) -> Result<Graph>;

    /// Latest (or earliest, when `want_minimum`) release of a channel.
    async fn resolve_channel_bound(
        &self,
        channel: &str,
        arch: &str,
        want_minimum: bool,
    ) -> Result<Version> {
        let graph = self.fetch_graph(channel, arch).await?;
        let node = if want_minimum {
            graph.earliest()
        } else {
            graph.latest()
        };
        node.map(|n| n.version.clone())
            .ok_or_else(|| MirrorError::resolution(channel, "channel has no releases"))
    }
}

/// HTTP client for a Cincinnati-style update service.
pub struct CincinnatiClient {
    http: reqwest::Client,
    endpoint: String,
    id: Uuid,
}

impl CincinnatiClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            id: Uuid::new_v4(),
        }
    }

    pub fn ocp() -> Self {
        Self::new(OCP_GRAPH_URL)
    }

    pub fn okd() -> Self {
        Self::new(OKD_GRAPH_URL)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl GraphClient for CincinnatiClient {
    async fn fetch_graph(&self, channel: &str, arch: &str) -> Result<Graph> {
        tracing::debug!(
            endpoint = %self.endpoint,
            channel = %channel,
            arch = %arch,
            "Fetching upgrade graph"
        );

        let id = self.id.to_string();
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("channel", channel), ("arch", arch), ("id", id.as_str())])
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| MirrorError::resolution(channel, format!("graph request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MirrorError::resolution(
                channel,
                format!("graph service returned {}", status),
            ));
        }

        let graph: Graph = response
            .json()
            .await
            .map_err(|e| MirrorError::resolution(channel, format!("invalid graph: {}", e)))?;

        tracing::debug!(
            channel = %channel,
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "Fetched upgrade graph"
        );
        Ok(graph)
    }
}
