//! Upgrade graph model.
//!
//! Mirrors the JSON served by the update service:
//! `{"nodes":[{"version","payload","metadata"}],"edges":[[from,to]]}` where
//! edges index into `nodes` and point from the older to the newer release.

use std::collections::{HashMap, VecDeque};

use semver::{Comparator, Op, Version, VersionReq};
use serde::Deserialize;

/// A release in the graph.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Node {
    pub version: Version,
    /// Release image reference, pinned by digest
    pub payload: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A release on an upgrade path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub version: Version,
    pub image: String,
}

impl From<&Node> for Update {
    fn from(node: &Node) -> Self {
        Self {
            version: node.version.clone(),
            image: node.payload.clone(),
        }
    }
}

/// A channel's upgrade graph.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<(usize, usize)>,
}

impl Graph {
    /// Highest version in the graph.
    pub fn latest(&self) -> Option<&Node> {
        self.nodes.iter().max_by(|a, b| a.version.cmp(&b.version))
    }

    /// Lowest version in the graph.
    pub fn earliest(&self) -> Option<&Node> {
        self.nodes.iter().min_by(|a, b| a.version.cmp(&b.version))
    }

    pub fn node(&self, version: &Version) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.version == version)
    }

    fn position(&self, version: &Version) -> Option<usize> {
        self.nodes.iter().position(|n| &n.version == version)
    }

    /// Releases in `[min, max]`, ordered by version.
    ///
    /// Pre-releases only match when a bound names the same major.minor.patch.
    pub fn in_range(&self, min: &Version, max: &Version) -> Vec<Update> {
        let req = VersionReq {
            comparators: vec![bound(Op::GreaterEq, min), bound(Op::LessEq, max)],
        };
        let mut updates: Vec<Update> = self
            .nodes
            .iter()
            .filter(|n| req.matches(&n.version))
            .map(Update::from)
            .collect();
        updates.sort_by(|a, b| a.version.cmp(&b.version));
        updates
    }

    /// Fewest-hop upgrade path from `from` to `to`, both endpoints included.
    ///
    /// Returns `None` when either version is absent or `to` is unreachable.
    pub fn shortest_path(&self, from: &Version, to: &Version) -> Option<Vec<Update>> {
        let start = self.position(from)?;
        let goal = self.position(to)?;

        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for &(a, b) in &self.edges {
            if a < self.nodes.len() && b < self.nodes.len() {
                adjacency[a].push(b);
            }
        }
        // Deterministic expansion order
        for targets in &mut adjacency {
            targets.sort_by(|&x, &y| self.nodes[x].version.cmp(&self.nodes[y].version));
        }

        let mut previous: Vec<Option<usize>> = vec![None; self.nodes.len()];
        let mut visited = vec![false; self.nodes.len()];
        let mut queue = VecDeque::from([start]);
        visited[start] = true;

        while let Some(current) = queue.pop_front() {
            if current == goal {
                let mut path = vec![Update::from(&self.nodes[current])];
                let mut cursor = current;
                while let Some(prev) = previous[cursor] {
                    path.push(Update::from(&self.nodes[prev]));
                    cursor = prev;
                }
                path.reverse();
                return Some(path);
            }
            for &next in &adjacency[current] {
                if !visited[next] {
                    visited[next] = true;
                    previous[next] = Some(current);
                    queue.push_back(next);
                }
            }
        }
        None
    }

    /// Union `other` into this graph, identifying nodes by version.
    pub fn merge(&mut self, other: Graph) {
        let mut mapping = Vec::with_capacity(other.nodes.len());
        for node in other.nodes {
            let index = match self.position(&node.version) {
                Some(existing) => existing,
                None => {
                    self.nodes.push(node);
                    self.nodes.len() - 1
                }
            };
            mapping.push(index);
        }
        for (a, b) in other.edges {
            if let (Some(&a), Some(&b)) = (mapping.get(a), mapping.get(b)) {
                if !self.edges.contains(&(a, b)) {
                    self.edges.push((a, b));
                }
            }
        }
    }
}

fn bound(op: Op, version: &Version) -> Comparator {
    Comparator {
        op,
        major: version.major,
        minor: Some(version.minor),
        patch: Some(version.patch),
        pre: version.pre.clone(),
    }
}
