//! Graph wire types.
//!
//! A [`Graph`] is the primary payload class streamed to clients. Nodes and
//! links carry server-computed visibility so the frontend renders without
//! re-filtering.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One node in the visualization graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Stable node identifier.
    pub id: String,
    /// Node type/category label (lowercase).
    #[serde(rename = "type")]
    pub node_type: String,
    /// Display label.
    pub label: String,
    /// Whether the node should be rendered.
    pub visible: bool,
    /// Engine-defined attributes.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Node {
    /// Create a visible node with no metadata.
    #[must_use]
    pub fn new(id: impl Into<String>, node_type: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            label: label.into(),
            visible: true,
            metadata: HashMap::new(),
        }
    }
}

/// One edge in the visualization graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Source node ID.
    pub source: String,
    /// Target node ID.
    pub target: String,
    /// Display label (typically the predicate).
    pub label: String,
    /// Whether the link should be hidden (either endpoint hidden).
    #[serde(default)]
    pub hidden: bool,
}

impl Link {
    /// Create a visible link.
    #[must_use]
    pub fn new(source: impl Into<String>, target: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            label: label.into(),
            hidden: false,
        }
    }
}

/// Node/edge totals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Total nodes in the graph.
    pub total_nodes: usize,
    /// Total links in the graph.
    pub total_edges: usize,
}

/// Graph metadata rendered alongside the canvas.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// When the graph was generated (RFC 3339).
    pub generated_at: String,
    /// Node/edge totals.
    pub stats: Stats,
    /// Free-form key/value config shown in the UI (error metadata,
    /// descriptions).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, String>,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            generated_at: chrono::Utc::now().to_rfc3339(),
            stats: Stats::default(),
            config: HashMap::new(),
        }
    }
}

/// The full graph payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    /// All nodes, sorted by ID for stable output.
    pub nodes: Vec<Node>,
    /// All links.
    pub links: Vec<Link>,
    /// Metadata.
    pub meta: Meta,
}

impl Graph {
    /// An empty graph with fresh metadata.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// An empty graph carrying a UI description (e.g. after `clear`).
    #[must_use]
    pub fn empty_with_description(description: &str) -> Self {
        let mut g = Self::default();
        let _ = g
            .meta
            .config
            .insert("description".into(), description.into());
        g
    }

    /// Recompute `meta.stats` from the current node/link counts.
    pub fn update_stats(&mut self) {
        self.meta.stats = Stats {
            total_nodes: self.nodes.len(),
            total_edges: self.links.len(),
        };
    }
}
