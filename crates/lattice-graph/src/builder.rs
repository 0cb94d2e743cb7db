//! The query-engine boundary.
//!
//! The engine that turns a query string into a graph lives outside this
//! workspace. The hub only depends on [`GraphBuilder`]; on failure it
//! ships [`error_graph`] instead of failing the connection.

use async_trait::async_trait;

use crate::error::GraphError;
use crate::types::Graph;

/// Builds a graph from a query string.
#[async_trait]
pub trait GraphBuilder: Send + Sync {
    /// Execute `query` and assemble a graph with at most `limit` nodes.
    async fn build_from_query(&self, query: &str, limit: usize) -> Result<Graph, GraphError>;
}

/// An empty graph carrying error metadata for UI display.
#[must_use]
pub fn error_graph(err: &GraphError) -> Graph {
    let mut g = Graph::empty();
    g.meta.config = err.to_meta();
    g
}
