//! Structured graph errors.
//!
//! Query failures never take down a connection: they become a degraded
//! graph whose metadata carries the category, subcategory, and a
//! user-facing message for the UI error panel.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Broad failure category, shown in the UI and used for log routing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphErrorCategory {
    /// Query text failed to parse.
    Parse,
    /// Query executed but the store failed.
    Query,
    /// Graph assembly failed.
    Graph,
    /// Underlying storage failure.
    Storage,
}

impl std::fmt::Display for GraphErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse => f.write_str("parse"),
            Self::Query => f.write_str("query"),
            Self::Graph => f.write_str("graph"),
            Self::Storage => f.write_str("storage"),
        }
    }
}

/// A failure while turning a query into a graph.
#[derive(Debug, thiserror::Error)]
#[error("{user_message}")]
pub struct GraphError {
    /// Failure category.
    pub category: GraphErrorCategory,
    /// Optional finer-grained label (e.g. `"invalid_syntax"`).
    pub subcategory: Option<String>,
    /// Message safe to show the user.
    pub user_message: String,
    /// Underlying cause, when one exists.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl GraphError {
    /// Create a new error with a user-facing message.
    #[must_use]
    pub fn new(category: GraphErrorCategory, user_message: impl Into<String>) -> Self {
        Self {
            category,
            subcategory: None,
            user_message: user_message.into(),
            source: None,
        }
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Attach a subcategory label.
    #[must_use]
    pub fn with_subcategory(mut self, subcategory: impl Into<String>) -> Self {
        self.subcategory = Some(subcategory.into());
        self
    }

    /// Metadata for a degraded graph's `meta.config`.
    #[must_use]
    pub fn to_meta(&self) -> HashMap<String, String> {
        let mut meta = HashMap::new();
        let _ = meta.insert("error".to_owned(), self.user_message.clone());
        let _ = meta.insert("error_category".to_owned(), self.category.to_string());
        if let Some(sub) = &self.subcategory {
            let _ = meta.insert("error_subcategory".to_owned(), sub.clone());
        }
        if let Some(source) = &self.source {
            let _ = meta.insert("error_detail".to_owned(), source.to_string());
        }
        meta
    }
}
