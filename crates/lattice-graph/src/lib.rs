//! # lattice-graph
//!
//! The graph data model streamed to visualization clients, structured
//! graph errors with UI-facing metadata, and the [`builder::GraphBuilder`]
//! boundary behind which the query engine lives.

#![deny(unsafe_code)]

pub mod builder;
pub mod error;
pub mod types;

pub use builder::GraphBuilder;
pub use error::{GraphError, GraphErrorCategory};
pub use types::{Graph, Link, Meta, Node, Stats};
