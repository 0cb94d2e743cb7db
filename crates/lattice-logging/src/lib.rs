//! # lattice-logging
//!
//! Structured logging with `tracing`, plus batched streaming of captured
//! log events to connected visualization clients.
//!
//! During query execution the server arms a per-query [`batcher::BatchSlot`];
//! the [`layer::ClientLogLayer`] captures every `tracing` event into the
//! armed batch. Batches flush immediately on warn-or-worse, on reaching the
//! batch size, and at end of query.

#![deny(unsafe_code)]

pub mod batcher;
pub mod layer;
pub mod types;

pub use batcher::BatchSlot;
pub use layer::ClientLogLayer;
pub use types::{LogBatch, LogLevel, LogMessage};
