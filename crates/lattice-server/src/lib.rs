//! # lattice-server
//!
//! The connection hub of the Lattice graph-visualization server.
//!
//! - Admission-controlled connection registry with snapshot iteration
//! - Single-writer dispatch worker: all mailbox sends and closes happen on
//!   one task, turning slow consumers into evictions instead of races
//! - Per-connection read/write loops over an Axum WebSocket, with
//!   heartbeat pings and bounded write deadlines
//! - Background producers (job feed, status ticker, usage ticker, log
//!   streaming) submitting dispatch intents from any task
//! - Graceful shutdown via `CancellationToken` with tracked task handles

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod producers;
pub mod server;
pub mod shutdown;
pub mod websocket;
