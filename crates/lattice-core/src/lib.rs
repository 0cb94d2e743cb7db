//! # lattice-core
//!
//! Foundation types shared across the Lattice workspace:
//!
//! - Branded ID newtypes (UUID v7, time-ordered)
//! - Server-pushed wire messages ([`messages::ServerMessage`])
//! - Job types and the scheduler/usage-tracker boundary traits

#![deny(unsafe_code)]

pub mod ids;
pub mod jobs;
pub mod messages;
