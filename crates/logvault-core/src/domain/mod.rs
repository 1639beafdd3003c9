//! Domain layer
//!
//! - `locking`: cross-process lock ledger, protocol and client
//! - `project`: on-disk project tree and its lifecycle manager

pub mod locking;
pub mod project;
