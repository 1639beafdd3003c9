//! Cross-process resource locking
//!
//! Lets many processes on one host serialize access to a named resource
//! without a database. A single coordinating process owns the ledger; every
//! other process is a worker that asks the coordinator over a Unix socket.
//!
//! # Architecture
//!
//! - **Ledger**: `LockLedger`, the in-memory `key -> holder` table
//! - **Lock Manager**: `LockManager`, bounded-retry `acquire` over the ledger
//! - **Protocol**: `RequestMessage` / `ResponseMessage` as JSON lines,
//!   served by `LockServer` and consumed by `WorkerChannel`
//! - **Client**: `LockClient`, the `lock` / `unlock` API every caller uses
//!
//! # Example
//!
//! ```ignore
//! use logvault_core::domain::locking::{LockClient, LockConfig};
//!
//! let client = LockClient::worker(LockConfig::default());
//! client.lock("dom/p1/project.inf").await?;
//! // read-modify-write the index...
//! client.unlock("dom/p1/project.inf").await?;
//! ```

pub mod channel;
pub mod client;
pub mod ledger;
pub mod manager;
pub mod protocol;
pub mod server;
pub mod types;

// Re-export main types
pub use channel::WorkerChannel;
pub use client::{LockClient, LockMode};
pub use ledger::LockLedger;
pub use manager::LockManager;
pub use protocol::{Message, RequestMessage, ResponseMessage};
pub use server::LockServer;
pub use types::{
    COORDINATOR_IDENTITY, LockCommand, LockConfig, LockEntry, LockError, LockResult,
    process_identity,
};
