//! # drivesync Sync Engine
//!
//! Client side of the drivesync handshake.
//!
//! This crate provides:
//! - The sync engine, mirroring the server phase (idle → downstream →
//!   upstream → synced → idle)
//! - Marker clearing on server acknowledgment
//! - Lifecycle events (`connected`, `completed`, `synced`, `error`)
//! - Retry with exponential backoff
//! - HTTP transport abstraction
//!
//! ## Architecture
//!
//! The engine implements a **pull-then-push** cycle:
//! 1. `begin` a session (the server admits one per user)
//! 2. Pull remote changes and apply them without marking nodes
//! 3. Snapshot the dirty set and push it
//! 4. Clear markers of acknowledged paths, then `end` the session
//!
//! ## Key Invariants
//!
//! - At most one cycle in flight per engine
//! - A marker is cleared only after the server acknowledged that path in
//!   the current push, and only if the path was not written since the
//!   snapshot
//! - A remote change never overwrites a locally dirty node
//! - An out-of-order or lost session drops the token and the connection

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod events;
mod http;
mod state;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use events::{EventFeed, EventRecord, SyncEvent};
pub use http::{HttpClient, HttpTransport, LoopbackClient, LoopbackServer};
pub use state::{Resolution, SyncCycleResult, SyncEngine, SyncStats};
pub use transport::{MockTransport, SyncTransport};
