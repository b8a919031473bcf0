//! Snapshot-based state sync.
//!
//! A freshly started node uses state sync to bootstrap from an application
//! snapshot served by its peers instead of replaying every block:
//!
//! 1. Peers advertise their snapshots; advertisements collect in a
//!    [`SnapshotPool`].
//! 2. The best snapshot is offered to the local application, which may
//!    accept it or reject it (alone, by format, or by sender).
//! 3. Chunks are fetched in parallel from every peer advertising the
//!    snapshot and applied in order through the [`AppConnSnapshot`].
//! 4. The restored application is checked against the trusted state from
//!    the [`StateProvider`], which is then handed back to the caller.
//!
//! Any failed candidate falls back to the next best one. Peers reach all of
//! this through the [`Reactor`], which also serves the node's own snapshots.

pub mod app;
pub mod chunks;
pub mod config;
pub mod error;
pub mod metrics;
pub mod provider;
pub mod reactor;
pub mod snapshots;
pub mod switch;
mod syncer;

pub use app::{
    AppConnQuery, AppConnSnapshot, AppInfo, ApplyChunkResponse, ApplyChunkResult,
    OfferSnapshotResult,
};
pub use chunks::{Chunk, ChunkQueue};
pub use config::StateSyncConfig;
pub use error::{RejectReason, SyncError};
pub use metrics::Metrics;
pub use provider::StateProvider;
pub use reactor::Reactor;
pub use snapshots::{Snapshot, SnapshotKey, SnapshotPool};
pub use switch::{Envelope, Switch};
