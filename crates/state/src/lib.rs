//! Block and state store interfaces, in-memory implementations, and the
//! one-height [`rollback`] used to recover from a crash between block and
//! state persistence.

pub mod memory;
pub mod rollback;
pub mod store;

pub use memory::{MemoryBlockStore, MemoryStateStore};
pub use rollback::{rollback, RollbackError, RolledBack};
pub use store::{BlockStore, StateStore};
