//! Local store abstraction for reposync.
//!
//! This module provides the trait the synchronization core reads and writes
//! cached entities through, plus two implementations: an in-memory store
//! and a SQLite-backed store.
//!
//! # Design Principles
//! - Reactive reads: every `watch_*` stream re-emits after a commit that
//!   touches the table it reads from
//! - Atomic writes: a `WriteBatch` is applied as a whole or not at all
//! - Ordered re-assembly: `load_by_ids` returns rows in the requested order

pub mod config;
pub mod memory;
pub mod sqlite;
pub mod store;
pub mod tracker;

pub use config::{open_store, StoreConfig};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{LocalStore, Table, Watch, WriteBatch, WriteOp};
pub use tracker::InvalidationTracker;
