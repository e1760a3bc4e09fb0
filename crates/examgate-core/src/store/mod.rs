//! Durable key/value storage.
//!
//! This module provides the `DurableStore` trait and two backends:
//! - `FileStore`: a single JSON document in the cache directory that survives
//!   process restarts
//! - `MemoryStore`: an in-process map for tests and throwaway sessions
//!
//! Both the session credential and the exam timer deadlines live here. There
//! are no multi-key transactions; a read right after a write observes it.

pub mod file;
pub mod memory;

use anyhow::Result;

pub use file::FileStore;
pub use memory::MemoryStore;

/// String-keyed storage that outlives a single run of the client.
pub trait DurableStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}
