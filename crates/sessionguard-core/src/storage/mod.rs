//! Persistent key-value storage for session data.
//!
//! The session manager persists through the synchronous [`KeyValueStore`]
//! trait. Two implementations ship with the crate:
//! - `MemoryStore`: process-local, used in tests and embedded setups
//! - `FileStore`: one JSON file per key, optionally encrypted with `StoreCipher`

pub mod cipher;
pub mod file;
pub mod memory;

use anyhow::Result;

pub use cipher::StoreCipher;
pub use file::FileStore;
pub use memory::MemoryStore;

/// Client-local key-value storage.
///
/// `set` replaces the whole value for a key in one step; readers never see a
/// partially written value. `remove` on a missing key is not an error.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}
