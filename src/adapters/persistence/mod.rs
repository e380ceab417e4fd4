//! Persistence Adapters - Freshness Cache Backing Stores
//!
//! Implements the `KeyValueStore` port either in memory or as a single
//! atomically-replaced JSON document. No database dependency.

pub mod file_store;
pub mod memory;

pub use file_store::JsonFileStore;
pub use memory::MemoryStore;
