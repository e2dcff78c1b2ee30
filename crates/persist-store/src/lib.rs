//! Content store for the persister.
//!
//! A content store is a durable address → bytes mapping. It never parses
//! what it holds; the ingestion path decides what may be stored.
//!
//! # Key Types
//!
//! - [`ContentStore`]: the backend trait
//! - [`MemoryStore`]: HashMap-backed, for tests and embedding
//! - [`DiskStore`]: one file per address under a cache directory

pub mod disk;
pub mod error;
pub mod memory;
pub mod traits;

pub use disk::DiskStore;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use traits::{ContentStore, Enumeration};
