//! The persister: a content-addressed, signature-verified primitive store.
//!
//! [`Persister`] is the single entry point. It parses and verifies submitted
//! primitives, writes accepted ones to the content store, records them in
//! the lifetime ledger and hands follow-up work to the garbage collector and
//! the notification post office.
//!
//! # Quick Start
//!
//! ```rust
//! use persist_core::Persister;
//! use persist_crypto::{Author, WirePrimitive};
//!
//! # async fn demo() {
//! let persister = Persister::in_memory();
//! let alice = Author::generate();
//! let result = persister.ingest(&alice.declaration().pack().unwrap(), true).await.unwrap();
//! assert!(result.is_newly_stored());
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod persister;

pub use builder::PersisterBuilder;
pub use config::PersisterConfig;
pub use error::{PersistError, PersistResult};
pub use persister::{IngestResult, Persister, RestoreReport};

pub use persist_types::{Address, ErrorKind, PrimitiveKind, Rejection, Summary};
