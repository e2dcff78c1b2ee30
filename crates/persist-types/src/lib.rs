//! Foundation types for the persister.
//!
//! Every other persister crate depends on `persist-types`.
//!
//! # Key Types
//!
//! - [`Address`]: content address (BLAKE3) of a primitive
//! - [`PrimitiveKind`]: the six primitive kinds
//! - [`Summary`]: verified, lightweight description of an ingested primitive
//! - [`ErrorKind`] / [`Rejection`]: why a primitive was refused, with the
//!   16-bit codes peers exchange

pub mod address;
pub mod error;
pub mod primitive;
pub mod rejection;
pub mod rules;

pub use address::Address;
pub use error::TypeError;
pub use primitive::{PrimitiveKind, Summary};
pub use rejection::{ErrorKind, Rejection};
