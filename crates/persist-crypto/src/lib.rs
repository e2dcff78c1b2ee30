//! Cryptographic primitives for the persister.
//!
//! Provides domain-separated BLAKE3 addressing, Ed25519 signing and
//! verification, and the packed wire format of the six primitive kinds.
//!
//! # Key Types
//!
//! - [`ContentHasher`]: per-kind address derivation
//! - [`SigningKey`] / [`VerifyingKey`] / [`Signature`]: Ed25519 wrappers
//! - [`Primitive`]: any loaded primitive, with [`WirePrimitive`] for the
//!   per-kind pack and load
//! - [`Author`]: a private identity that mints signed primitives

pub mod author;
pub mod hasher;
pub mod primitive;
pub mod signer;

pub use author::Author;
pub use hasher::ContentHasher;
pub use primitive::{
    Container, Debinding, DynamicBinding, IdentityDecl, Primitive, Request, StaticBinding,
    WireError, WirePrimitive,
};
pub use signer::{Signature, SignatureError, SigningKey, VerifyingKey};
