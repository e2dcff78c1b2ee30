//! Garbage collector for the persister.
//!
//! The collector re-evaluates addresses whose reachability may have changed
//! and evicts what nothing keeps alive any more:
//!
//! - identities: never
//! - containers: once no binding targets them
//! - static bindings, debindings and requests: once validly debound
//! - dynamic bindings: once validly debound and not bound themselves
//! - debindings that failed revalidation: always
//!
//! Collecting a binding re-evaluates its target, so removing the last
//! binding of a container removes the container too.

pub mod error;
pub mod undertaker;

pub use error::GcError;
pub use undertaker::{GcStats, GcTask, Undertaker};
