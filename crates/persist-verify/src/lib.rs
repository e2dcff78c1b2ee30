//! Verification pipeline for the persister.
//!
//! Every submitted primitive is parsed against the six primitive schemas and
//! then run through a fail-fast pipeline of stages. The pipeline reads the
//! ledger but never writes it, so a rejection leaves no partial state.
//!
//! # Quick Start
//!
//! ```rust
//! use persist_crypto::{Author, WirePrimitive};
//! use persist_ledger::Ledger;
//! use persist_verify::Verifier;
//!
//! let ledger = Ledger::new();
//! let verifier = Verifier::default();
//! let alice = Author::generate();
//! let parsed = verifier.parse(&alice.declaration().pack().unwrap()).unwrap();
//! assert!(verifier.verify(&parsed, &ledger).unwrap().is_accepted());
//! ```

pub mod config;
pub mod error;
pub mod stage;
pub mod stages;
pub mod verifier;

pub use config::VerifyConfig;
pub use error::VerifyError;
pub use stage::{Parsed, StageDecision, StageResult, VerifyContext, VerifyStage};
pub use stages::{
    AuthorshipStage, ConsistencyStage, FrameStage, LifetimeStage, SignatureStage, TargetStage,
};
pub use verifier::{Verdict, Verifier};
