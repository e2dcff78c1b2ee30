use std::time::Duration;

use persist_crypto::Primitive;
use persist_ledger::Ledger;
use persist_types::{Rejection, Summary};

use crate::config::VerifyConfig;
use crate::error::VerifyError;

// ---------------------------------------------------------------------------
// Parsed
// ---------------------------------------------------------------------------

/// A structurally valid primitive, ready for the stage pipeline.
#[derive(Clone, Debug)]
pub struct Parsed {
    pub primitive: Primitive,
    pub summary: Summary,
    /// The exact bytes submitted.
    pub packed: Vec<u8>,
}

// ---------------------------------------------------------------------------
// StageDecision
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageDecision {
    Pass,
    Reject(Rejection),
}

impl StageDecision {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

impl From<Result<(), Rejection>> for StageDecision {
    fn from(result: Result<(), Rejection>) -> Self {
        match result {
            Ok(()) => Self::Pass,
            Err(rejection) => Self::Reject(rejection),
        }
    }
}

// ---------------------------------------------------------------------------
// StageResult
// ---------------------------------------------------------------------------

/// Recorded result from a completed stage evaluation.
#[derive(Clone, Debug)]
pub struct StageResult {
    pub stage_name: String,
    pub passed: bool,
    /// Populated on rejection.
    pub reason: Option<String>,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// VerifyContext
// ---------------------------------------------------------------------------

/// What every stage may consult. Stages only read the ledger.
pub struct VerifyContext<'a> {
    pub ledger: &'a Ledger,
    pub config: &'a VerifyConfig,
}

// ---------------------------------------------------------------------------
// VerifyStage trait
// ---------------------------------------------------------------------------

/// A single check in the verification pipeline.
///
/// Object-safe and `Send + Sync` so stages can be stored in a
/// `Vec<Box<dyn VerifyStage>>`.
pub trait VerifyStage: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(
        &self,
        parsed: &Parsed,
        context: &VerifyContext<'_>,
    ) -> Result<StageDecision, VerifyError>;
}
