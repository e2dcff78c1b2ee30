use std::time::{Duration, Instant};

use persist_crypto::Primitive;
use persist_ledger::Ledger;
use persist_types::{ErrorKind, Rejection};
use tracing::debug;

use crate::config::VerifyConfig;
use crate::error::VerifyError;
use crate::stage::{Parsed, StageDecision, StageResult, VerifyContext, VerifyStage};
use crate::stages::{
    AuthorshipStage, ConsistencyStage, FrameStage, LifetimeStage, SignatureStage, TargetStage,
};

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// The outcome of running a primitive through the full pipeline.
#[derive(Clone, Debug)]
pub struct Verdict {
    /// `None` when every stage passed.
    pub rejection: Option<Rejection>,
    /// Per-stage results in evaluation order.
    pub stage_results: Vec<StageResult>,
    pub elapsed: Duration,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        self.rejection.is_none()
    }

    pub fn into_result(self) -> Result<(), Rejection> {
        match self.rejection {
            None => Ok(()),
            Some(rejection) => Err(rejection),
        }
    }
}

// ---------------------------------------------------------------------------
// Verifier
// ---------------------------------------------------------------------------

/// Parses submitted bytes and runs them through an ordered list of stages.
///
/// Verification never mutates the ledger. A rejected primitive leaves no
/// trace.
pub struct Verifier {
    stages: Vec<Box<dyn VerifyStage>>,
    config: VerifyConfig,
}

impl Verifier {
    /// A verifier with an empty pipeline.
    pub fn new(config: VerifyConfig) -> Self {
        Self {
            stages: Vec::new(),
            config,
        }
    }

    /// The standard pipeline:
    /// authorship -> signature -> target -> frame -> consistency -> lifetime
    pub fn with_default_stages(config: VerifyConfig) -> Self {
        let mut verifier = Self::new(config);
        verifier.add_stage(Box::new(AuthorshipStage));
        verifier.add_stage(Box::new(SignatureStage));
        verifier.add_stage(Box::new(TargetStage));
        verifier.add_stage(Box::new(FrameStage));
        verifier.add_stage(Box::new(ConsistencyStage));
        verifier.add_stage(Box::new(LifetimeStage));
        verifier
    }

    pub fn add_stage(&mut self, stage: Box<dyn VerifyStage>) {
        self.stages.push(stage);
    }

    pub fn config(&self) -> &VerifyConfig {
        &self.config
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Load bytes against every primitive schema.
    pub fn parse(&self, bytes: &[u8]) -> Result<Parsed, Rejection> {
        let primitive = Primitive::unpack(bytes)
            .map_err(|e| Rejection::new(ErrorKind::MalformedPrimitive, e.to_string()))?;
        let summary = primitive.summarize();
        Ok(Parsed {
            primitive,
            summary,
            packed: bytes.to_vec(),
        })
    }

    /// Run every stage, stopping at the first rejection.
    pub fn verify(&self, parsed: &Parsed, ledger: &Ledger) -> Result<Verdict, VerifyError> {
        let pipeline_start = Instant::now();
        let context = VerifyContext {
            ledger,
            config: &self.config,
        };
        let mut stage_results = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            let stage_start = Instant::now();
            let decision = stage.evaluate(parsed, &context)?;
            let reason = match &decision {
                StageDecision::Pass => None,
                StageDecision::Reject(rejection) => Some(rejection.to_string()),
            };
            stage_results.push(StageResult {
                stage_name: stage.name().to_string(),
                passed: decision.is_pass(),
                reason,
                elapsed: stage_start.elapsed(),
            });

            if let StageDecision::Reject(rejection) = decision {
                debug!(
                    address = %parsed.summary.storage_address(),
                    stage = stage.name(),
                    reason = %rejection,
                    "primitive rejected"
                );
                return Ok(Verdict {
                    rejection: Some(rejection),
                    stage_results,
                    elapsed: pipeline_start.elapsed(),
                });
            }
        }

        Ok(Verdict {
            rejection: None,
            stage_results,
            elapsed: pipeline_start.elapsed(),
        })
    }
}

impl Default for Verifier {
    fn default() -> Self {
        Self::with_default_stages(VerifyConfig::default())
    }
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.stages.iter().map(|s| s.name()).collect();
        f.debug_struct("Verifier")
            .field("stages", &names)
            .field("config", &self.config)
            .finish()
    }
}
