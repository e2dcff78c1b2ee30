use persist_types::{ErrorKind, Rejection, Summary};

use crate::error::VerifyError;
use crate::stage::{Parsed, StageDecision, VerifyContext, VerifyStage};

/// A new dynamic frame must list the current frame in its history.
pub struct FrameStage;

impl VerifyStage for FrameStage {
    fn name(&self) -> &str {
        "frame"
    }

    fn evaluate(
        &self,
        parsed: &Parsed,
        context: &VerifyContext<'_>,
    ) -> Result<StageDecision, VerifyError> {
        let Summary::DynamicBinding {
            address,
            frame,
            history,
            ..
        } = &parsed.summary
        else {
            return Ok(StageDecision::Pass);
        };

        match context.ledger.resolve_current_frame(address) {
            Some(current) if current == *frame => Ok(StageDecision::Pass),
            Some(current) if !history.contains(&current) => {
                Ok(StageDecision::Reject(Rejection::new(
                    ErrorKind::IllegalDynamicFrame,
                    format!(
                        "frame {} does not chain to current frame {}",
                        frame.short_hex(),
                        current.short_hex()
                    ),
                )))
            }
            None if context.config.strict_first_frame && !history.is_empty() => {
                Ok(StageDecision::Reject(Rejection::new(
                    ErrorKind::IllegalDynamicFrame,
                    format!(
                        "first frame {} claims {} prior frames",
                        frame.short_hex(),
                        history.len()
                    ),
                )))
            }
            _ => Ok(StageDecision::Pass),
        }
    }
}
