use persist_types::{rules, ErrorKind, Rejection, Summary};

use crate::error::VerifyError;
use crate::stage::{Parsed, StageDecision, VerifyContext, VerifyStage};

/// Bindings may only target containers; debindings only bindings,
/// debindings and requests. Unknown targets pass unless configured
/// otherwise for debindings.
pub struct TargetStage;

impl VerifyStage for TargetStage {
    fn name(&self) -> &str {
        "target"
    }

    fn evaluate(
        &self,
        parsed: &Parsed,
        context: &VerifyContext<'_>,
    ) -> Result<StageDecision, VerifyError> {
        let summary = &parsed.summary;
        let Some(target) = summary.target() else {
            return Ok(StageDecision::Pass);
        };
        let known = context.ledger.summary(&target);

        let result = match (summary, known) {
            (Summary::StaticBinding { .. } | Summary::DynamicBinding { .. }, Some(known)) => {
                rules::check_binding_target(&known)
            }
            (Summary::Debinding { .. }, Some(known)) => rules::check_debinding_target(&known),
            (Summary::Debinding { .. }, None)
                if context.config.require_known_debinding_target =>
            {
                Err(Rejection::new(
                    ErrorKind::InvalidTarget,
                    format!("debinding target {} is unknown", target.short_hex()),
                ))
            }
            _ => Ok(()),
        };
        Ok(result.into())
    }
}
