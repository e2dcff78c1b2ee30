use persist_types::{ErrorKind, PrimitiveKind, Rejection};

use crate::error::VerifyError;
use crate::stage::{Parsed, StageDecision, VerifyContext, VerifyStage};

/// The author (or a request's recipient) must be a known identity.
pub struct AuthorshipStage;

impl VerifyStage for AuthorshipStage {
    fn name(&self) -> &str {
        "authorship"
    }

    fn evaluate(
        &self,
        parsed: &Parsed,
        context: &VerifyContext<'_>,
    ) -> Result<StageDecision, VerifyError> {
        let Some(party) = parsed.summary.party() else {
            return Ok(StageDecision::Pass);
        };
        let known = context
            .ledger
            .summary(&party)
            .is_some_and(|s| s.kind() == PrimitiveKind::Identity);
        if known {
            Ok(StageDecision::Pass)
        } else {
            Ok(StageDecision::Reject(Rejection::new(
                ErrorKind::UnknownIdentity,
                format!("{} is not a known identity", party.short_hex()),
            )))
        }
    }
}
