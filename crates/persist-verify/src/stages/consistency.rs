use persist_types::{rules, ErrorKind, PrimitiveKind, Rejection, Summary};

use crate::error::VerifyError;
use crate::stage::{Parsed, StageDecision, VerifyContext, VerifyStage};

/// Only the original author may update a dynamic binding, a dynamic address
/// may not name any other primitive, and only the target's author (or a
/// request's recipient) may debind it.
pub struct ConsistencyStage;

impl VerifyStage for ConsistencyStage {
    fn name(&self) -> &str {
        "consistency"
    }

    fn evaluate(
        &self,
        parsed: &Parsed,
        context: &VerifyContext<'_>,
    ) -> Result<StageDecision, VerifyError> {
        let result = match &parsed.summary {
            Summary::DynamicBinding {
                address, author, ..
            } => match context.ledger.summary(address) {
                Some(existing) if existing.kind() != PrimitiveKind::DynamicBinding => {
                    Err(Rejection::new(
                        ErrorKind::IllegalDynamicFrame,
                        format!(
                            "dynamic address {} already names a {}",
                            address.short_hex(),
                            existing.kind()
                        ),
                    ))
                }
                Some(existing) if existing.author() != Some(*author) => Err(Rejection::new(
                    ErrorKind::InconsistentAuthor,
                    format!(
                        "{} is not the author of dynamic binding {}",
                        author.short_hex(),
                        address.short_hex()
                    ),
                )),
                _ => Ok(()),
            },
            Summary::Debinding { author, target, .. } => match context.ledger.summary(target) {
                Some(known) => rules::check_debinding_author(*author, &known),
                None => Ok(()),
            },
            _ => Ok(()),
        };
        Ok(result.into())
    }
}
