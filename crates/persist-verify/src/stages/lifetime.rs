use persist_types::{ErrorKind, Rejection, Summary};

use crate::error::VerifyError;
use crate::stage::{Parsed, StageDecision, VerifyContext, VerifyStage};

/// Containers need a binding; nothing already debound may come back.
///
/// Debindings that arrived before their target are settled here, against
/// the arriving primitive.
///
/// A debound dynamic binding may still publish a new frame while something
/// else binds its address; that is a deliberate rebind.
pub struct LifetimeStage;

fn already_debound(address: &persist_types::Address) -> Rejection {
    Rejection::new(
        ErrorKind::AlreadyDebound,
        format!("{} carries a validated debinding", address.short_hex()),
    )
}

impl VerifyStage for LifetimeStage {
    fn name(&self) -> &str {
        "lifetime"
    }

    fn evaluate(
        &self,
        parsed: &Parsed,
        context: &VerifyContext<'_>,
    ) -> Result<StageDecision, VerifyError> {
        let ledger = context.ledger;
        let result = match &parsed.summary {
            Summary::Identity { .. } => Ok(()),
            Summary::Container { address, .. } => {
                if ledger.is_bound(address) {
                    Ok(())
                } else {
                    Err(Rejection::new(
                        ErrorKind::UnboundContainer,
                        format!(
                            "container {} has no binding and was collected immediately",
                            address.short_hex()
                        ),
                    ))
                }
            }
            Summary::DynamicBinding { address, .. } => {
                if ledger.is_debound_on_arrival(&parsed.summary) && !ledger.is_bound(address) {
                    Err(already_debound(address))
                } else {
                    Ok(())
                }
            }
            Summary::StaticBinding { address, .. }
            | Summary::Debinding { address, .. }
            | Summary::Request { address, .. } => {
                if ledger.is_debound_on_arrival(&parsed.summary) {
                    Err(already_debound(address))
                } else {
                    Ok(())
                }
            }
        };
        Ok(result.into())
    }
}
