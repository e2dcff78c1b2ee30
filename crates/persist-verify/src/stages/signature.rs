use persist_crypto::VerifyingKey;
use persist_types::{ErrorKind, Rejection, Summary};

use crate::error::VerifyError;
use crate::stage::{Parsed, StageDecision, VerifyContext, VerifyStage};

/// Check the author's Ed25519 signature over the primitive's address.
pub struct SignatureStage;

impl VerifyStage for SignatureStage {
    fn name(&self) -> &str {
        "signature"
    }

    fn evaluate(
        &self,
        parsed: &Parsed,
        context: &VerifyContext<'_>,
    ) -> Result<StageDecision, VerifyError> {
        let Some(author) = parsed.summary.author() else {
            return Ok(StageDecision::Pass);
        };
        let signing_key = match context.ledger.summary(&author) {
            Some(Summary::Identity { signing_key, .. }) => signing_key,
            _ => {
                return Err(VerifyError::stage(
                    self.name(),
                    format!("author {} vanished after authorship check", author.short_hex()),
                ))
            }
        };
        // Identity declarations with bad key points never load, so this
        // only fails on a corrupted ledger.
        let key = VerifyingKey::decode(signing_key)
            .map_err(|e| VerifyError::stage(self.name(), e.to_string()))?;

        Ok(match parsed.primitive.verify_signature(&key) {
            Ok(()) => StageDecision::Pass,
            Err(e) => StageDecision::Reject(Rejection::new(
                ErrorKind::VerificationFailure,
                format!("{e} for {}", parsed.summary.storage_address().short_hex()),
            )),
        })
    }
}
