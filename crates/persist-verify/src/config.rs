use serde::{Deserialize, Serialize};

/// Tunable verification rules.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Reject the first frame seen for a dynamic address if it claims any
    /// history.
    pub strict_first_frame: bool,
    /// Reject debindings whose target is not yet known, instead of staging
    /// them for later revalidation.
    pub require_known_debinding_target: bool,
}

impl VerifyConfig {
    /// Every optional rule enabled.
    pub fn strict() -> Self {
        Self {
            strict_first_frame: true,
            require_known_debinding_target: true,
        }
    }
}
