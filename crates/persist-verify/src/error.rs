/// Errors that abort verification itself, as opposed to a primitive being
/// rejected.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VerifyError {
    /// A stage hit an internal inconsistency.
    #[error("stage error in '{stage}': {message}")]
    StageError { stage: String, message: String },
}

impl VerifyError {
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StageError {
            stage: stage.into(),
            message: message.into(),
        }
    }
}
