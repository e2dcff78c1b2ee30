/// Why a subscriber could not take a notification.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The subscriber's receiving end is gone.
    #[error("subscriber closed")]
    Closed,

    #[error("delivery refused: {0}")]
    Refused(String),
}
