//! Built-in verification stages, in pipeline order.

pub mod authorship;
pub mod consistency;
pub mod frame;
pub mod lifetime;
pub mod signature;
pub mod target;

pub use authorship::AuthorshipStage;
pub use consistency::ConsistencyStage;
pub use frame::FrameStage;
pub use lifetime::LifetimeStage;
pub use signature::SignatureStage;
pub use target::TargetStage;
