//! Notification scheduling and delivery for the persister.
//!
//! Dynamic binding updates and requests produce notifications for whoever
//! subscribed to the dynamic address or the request's recipient. Removals
//! produce one notification per debinding. Delivery is asynchronous, in
//! order per subscription, and one failing subscriber never blocks another.
//!
//! # Key Types
//!
//! - [`PostOffice`]: the scheduler and its delivery worker
//! - [`Subscriber`]: delivery callback; closures and [`ChannelSubscriber`]
//!   implement it
//! - [`WorkTracker`]: pending-work counter behind `await_idle`

pub mod error;
pub mod office;
pub mod subscriber;
pub mod work;

pub use error::DeliveryError;
pub use office::{PostOffice, PostalStats, SubscriptionId};
pub use subscriber::{ChannelSubscriber, Notification, Subscriber};
pub use work::WorkTracker;
