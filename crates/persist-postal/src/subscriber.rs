use persist_types::Address;
use tokio::sync::mpsc;

use crate::error::DeliveryError;

/// One scheduled notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Notification {
    /// The address subscribers registered for.
    pub subscription: Address,
    /// What changed: a new frame, a request, or a debinding.
    pub notification: Address,
}

impl Notification {
    pub fn new(subscription: Address, notification: Address) -> Self {
        Self {
            subscription,
            notification,
        }
    }
}

/// Receives notifications for the addresses it is subscribed to.
///
/// Delivery runs on the notification worker; implementations should hand
/// the notification off rather than block.
pub trait Subscriber: Send + Sync {
    fn deliver(&self, subscription: Address, notification: Address) -> Result<(), DeliveryError>;
}

impl<F> Subscriber for F
where
    F: Fn(Address, Address) -> Result<(), DeliveryError> + Send + Sync,
{
    fn deliver(&self, subscription: Address, notification: Address) -> Result<(), DeliveryError> {
        self(subscription, notification)
    }
}

/// Forwards notifications into an unbounded channel.
#[derive(Clone, Debug)]
pub struct ChannelSubscriber {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelSubscriber {
    pub fn new(sender: mpsc::UnboundedSender<Notification>) -> Self {
        Self { sender }
    }

    /// A subscriber plus the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl Subscriber for ChannelSubscriber {
    fn deliver(&self, subscription: Address, notification: Address) -> Result<(), DeliveryError> {
        self.sender
            .send(Notification::new(subscription, notification))
            .map_err(|_| DeliveryError::Closed)
    }
}
