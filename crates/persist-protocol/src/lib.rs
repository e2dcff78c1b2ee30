//! Peer protocol for the persister.
//!
//! Persisters replicate to each other over a request/response protocol with
//! one server push, the subscription update. Frames are length-prefixed and
//! tagged; negative acknowledgements carry the rejection code as two
//! big-endian bytes so peers agree on it bit for bit.

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{FrameBuffer, PeerCodec};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{Envelope, Nak, PeerMessage, MAX_MESSAGE_SIZE, PROTOCOL_VERSION};
