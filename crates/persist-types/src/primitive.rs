use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::Address;

/// The six primitive kinds the persister accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrimitiveKind {
    Identity,
    Container,
    StaticBinding,
    DynamicBinding,
    Debinding,
    Request,
}

impl PrimitiveKind {
    /// All kinds, in cold-start restore order.
    pub const RESTORE_ORDER: [PrimitiveKind; 6] = [
        PrimitiveKind::Identity,
        PrimitiveKind::Debinding,
        PrimitiveKind::StaticBinding,
        PrimitiveKind::DynamicBinding,
        PrimitiveKind::Container,
        PrimitiveKind::Request,
    ];

    /// Whether a static or dynamic binding may target this kind.
    pub fn is_bindable(self) -> bool {
        matches!(self, Self::Container)
    }

    /// Whether a debinding may target this kind.
    pub fn is_debindable(self) -> bool {
        matches!(
            self,
            Self::StaticBinding | Self::DynamicBinding | Self::Debinding | Self::Request
        )
    }

    /// Short lowercase label, used in logs and CLI output.
    pub fn label(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Container => "container",
            Self::StaticBinding => "static-binding",
            Self::DynamicBinding => "dynamic-binding",
            Self::Debinding => "debinding",
            Self::Request => "request",
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lightweight, verified description of an ingested primitive.
///
/// A `Summary` holds everything the ledger, garbage collector and
/// notification scheduler need to reason about a primitive without touching
/// its packed bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Summary {
    Identity {
        address: Address,
        /// Ed25519 verifying key declared by the identity.
        signing_key: [u8; 32],
    },
    Container {
        address: Address,
        author: Address,
    },
    StaticBinding {
        address: Address,
        author: Address,
        target: Address,
    },
    DynamicBinding {
        /// Stable outer address.
        address: Address,
        /// Address of this specific frame.
        frame: Address,
        author: Address,
        target: Address,
        /// Prior frame addresses, most recent first.
        history: Vec<Address>,
    },
    Debinding {
        address: Address,
        author: Address,
        target: Address,
    },
    Request {
        address: Address,
        recipient: Address,
    },
}

impl Summary {
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Self::Identity { .. } => PrimitiveKind::Identity,
            Self::Container { .. } => PrimitiveKind::Container,
            Self::StaticBinding { .. } => PrimitiveKind::StaticBinding,
            Self::DynamicBinding { .. } => PrimitiveKind::DynamicBinding,
            Self::Debinding { .. } => PrimitiveKind::Debinding,
            Self::Request { .. } => PrimitiveKind::Request,
        }
    }

    /// The primary address. For dynamic bindings this is the dynamic address.
    pub fn address(&self) -> Address {
        match self {
            Self::Identity { address, .. }
            | Self::Container { address, .. }
            | Self::StaticBinding { address, .. }
            | Self::DynamicBinding { address, .. }
            | Self::Debinding { address, .. }
            | Self::Request { address, .. } => *address,
        }
    }

    /// The address the packed bytes are stored under. Dynamic bindings are
    /// stored per frame.
    pub fn storage_address(&self) -> Address {
        match self {
            Self::DynamicBinding { frame, .. } => *frame,
            other => other.address(),
        }
    }

    /// The signing author, if the primitive has one.
    pub fn author(&self) -> Option<Address> {
        match self {
            Self::Container { author, .. }
            | Self::StaticBinding { author, .. }
            | Self::DynamicBinding { author, .. }
            | Self::Debinding { author, .. } => Some(*author),
            Self::Identity { .. } | Self::Request { .. } => None,
        }
    }

    /// The target of a binding or debinding.
    pub fn target(&self) -> Option<Address> {
        match self {
            Self::StaticBinding { target, .. }
            | Self::DynamicBinding { target, .. }
            | Self::Debinding { target, .. } => Some(*target),
            _ => None,
        }
    }

    /// The party that must already be a known identity: the author, or the
    /// recipient for requests.
    pub fn party(&self) -> Option<Address> {
        match self {
            Self::Request { recipient, .. } => Some(*recipient),
            other => other.author(),
        }
    }

    /// The identity entitled to debind this primitive: the author, or the
    /// recipient for requests.
    pub fn debinder(&self) -> Option<Address> {
        self.party()
    }
}
