//! Packed primitive format.
//!
//! A packed primitive is a 4-byte magic tag followed by the bincode encoding
//! of the primitive's fields. Loading is strict: the magic must match, the
//! body must decode, and no bytes may trail the body.

use persist_types::{Address, PrimitiveKind, Summary};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::hasher::ContentHasher;
use crate::signer::{Signature, SignatureError, VerifyingKey};

/// Length of the leading magic tag.
pub const MAGIC_LEN: usize = 4;

/// Errors from packing or loading a primitive.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("packed primitive shorter than its magic tag ({0} bytes)")]
    Truncated(usize),

    #[error("magic tag {found:?} does not match {expected:?}")]
    BadMagic { expected: [u8; 4], found: [u8; 4] },

    #[error("body did not decode: {0}")]
    Decode(String),

    #[error("{0} trailing bytes after body")]
    TrailingBytes(u64),

    #[error("identity declares an invalid signing key")]
    InvalidKey,

    #[error("dynamic address {claimed} is not derived from its author and nonce")]
    ForeignDynamicAddress { claimed: Address },

    #[error("encoding failed: {0}")]
    Encode(String),

    #[error("bytes match no primitive schema")]
    NoSchema,
}

/// A primitive with a fixed packed layout.
pub trait WirePrimitive: Serialize + DeserializeOwned + Sized {
    const MAGIC: [u8; 4];
    const KIND: PrimitiveKind;

    /// Address the packed bytes are stored under.
    fn address(&self) -> Address;

    /// Extra structural checks run after decoding.
    fn validate(&self) -> Result<(), WireError> {
        Ok(())
    }

    fn pack(&self) -> Result<Vec<u8>, WireError> {
        let body = bincode::serialize(self).map_err(|e| WireError::Encode(e.to_string()))?;
        let mut out = Vec::with_capacity(MAGIC_LEN + body.len());
        out.extend_from_slice(&Self::MAGIC);
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn unpack(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < MAGIC_LEN {
            return Err(WireError::Truncated(data.len()));
        }
        let (magic, body) = data.split_at(MAGIC_LEN);
        if magic != Self::MAGIC {
            let mut found = [0u8; 4];
            found.copy_from_slice(magic);
            return Err(WireError::BadMagic {
                expected: Self::MAGIC,
                found,
            });
        }
        let value: Self =
            bincode::deserialize(body).map_err(|e| WireError::Decode(e.to_string()))?;
        let used = bincode::serialized_size(&value).map_err(|e| WireError::Decode(e.to_string()))?;
        let total = body.len() as u64;
        if used != total {
            return Err(WireError::TrailingBytes(total.saturating_sub(used)));
        }
        value.validate()?;
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Primitive bodies
// ---------------------------------------------------------------------------

/// Public declaration of an identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityDecl {
    pub signing_key: [u8; 32],
    pub encryption_key: [u8; 32],
}

/// An opaque, author-signed payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub author: Address,
    pub payload: Vec<u8>,
    pub signature: Signature,
}

/// A permanent binding of an author to a container.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticBinding {
    pub author: Address,
    pub target: Address,
    pub signature: Signature,
}

/// One frame of a dynamic binding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicBinding {
    pub author: Address,
    /// Author-chosen seed of the dynamic address.
    pub nonce: Vec<u8>,
    /// Stable outer address shared by every frame.
    pub dynamic: Address,
    pub target: Address,
    /// Earlier frame addresses, most recent first.
    pub history: Vec<Address>,
    pub signature: Signature,
}

/// Revocation of a binding, debinding or request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Debinding {
    pub author: Address,
    pub target: Address,
    pub signature: Signature,
}

/// A message addressed to a recipient. Unsigned; the payload is opaque.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub recipient: Address,
    pub payload: Vec<u8>,
}

impl IdentityDecl {
    pub fn verifying_key(&self) -> Result<VerifyingKey, SignatureError> {
        VerifyingKey::decode(self.signing_key)
    }
}

impl DynamicBinding {
    /// The dynamic address `author` owns under `nonce`.
    pub fn derive_address(author: &Address, nonce: &[u8]) -> Address {
        ContentHasher::DYNAMIC_ADDRESS.hash_parts(&[author.as_bytes(), nonce])
    }

    /// Address of this particular frame.
    pub fn frame(&self) -> Address {
        let mut parts: Vec<&[u8]> = vec![
            self.author.as_bytes(),
            self.dynamic.as_bytes(),
            self.target.as_bytes(),
        ];
        parts.extend(self.history.iter().map(|a| a.as_bytes().as_slice()));
        ContentHasher::DYNAMIC_FRAME.hash_parts(&parts)
    }
}

impl Request {
    pub fn new(recipient: Address, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            recipient,
            payload: payload.into(),
        }
    }
}

impl WirePrimitive for IdentityDecl {
    const MAGIC: [u8; 4] = *b"PIDC";
    const KIND: PrimitiveKind = PrimitiveKind::Identity;

    fn address(&self) -> Address {
        ContentHasher::IDENTITY.hash_parts(&[&self.signing_key, &self.encryption_key])
    }

    fn validate(&self) -> Result<(), WireError> {
        self.verifying_key()
            .map(|_| ())
            .map_err(|_| WireError::InvalidKey)
    }
}

impl WirePrimitive for Container {
    const MAGIC: [u8; 4] = *b"PCON";
    const KIND: PrimitiveKind = PrimitiveKind::Container;

    fn address(&self) -> Address {
        ContentHasher::CONTAINER.hash_parts(&[self.author.as_bytes(), &self.payload])
    }
}

impl WirePrimitive for StaticBinding {
    const MAGIC: [u8; 4] = *b"PBNS";
    const KIND: PrimitiveKind = PrimitiveKind::StaticBinding;

    fn address(&self) -> Address {
        ContentHasher::STATIC_BINDING.hash_parts(&[self.author.as_bytes(), self.target.as_bytes()])
    }
}

impl WirePrimitive for DynamicBinding {
    const MAGIC: [u8; 4] = *b"PBND";
    const KIND: PrimitiveKind = PrimitiveKind::DynamicBinding;

    fn address(&self) -> Address {
        self.frame()
    }

    fn validate(&self) -> Result<(), WireError> {
        if self.dynamic == Self::derive_address(&self.author, &self.nonce) {
            Ok(())
        } else {
            Err(WireError::ForeignDynamicAddress {
                claimed: self.dynamic,
            })
        }
    }
}

impl WirePrimitive for Debinding {
    const MAGIC: [u8; 4] = *b"PDBX";
    const KIND: PrimitiveKind = PrimitiveKind::Debinding;

    fn address(&self) -> Address {
        ContentHasher::DEBINDING.hash_parts(&[self.author.as_bytes(), self.target.as_bytes()])
    }
}

impl WirePrimitive for Request {
    const MAGIC: [u8; 4] = *b"PREQ";
    const KIND: PrimitiveKind = PrimitiveKind::Request;

    fn address(&self) -> Address {
        ContentHasher::REQUEST.hash_parts(&[self.recipient.as_bytes(), &self.payload])
    }
}

// ---------------------------------------------------------------------------
// Primitive
// ---------------------------------------------------------------------------

/// Any loaded primitive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Primitive {
    Identity(IdentityDecl),
    Container(Container),
    StaticBinding(StaticBinding),
    DynamicBinding(DynamicBinding),
    Debinding(Debinding),
    Request(Request),
}

impl Primitive {
    /// Try every schema in turn. Returns [`WireError::NoSchema`] if none
    /// loads the bytes cleanly.
    pub fn unpack(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < MAGIC_LEN {
            return Err(WireError::Truncated(data.len()));
        }
        let magic = &data[..MAGIC_LEN];
        if magic == IdentityDecl::MAGIC {
            IdentityDecl::unpack(data).map(Self::Identity)
        } else if magic == Container::MAGIC {
            Container::unpack(data).map(Self::Container)
        } else if magic == StaticBinding::MAGIC {
            StaticBinding::unpack(data).map(Self::StaticBinding)
        } else if magic == DynamicBinding::MAGIC {
            DynamicBinding::unpack(data).map(Self::DynamicBinding)
        } else if magic == Debinding::MAGIC {
            Debinding::unpack(data).map(Self::Debinding)
        } else if magic == Request::MAGIC {
            Request::unpack(data).map(Self::Request)
        } else {
            Err(WireError::NoSchema)
        }
    }

    pub fn pack(&self) -> Result<Vec<u8>, WireError> {
        match self {
            Self::Identity(p) => p.pack(),
            Self::Container(p) => p.pack(),
            Self::StaticBinding(p) => p.pack(),
            Self::DynamicBinding(p) => p.pack(),
            Self::Debinding(p) => p.pack(),
            Self::Request(p) => p.pack(),
        }
    }

    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Self::Identity(_) => IdentityDecl::KIND,
            Self::Container(_) => Container::KIND,
            Self::StaticBinding(_) => StaticBinding::KIND,
            Self::DynamicBinding(_) => DynamicBinding::KIND,
            Self::Debinding(_) => Debinding::KIND,
            Self::Request(_) => Request::KIND,
        }
    }

    /// Address the packed bytes live under (the frame, for dynamic bindings).
    pub fn storage_address(&self) -> Address {
        match self {
            Self::Identity(p) => p.address(),
            Self::Container(p) => p.address(),
            Self::StaticBinding(p) => p.address(),
            Self::DynamicBinding(p) => p.address(),
            Self::Debinding(p) => p.address(),
            Self::Request(p) => p.address(),
        }
    }

    pub fn summarize(&self) -> Summary {
        match self {
            Self::Identity(p) => Summary::Identity {
                address: p.address(),
                signing_key: p.signing_key,
            },
            Self::Container(p) => Summary::Container {
                address: p.address(),
                author: p.author,
            },
            Self::StaticBinding(p) => Summary::StaticBinding {
                address: p.address(),
                author: p.author,
                target: p.target,
            },
            Self::DynamicBinding(p) => Summary::DynamicBinding {
                address: p.dynamic,
                frame: p.frame(),
                author: p.author,
                target: p.target,
                history: p.history.clone(),
            },
            Self::Debinding(p) => Summary::Debinding {
                address: p.address(),
                author: p.author,
                target: p.target,
            },
            Self::Request(p) => Summary::Request {
                address: p.address(),
                recipient: p.recipient,
            },
        }
    }

    /// Check the author's signature over the primitive's storage address.
    /// Identities and requests carry no signature and always pass.
    pub fn verify_signature(&self, key: &VerifyingKey) -> Result<(), SignatureError> {
        let signature = match self {
            Self::Identity(_) | Self::Request(_) => return Ok(()),
            Self::Container(p) => &p.signature,
            Self::StaticBinding(p) => &p.signature,
            Self::DynamicBinding(p) => &p.signature,
            Self::Debinding(p) => &p.signature,
        };
        key.verify_address(&self.storage_address(), signature)
    }
}

macro_rules! impl_from_body {
    ($($body:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$body> for Primitive {
                fn from(value: $body) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_from_body! {
    IdentityDecl => Identity,
    Container => Container,
    StaticBinding => StaticBinding,
    DynamicBinding => DynamicBinding,
    Debinding => Debinding,
    Request => Request,
}
