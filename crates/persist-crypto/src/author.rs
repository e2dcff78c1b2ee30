use persist_types::Address;

use crate::primitive::{
    Container, Debinding, DynamicBinding, IdentityDecl, StaticBinding, WirePrimitive,
};
use crate::signer::{Signature, SigningKey};

/// A private identity able to produce signed primitives.
///
/// Persisters never hold private keys; `Author` exists for clients, tools
/// and tests that need to mint primitives.
#[derive(Debug)]
pub struct Author {
    signing: SigningKey,
    declaration: IdentityDecl,
}

impl Author {
    pub fn generate() -> Self {
        let signing = SigningKey::generate();
        let encryption_key: [u8; 32] = rand::random();
        Self::with_keys(signing, encryption_key)
    }

    /// Deterministic identity from a 32-byte secret.
    pub fn from_secret(secret: [u8; 32]) -> Self {
        let encryption_key = *blake3::hash(&secret).as_bytes();
        Self::with_keys(SigningKey::from_secret(secret), encryption_key)
    }

    fn with_keys(signing: SigningKey, encryption_key: [u8; 32]) -> Self {
        let declaration = IdentityDecl {
            signing_key: signing.public_key(),
            encryption_key,
        };
        Self {
            signing,
            declaration,
        }
    }

    pub fn address(&self) -> Address {
        self.declaration.address()
    }

    /// Public declaration other parties need before accepting our primitives.
    pub fn declaration(&self) -> &IdentityDecl {
        &self.declaration
    }

    pub fn container(&self, payload: impl Into<Vec<u8>>) -> Container {
        let mut container = Container {
            author: self.address(),
            payload: payload.into(),
            signature: Signature::blank(),
        };
        container.signature = self.signing.seal(&container.address());
        container
    }

    pub fn bind_static(&self, target: Address) -> StaticBinding {
        let mut binding = StaticBinding {
            author: self.address(),
            target,
            signature: Signature::blank(),
        };
        binding.signature = self.signing.seal(&binding.address());
        binding
    }

    /// Stable address for a dynamic binding, derived from our identity and a
    /// caller-chosen nonce.
    pub fn dynamic_address(&self, nonce: &[u8]) -> Address {
        DynamicBinding::derive_address(&self.address(), nonce)
    }

    /// Sign a new frame of the dynamic binding named by `nonce`. `history`
    /// lists earlier frames, most recent first.
    pub fn bind_dynamic(
        &self,
        nonce: &[u8],
        target: Address,
        history: Vec<Address>,
    ) -> DynamicBinding {
        let mut binding = DynamicBinding {
            author: self.address(),
            nonce: nonce.to_vec(),
            dynamic: self.dynamic_address(nonce),
            target,
            history,
            signature: Signature::blank(),
        };
        binding.signature = self.signing.seal(&binding.frame());
        binding
    }

    pub fn debind(&self, target: Address) -> Debinding {
        let mut debinding = Debinding {
            author: self.address(),
            target,
            signature: Signature::blank(),
        };
        debinding.signature = self.signing.seal(&debinding.address());
        debinding
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_secret_is_deterministic() {
        let a = Author::from_secret([9; 32]);
        let b = Author::from_secret([9; 32]);
        assert_eq!(a.address(), b.address());
        assert_eq!(a.declaration(), b.declaration());
    }

    #[test]
    fn distinct_authors_have_distinct_addresses() {
        assert_ne!(Author::generate().address(), Author::generate().address());
    }

    #[test]
    fn dynamic_address_depends_on_nonce() {
        let author = Author::generate();
        assert_eq!(
            author.dynamic_address(b"a"),
            author.dynamic_address(b"a")
        );
        assert_ne!(
            author.dynamic_address(b"a"),
            author.dynamic_address(b"b")
        );
    }

    #[test]
    fn debinding_signs_its_own_address() {
        let author = Author::generate();
        let debinding = author.debind(Address::from_bytes(b"target"));
        let key = author.declaration().verifying_key().unwrap();
        assert!(key
            .verify_address(&debinding.address(), &debinding.signature)
            .is_ok());
    }
}
