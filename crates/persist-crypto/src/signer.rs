use persist_types::Address;
use serde::{Deserialize, Serialize};

/// Private half of an identity's Ed25519 key pair. It only ever signs
/// primitive addresses.
pub struct SigningKey(ed25519_dalek::SigningKey);

/// Public key taken from an identity declaration.
#[derive(Clone, PartialEq, Eq)]
pub struct VerifyingKey(ed25519_dalek::VerifyingKey);

/// Signature bytes as they travel inside a packed primitive. The length is
/// checked only when the signature is verified.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(Vec<u8>);

impl SigningKey {
    pub fn generate() -> Self {
        Self(ed25519_dalek::SigningKey::generate(&mut rand::thread_rng()))
    }

    pub fn from_secret(secret: [u8; 32]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(&secret))
    }

    /// Public key bytes for the identity declaration.
    pub fn public_key(&self) -> [u8; 32] {
        self.0.verifying_key().to_bytes()
    }

    /// Sign the address a primitive is stored under (a frame's address for
    /// dynamic bindings).
    pub fn seal(&self, address: &Address) -> Signature {
        use ed25519_dalek::Signer;
        Signature(self.0.sign(address.as_bytes()).to_bytes().to_vec())
    }
}

impl VerifyingKey {
    /// Decode a declared signing key. Fails unless the bytes are a valid
    /// curve point.
    pub fn decode(public_key: [u8; 32]) -> Result<Self, SignatureError> {
        ed25519_dalek::VerifyingKey::from_bytes(&public_key)
            .map(Self)
            .map_err(|_| SignatureError::InvalidKey)
    }

    pub fn verify_address(
        &self,
        address: &Address,
        signature: &Signature,
    ) -> Result<(), SignatureError> {
        use ed25519_dalek::Verifier;
        let signature = ed25519_dalek::Signature::from_slice(&signature.0)
            .map_err(|_| SignatureError::InvalidSignature)?;
        self.0
            .verify(address.as_bytes(), &signature)
            .map_err(|_| SignatureError::InvalidSignature)
    }
}

impl Signature {
    /// Stand-in while a primitive's address is computed; it never verifies.
    pub fn blank() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningKey(<redacted>)")
    }
}

impl std::fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VerifyingKey({})", hex::encode(self.0.as_bytes()))
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = self.0.len().min(8);
        write!(f, "Signature({}..)", hex::encode(&self.0[..shown]))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid key")]
    InvalidKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_of(signing: &SigningKey) -> VerifyingKey {
        VerifyingKey::decode(signing.public_key()).unwrap()
    }

    #[test]
    fn sealed_address_verifies() {
        let signing = SigningKey::generate();
        let address = Address::from_bytes(b"primitive");
        let signature = signing.seal(&address);
        assert!(key_of(&signing).verify_address(&address, &signature).is_ok());
    }

    #[test]
    fn seal_does_not_cover_other_addresses() {
        let signing = SigningKey::generate();
        let signature = signing.seal(&Address::from_bytes(b"one"));
        assert_eq!(
            key_of(&signing).verify_address(&Address::from_bytes(b"two"), &signature),
            Err(SignatureError::InvalidSignature)
        );
    }

    #[test]
    fn other_identity_cannot_verify() {
        let address = Address::from_bytes(b"c");
        let signature = SigningKey::generate().seal(&address);
        assert!(key_of(&SigningKey::generate())
            .verify_address(&address, &signature)
            .is_err());
    }

    #[test]
    fn blank_and_truncated_signatures_fail() {
        let signing = SigningKey::generate();
        let address = Address::from_bytes(b"c");
        assert_eq!(
            key_of(&signing).verify_address(&address, &Signature::blank()),
            Err(SignatureError::InvalidSignature)
        );
        let mut truncated = signing.seal(&address);
        truncated.0.pop();
        assert_eq!(
            key_of(&signing).verify_address(&address, &truncated),
            Err(SignatureError::InvalidSignature)
        );
    }

    #[test]
    fn secret_determines_public_key() {
        let secret = [7u8; 32];
        assert_eq!(
            SigningKey::from_secret(secret).public_key(),
            SigningKey::from_secret(secret).public_key()
        );
        assert_ne!(SigningKey::from_secret(secret).public_key(), SigningKey::generate().public_key());
    }

    #[test]
    fn debug_redacts_signing_key() {
        let signing = SigningKey::generate();
        assert!(format!("{signing:?}").contains("redacted"));
        assert!(format!("{:?}", Signature::blank()).starts_with("Signature("));
    }
}
