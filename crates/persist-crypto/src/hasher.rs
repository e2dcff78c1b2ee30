use persist_types::Address;

/// Domain-separated BLAKE3 content hasher.
///
/// Each primitive kind hashes under its own domain tag, so a container and a
/// binding with identical body bytes never share an address.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    pub const IDENTITY: Self = Self {
        domain: "persist-identity-v1",
    };
    pub const CONTAINER: Self = Self {
        domain: "persist-container-v1",
    };
    pub const STATIC_BINDING: Self = Self {
        domain: "persist-static-binding-v1",
    };
    /// Stable outer address of a dynamic binding.
    pub const DYNAMIC_ADDRESS: Self = Self {
        domain: "persist-dynamic-address-v1",
    };
    /// Address of a single dynamic binding frame.
    pub const DYNAMIC_FRAME: Self = Self {
        domain: "persist-dynamic-frame-v1",
    };
    pub const DEBINDING: Self = Self {
        domain: "persist-debinding-v1",
    };
    pub const REQUEST: Self = Self {
        domain: "persist-request-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> Address {
        self.hash_parts(&[data])
    }

    /// Hash a sequence of byte strings as one message.
    ///
    /// Callers must only pass layouts whose field boundaries are unambiguous
    /// (fixed-width fields, with at most one variable-length field last).
    pub fn hash_parts(&self, parts: &[&[u8]]) -> Address {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        for part in parts {
            hasher.update(part);
        }
        Address::from_hash(*hasher.finalize().as_bytes())
    }

    /// Verify that data produces the expected address.
    pub fn verify(&self, data: &[u8], expected: &Address) -> bool {
        self.hash(data) == *expected
    }

    pub fn domain(&self) -> &str {
        self.domain
    }
}
