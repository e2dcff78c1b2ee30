use persist_types::Address;

use crate::error::StoreResult;

/// Lazy sequence of packed primitives yielded by [`ContentStore::enumerate`].
pub type Enumeration<'a> = Box<dyn Iterator<Item = StoreResult<Vec<u8>>> + 'a>;

/// Durable address → bytes mapping.
///
/// All implementations must satisfy these invariants:
/// - The store never interprets the bytes it holds.
/// - `get` and `contains` are safe while a `put` or `delete` for a different
///   address is in flight. Same-address access is serialized by the caller.
/// - `put` over an existing address replaces it (the bytes are identical for
///   a content address).
pub trait ContentStore: Send + Sync {
    fn put(&self, address: Address, bytes: &[u8]) -> StoreResult<()>;

    /// Returns [`StoreError::NotFound`](crate::StoreError::NotFound) if absent.
    fn get(&self, address: &Address) -> StoreResult<Vec<u8>>;

    /// Returns [`StoreError::NotFound`](crate::StoreError::NotFound) if absent.
    fn delete(&self, address: &Address) -> StoreResult<()>;

    fn contains(&self, address: &Address) -> StoreResult<bool>;

    /// Every address currently stored.
    fn addresses(&self) -> StoreResult<Vec<Address>>;

    /// Yield the bytes of every stored object. Finite; restart by calling
    /// again. Used for cold-start restoration.
    fn enumerate(&self) -> StoreResult<Enumeration<'_>>;
}
