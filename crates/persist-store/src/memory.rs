use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use persist_types::Address;

use crate::error::{StoreError, StoreResult};
use crate::traits::{ContentStore, Enumeration};

/// In-memory, HashMap-based content store.
///
/// Intended for tests and embedding.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<Address, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes across all stored objects.
    pub fn total_bytes(&self) -> u64 {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|bytes| bytes.len() as u64)
            .sum()
    }
}

impl ContentStore for MemoryStore {
    fn put(&self, address: Address, bytes: &[u8]) -> StoreResult<()> {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address, bytes.to_vec());
        Ok(())
    }

    fn get(&self, address: &Address) -> StoreResult<Vec<u8>> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
            .ok_or(StoreError::NotFound(*address))
    }

    fn delete(&self, address: &Address) -> StoreResult<()> {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(address)
            .map(|_| ())
            .ok_or(StoreError::NotFound(*address))
    }

    fn contains(&self, address: &Address) -> StoreResult<bool> {
        Ok(self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(address))
    }

    fn addresses(&self) -> StoreResult<Vec<Address>> {
        let map = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        let mut addresses: Vec<Address> = map.keys().copied().collect();
        addresses.sort();
        Ok(addresses)
    }

    fn enumerate(&self) -> StoreResult<Enumeration<'_>> {
        let snapshot: Vec<Vec<u8>> = self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("object_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(data: &[u8]) -> Address {
        Address::from_bytes(data)
    }

    #[test]
    fn put_then_get() {
        let store = MemoryStore::new();
        store.put(addr(b"a"), b"alpha").unwrap();
        assert_eq!(store.get(&addr(b"a")).unwrap(), b"alpha");
        assert!(store.contains(&addr(b"a")).unwrap());
        assert_eq!(store.len(), 1);
        assert_eq!(store.total_bytes(), 5);
    }

    #[test]
    fn missing_address_is_not_found() {
        let store = MemoryStore::new();
        assert!(store.get(&addr(b"x")).unwrap_err().is_not_found());
        assert!(store.delete(&addr(b"x")).unwrap_err().is_not_found());
        assert!(!store.contains(&addr(b"x")).unwrap());
    }

    #[test]
    fn delete_removes() {
        let store = MemoryStore::new();
        store.put(addr(b"a"), b"alpha").unwrap();
        store.delete(&addr(b"a")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn enumerate_is_restartable() {
        let store = MemoryStore::new();
        store.put(addr(b"a"), b"alpha").unwrap();
        store.put(addr(b"b"), b"beta").unwrap();

        let first: Vec<Vec<u8>> = store.enumerate().unwrap().map(Result::unwrap).collect();
        let second: Vec<Vec<u8>> = store.enumerate().unwrap().map(Result::unwrap).collect();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert_eq!(store.addresses().unwrap().len(), 2);
    }

    #[test]
    fn debug_shows_count() {
        let store = MemoryStore::new();
        store.put(addr(b"a"), b"alpha").unwrap();
        assert!(format!("{store:?}").contains("object_count: 1"));
    }
}
