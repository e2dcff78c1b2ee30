use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use persist_types::Address;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::traits::{ContentStore, Enumeration};

/// File extension of stored primitives.
pub const EXTENSION: &str = "prim";

/// Directory-backed content store.
///
/// Each object lives in `<root>/<64 hex chars>.prim`. Writes go to a
/// temporary file in the same directory and are renamed into place, so a
/// crash never leaves a partially written object under a valid name.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        if root.exists() && !root.is_dir() {
            return Err(StoreError::NotADirectory(root));
        }
        fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "disk store opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic file path for an address.
    pub fn path_for(&self, address: &Address) -> PathBuf {
        self.root.join(format!("{}.{EXTENSION}", address.to_hex()))
    }

    fn address_of(path: &Path) -> Option<Address> {
        if path.extension()? != EXTENSION {
            return None;
        }
        path.file_stem()?.to_str()?.parse().ok()
    }

    fn stored_paths(&self) -> impl Iterator<Item = StoreResult<PathBuf>> + '_ {
        WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    let path = entry.into_path();
                    Self::address_of(&path).map(|_| Ok(path))
                }
                Ok(_) => None,
                Err(e) => Some(Err(StoreError::from(e))),
            })
    }
}

impl ContentStore for DiskStore {
    fn put(&self, address: Address, bytes: &[u8]) -> StoreResult<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path_for(&address))
            .map_err(|e| e.error)?;
        Ok(())
    }

    fn get(&self, address: &Address) -> StoreResult<Vec<u8>> {
        match fs::read(self.path_for(address)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(*address)),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, address: &Address) -> StoreResult<()> {
        match fs::remove_file(self.path_for(address)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(*address)),
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, address: &Address) -> StoreResult<bool> {
        Ok(self.path_for(address).is_file())
    }

    fn addresses(&self) -> StoreResult<Vec<Address>> {
        let mut addresses = Vec::new();
        for path in self.stored_paths() {
            if let Some(address) = Self::address_of(&path?) {
                addresses.push(address);
            }
        }
        addresses.sort();
        Ok(addresses)
    }

    fn enumerate(&self) -> StoreResult<Enumeration<'_>> {
        let iter = self.stored_paths().filter_map(|path| match path {
            Ok(path) => match fs::read(&path) {
                Ok(bytes) => Some(Ok(bytes)),
                // Collected between listing and reading.
                Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read stored object");
                    Some(Err(e.into()))
                }
            },
            Err(e) => Some(Err(e)),
        });
        Ok(Box::new(iter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, DiskStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path().join("cache")).unwrap();
        (dir, store)
    }

    #[test]
    fn put_then_get() {
        let (_dir, store) = store();
        let address = Address::from_bytes(b"a");
        store.put(address, b"alpha").unwrap();
        assert_eq!(store.get(&address).unwrap(), b"alpha");
        assert!(store.contains(&address).unwrap());
    }

    #[test]
    fn files_are_named_by_hex_address() {
        let (_dir, store) = store();
        let address = Address::from_bytes(b"a");
        store.put(address, b"alpha").unwrap();
        let path = store.path_for(&address);
        assert!(path.is_file());
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            format!("{}.prim", address.to_hex())
        );
    }

    #[test]
    fn missing_address_is_not_found() {
        let (_dir, store) = store();
        let address = Address::from_bytes(b"missing");
        assert!(store.get(&address).unwrap_err().is_not_found());
        assert!(store.delete(&address).unwrap_err().is_not_found());
    }

    #[test]
    fn delete_removes_file() {
        let (_dir, store) = store();
        let address = Address::from_bytes(b"a");
        store.put(address, b"alpha").unwrap();
        store.delete(&address).unwrap();
        assert!(!store.path_for(&address).exists());
    }

    #[test]
    fn enumerate_skips_foreign_files() {
        let (_dir, store) = store();
        store.put(Address::from_bytes(b"a"), b"alpha").unwrap();
        store.put(Address::from_bytes(b"b"), b"beta").unwrap();
        fs::write(store.root().join("notes.txt"), b"ignore me").unwrap();
        fs::write(store.root().join("zz.prim"), b"bad name").unwrap();

        let mut found: Vec<Vec<u8>> = store.enumerate().unwrap().map(Result::unwrap).collect();
        found.sort();
        assert_eq!(found, vec![b"alpha".to_vec(), b"beta".to_vec()]);
        assert_eq!(store.addresses().unwrap().len(), 2);
    }

    #[test]
    fn reopen_sees_existing_objects() {
        let (dir, store) = store();
        let address = Address::from_bytes(b"a");
        store.put(address, b"alpha").unwrap();
        drop(store);

        let reopened = DiskStore::open(dir.path().join("cache")).unwrap();
        assert_eq!(reopened.get(&address).unwrap(), b"alpha");
    }

    #[test]
    fn open_rejects_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        fs::write(&file, b"").unwrap();
        assert!(matches!(
            DiskStore::open(&file),
            Err(StoreError::NotADirectory(_))
        ));
    }
}
