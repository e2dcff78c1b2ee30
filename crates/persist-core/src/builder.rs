use std::sync::Arc;

use persist_store::{ContentStore, DiskStore, MemoryStore};
use persist_verify::Verifier;

use crate::config::PersisterConfig;
use crate::error::PersistResult;
use crate::persister::Persister;

/// Assembles a [`Persister`] and spawns its workers.
pub struct PersisterBuilder {
    config: PersisterConfig,
    store: Option<Arc<dyn ContentStore>>,
    verifier: Option<Verifier>,
}

impl PersisterBuilder {
    pub fn new() -> Self {
        Self {
            config: PersisterConfig::default(),
            store: None,
            verifier: None,
        }
    }

    pub fn config(mut self, config: PersisterConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this store instead of the one `cache_dir` selects.
    pub fn store(mut self, store: Arc<dyn ContentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a custom verification pipeline.
    pub fn verifier(mut self, verifier: Verifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Build the persister. Must be called within a tokio runtime.
    pub fn build(self) -> PersistResult<Persister> {
        let store: Arc<dyn ContentStore> = match (self.store, &self.config.cache_dir) {
            (Some(store), _) => store,
            (None, Some(dir)) => Arc::new(DiskStore::open(dir)?),
            (None, None) => Arc::new(MemoryStore::new()),
        };
        let verifier = self
            .verifier
            .unwrap_or_else(|| Verifier::with_default_stages(self.config.verify.clone()));
        Ok(Persister::assemble(self.config, store, verifier))
    }
}

impl Default for PersisterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
