//! Driver-side configuration

use indi_core::{FileStore, PropertyStore};
use indi_protocol::DEFAULT_CHUNK_SIZE;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Settings handed to a [`DriverRunner`](crate::DriverRunner)
#[derive(Clone)]
pub struct DriverConfig {
    /// Snapshot store for saveable properties
    pub store: Option<Arc<dyn PropertyStore>>,
    /// Bytes requested per read of the inbound stream
    pub read_chunk_size: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            store: None,
            read_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl DriverConfig {
    pub fn with_store(mut self, store: Arc<dyn PropertyStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Persist saveable properties as files under `dir`
    pub fn with_properties_dir(self, dir: impl Into<PathBuf>) -> Self {
        self.with_store(Arc::new(FileStore::new(dir)))
    }

    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }
}

impl fmt::Debug for DriverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverConfig")
            .field("store", &self.store.is_some())
            .field("read_chunk_size", &self.read_chunk_size)
            .finish()
    }
}
