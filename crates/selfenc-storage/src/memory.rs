//! In-memory chunk store

use async_trait::async_trait;
use bytes::Bytes;
use selfenc_chunks::{hash_to_hex, Hash};
use selfenc_core::StoreError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use crate::store::ChunkStore;

/// A `HashMap`-backed store. Counts reads and writes so tests can assert on
/// how many chunks an operation touched.
#[derive(Debug, Default)]
pub struct MemoryStore {
    chunks: RwLock<HashMap<Hash, Bytes>>,
    gets: AtomicUsize,
    puts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored chunks
    pub fn len(&self) -> usize {
        self.chunks.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Addresses currently stored (unordered)
    pub fn addresses(&self) -> Vec<Hash> {
        self.chunks
            .read()
            .map(|c| c.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Number of `get` calls served so far
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::Relaxed)
    }

    /// Number of `put` calls served so far
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::Relaxed)
    }

    fn poisoned() -> StoreError {
        StoreError::Backend("memory store lock poisoned".into())
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn put(&self, address: Hash, content: Bytes) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::Relaxed);
        let mut chunks = self.chunks.write().map_err(|_| Self::poisoned())?;
        chunks.insert(address, content);
        Ok(())
    }

    async fn get(&self, address: Hash) -> Result<Bytes, StoreError> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        let chunks = self.chunks.read().map_err(|_| Self::poisoned())?;
        chunks
            .get(&address)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(hash_to_hex(&address)))
    }

    async fn delete(&self, address: Hash) -> Result<(), StoreError> {
        let mut chunks = self.chunks.write().map_err(|_| Self::poisoned())?;
        chunks.remove(&address);
        Ok(())
    }

    async fn contains(&self, address: Hash) -> Result<bool, StoreError> {
        let chunks = self.chunks.read().map_err(|_| Self::poisoned())?;
        Ok(chunks.contains_key(&address))
    }
}
