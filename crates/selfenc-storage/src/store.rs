//! Chunk store capability

use async_trait::async_trait;
use bytes::Bytes;
use selfenc_chunks::Hash;
use selfenc_core::StoreError;
use std::sync::Arc;

/// Content-addressed key-value storage for encrypted chunks.
///
/// Implementations must tolerate concurrent calls from many chunk operations.
/// `put` of an existing address with the same bytes must be harmless.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Store `content` under `address`.
    async fn put(&self, address: Hash, content: Bytes) -> Result<(), StoreError>;

    /// Fetch the content stored under `address`; `NotFound` if absent.
    async fn get(&self, address: Hash) -> Result<Bytes, StoreError>;

    /// Best-effort removal. The codec never relies on it succeeding.
    async fn delete(&self, address: Hash) -> Result<(), StoreError>;

    /// Whether `address` is present.
    async fn contains(&self, address: Hash) -> Result<bool, StoreError> {
        match self.get(address).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<S: ChunkStore + ?Sized> ChunkStore for Arc<S> {
    async fn put(&self, address: Hash, content: Bytes) -> Result<(), StoreError> {
        (**self).put(address, content).await
    }

    async fn get(&self, address: Hash) -> Result<Bytes, StoreError> {
        (**self).get(address).await
    }

    async fn delete(&self, address: Hash) -> Result<(), StoreError> {
        (**self).delete(address).await
    }

    async fn contains(&self, address: Hash) -> Result<bool, StoreError> {
        (**self).contains(address).await
    }
}
