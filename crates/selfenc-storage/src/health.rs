//! Storage health check

use selfenc_core::{SelfEncResult, StoreError};

use crate::operator::OperatorStore;

/// Verify the backend is reachable by listing the store's chunk directory
pub async fn check_health(store: &OperatorStore) -> SelfEncResult<()> {
    // Listing a missing directory is fine on every backend; only errors matter
    store
        .operator()
        .list(&store.chunk_dir())
        .await
        .map(|_| ())
        .map_err(|e| StoreError::Backend(format!("storage health check failed: {e}")).into())
}

/// Returns true if storage is reachable, false otherwise (non-panicking)
pub async fn is_healthy(store: &OperatorStore) -> bool {
    check_health(store).await.is_ok()
}
