//! OpenDAL-backed chunk store and Operator factory

use async_trait::async_trait;
use bytes::Bytes;
use opendal::{ErrorKind, Operator};
use selfenc_chunks::{hash_to_hex, Hash};
use selfenc_core::config::StorageConfig;
use selfenc_core::{SelfEncError, SelfEncResult, StoreError};

use crate::store::ChunkStore;

/// S3 credentials (read from the environment by the CLI)
#[derive(Debug, Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Build an OpenDAL Operator for the configured backend.
///
/// `fs` roots at `cfg.root`, `memory` is process-local, `s3` uses path-style
/// addressing (the opendal default) and needs `creds`. HTTP endpoints are
/// refused when `enforce_tls` is set and warned about otherwise.
pub fn build_operator(cfg: &StorageConfig, creds: Option<&S3Credentials>) -> SelfEncResult<Operator> {
    let op = match cfg.backend.as_str() {
        "fs" => {
            let root = cfg.root.to_string_lossy();
            Operator::new(opendal::services::Fs::default().root(&root))
                .map_err(backend_config_error)?
                .finish()
        }
        "memory" => Operator::new(opendal::services::Memory::default())
            .map_err(backend_config_error)?
            .finish(),
        "s3" => {
            let creds = creds.ok_or_else(|| {
                SelfEncError::Config("s3 backend requires access credentials".into())
            })?;
            if cfg.endpoint.starts_with("http://") {
                if cfg.enforce_tls {
                    return Err(SelfEncError::Config(format!(
                        "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled",
                        cfg.endpoint
                    )));
                }
                tracing::warn!(
                    endpoint = %cfg.endpoint,
                    "S3 endpoint uses plaintext HTTP; set storage.enforce_tls = true in production"
                );
            }
            let builder = opendal::services::S3::default()
                .endpoint(&cfg.endpoint)
                .region(&cfg.region)
                .bucket(&cfg.bucket)
                .access_key_id(&creds.access_key_id)
                .secret_access_key(&creds.secret_access_key);
            Operator::new(builder).map_err(backend_config_error)?.finish()
        }
        other => {
            return Err(SelfEncError::Config(format!(
                "unknown storage backend '{other}'"
            )))
        }
    };

    Ok(op
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        ))
}

fn backend_config_error(e: opendal::Error) -> SelfEncError {
    SelfEncError::Config(format!("creating OpenDAL operator: {e}"))
}

/// Chunk store over an OpenDAL Operator.
///
/// Each chunk is stored at `{prefix}/chunks/{hex address}`.
#[derive(Debug, Clone)]
pub struct OperatorStore {
    op: Operator,
    prefix: String,
}

impl OperatorStore {
    pub fn new(op: Operator, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_end_matches('/').to_string();
        Self { op, prefix }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    pub fn chunk_key(&self, address: &Hash) -> String {
        format!("{}/chunks/{}", self.prefix, hash_to_hex(address))
    }

    pub(crate) fn chunk_dir(&self) -> String {
        format!("{}/chunks/", self.prefix)
    }
}

fn map_err(address: &Hash, e: opendal::Error) -> StoreError {
    if e.kind() == ErrorKind::NotFound {
        StoreError::NotFound(hash_to_hex(address))
    } else {
        StoreError::Backend(e.to_string())
    }
}

#[async_trait]
impl ChunkStore for OperatorStore {
    async fn put(&self, address: Hash, content: Bytes) -> Result<(), StoreError> {
        let key = self.chunk_key(&address);
        // Content-addressed: an existing object already holds these bytes
        if self.op.exists(&key).await.unwrap_or(false) {
            tracing::debug!(chunk = %key, "dedup: chunk already stored");
            return Ok(());
        }
        self.op
            .write(&key, content)
            .await
            .map(|_| ())
            .map_err(|e| map_err(&address, e))
    }

    async fn get(&self, address: Hash) -> Result<Bytes, StoreError> {
        let key = self.chunk_key(&address);
        self.op
            .read(&key)
            .await
            .map(|buf| buf.to_bytes())
            .map_err(|e| map_err(&address, e))
    }

    async fn delete(&self, address: Hash) -> Result<(), StoreError> {
        let key = self.chunk_key(&address);
        self.op.delete(&key).await.map_err(|e| map_err(&address, e))
    }

    async fn contains(&self, address: Hash) -> Result<bool, StoreError> {
        let key = self.chunk_key(&address);
        self.op.exists(&key).await.map_err(|e| map_err(&address, e))
    }
}
