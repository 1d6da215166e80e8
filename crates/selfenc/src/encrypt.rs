//! Whole-buffer self-encryption
//!
//! Two phases: every chunk's pre-hash is computed first (the barrier), then
//! chunks are keyed, encrypted and post-hashed in parallel on a rayon pool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use bytes::Bytes;
use futures::stream::{self, TryStreamExt};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use selfenc_chunks::{hash_bytes, split_bytes, Hash, RawChunk};
use selfenc_core::{CodecConfig, SelfEncError, SelfEncResult};
use selfenc_crypto::{derive_key_material, encrypt_chunk, post_hash, KeyMaterial};
use selfenc_storage::ChunkStore;
use tracing::{debug, info};

use crate::data_map::{ChunkInfo, ChunkTable, DataMap};
use crate::pack::pack;

/// An encrypted chunk ready for storage under its content address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedChunk {
    pub address: Hash,
    pub content: Bytes,
}

/// Self-encrypt `data` in memory.
///
/// Returns the Raw DataMap and the encrypted chunks in index order.
pub fn encrypt(data: Bytes, cfg: &CodecConfig) -> SelfEncResult<(DataMap, Vec<EncryptedChunk>)> {
    cfg.validate()?;
    let original_size = data.len() as u64;
    let raw = split_bytes(&data, cfg.chunking)?;

    let sealed = on_encrypt_pool(cfg, || -> SelfEncResult<Vec<(ChunkInfo, EncryptedChunk)>> {
        let pre_hashes: Vec<Hash> = raw.par_iter().map(|c| hash_bytes(&c.content)).collect();
        raw.par_iter()
            .map(|c| {
                let km = derive_key_material(c.index, &pre_hashes, c.content.len())?;
                seal(c, pre_hashes[c.index as usize], &km)
            })
            .collect()
    })??;

    let (chunks, encrypted): (Vec<ChunkInfo>, Vec<EncryptedChunk>) = sealed.into_iter().unzip();
    debug!(bytes = original_size, chunks = chunks.len(), "encrypted buffer");
    Ok((
        DataMap::Raw(ChunkTable {
            chunks,
            original_size,
        }),
        encrypted,
    ))
}

/// Dedicated encryption pools, one per configured worker count
static POOLS: OnceLock<Mutex<HashMap<usize, Arc<ThreadPool>>>> = OnceLock::new();

/// Run `op` on the encryption pool: rayon's global pool when
/// `encrypt_workers` is 0, otherwise a dedicated pool built on first use.
pub(crate) fn on_encrypt_pool<R, F>(cfg: &CodecConfig, op: F) -> SelfEncResult<R>
where
    R: Send,
    F: FnOnce() -> R + Send,
{
    if cfg.concurrency.encrypt_workers == 0 {
        return Ok(op());
    }
    let workers = cfg.concurrency.workers();
    let pool = {
        let mut pools = POOLS
            .get_or_init(Default::default)
            .lock()
            .map_err(|_| SelfEncError::Task("encrypt pool registry poisoned".into()))?;
        match pools.get(&workers) {
            Some(pool) => Arc::clone(pool),
            None => {
                let pool = Arc::new(
                    ThreadPoolBuilder::new()
                        .num_threads(workers)
                        .thread_name(|i| format!("selfenc-encrypt-{i}"))
                        .build()
                        .map_err(|e| SelfEncError::Task(format!("building encrypt pool: {e}")))?,
                );
                debug!(workers, "built encrypt pool");
                pools.insert(workers, Arc::clone(&pool));
                pool
            }
        }
    };
    Ok(pool.install(op))
}

/// Encrypt one plaintext chunk with already-derived key material.
pub(crate) fn seal(
    chunk: &RawChunk,
    pre_hash: Hash,
    km: &KeyMaterial,
) -> SelfEncResult<(ChunkInfo, EncryptedChunk)> {
    let size = u32::try_from(chunk.content.len()).map_err(|_| {
        SelfEncError::Config(format!(
            "chunk {} is {} bytes, beyond the u32 size field",
            chunk.index,
            chunk.content.len()
        ))
    })?;
    let ciphertext = encrypt_chunk(&chunk.content, km)?;
    let address = post_hash(&ciphertext);
    Ok((
        ChunkInfo {
            index: chunk.index,
            pre_hash,
            post_hash: address,
            size,
        },
        EncryptedChunk {
            address,
            content: Bytes::from(ciphertext),
        },
    ))
}

/// Encrypt `data` and put every chunk into `store`.
///
/// CPU work runs on the blocking pool; at most `upload_batch` puts are in
/// flight. The first store error aborts the call.
pub async fn encrypt_to_store<S>(data: Bytes, store: &S, cfg: &CodecConfig) -> SelfEncResult<DataMap>
where
    S: ChunkStore + ?Sized,
{
    let codec = *cfg;
    let (map, chunks) = tokio::task::spawn_blocking(move || encrypt(data, &codec))
        .await
        .map_err(|e| SelfEncError::Task(format!("encrypt worker: {e}")))??;

    store_chunks(store, chunks, cfg.concurrency.upload_batch).await?;
    info!(
        bytes = map.original_size(),
        chunks = map.chunk_count(),
        "stored self-encrypted data"
    );
    Ok(map)
}

/// Encrypt, store, then pack the map until it fits inline.
pub async fn encrypt_and_pack<S>(data: Bytes, store: &S, cfg: &CodecConfig) -> SelfEncResult<DataMap>
where
    S: ChunkStore + ?Sized,
{
    let map = encrypt_to_store(data, store, cfg).await?;
    pack(map, store, cfg).await
}

pub(crate) async fn store_chunks<S>(
    store: &S,
    chunks: Vec<EncryptedChunk>,
    batch: usize,
) -> SelfEncResult<()>
where
    S: ChunkStore + ?Sized,
{
    stream::iter(chunks.into_iter().map(Ok::<_, SelfEncError>))
        .try_for_each_concurrent(batch.max(1), |chunk| async move {
            store
                .put(chunk.address, chunk.content)
                .await
                .map_err(SelfEncError::from)
        })
        .await
}
