//! Decryption: whole-buffer, streaming to a writer, and byte ranges
//!
//! Every chunk is checked twice: the fetched bytes must hash to the recorded
//! post-hash, and the recovered plaintext to the recorded pre-hash. Fetches
//! run concurrently on the async side; cipher work runs on the blocking pool.

use std::borrow::Cow;

use bytes::Bytes;
use futures::future;
use futures::stream::{self, StreamExt, TryStreamExt};
use selfenc_chunks::{hash_bytes, hash_to_hex, Hash};
use selfenc_core::{CodecConfig, SelfEncError, SelfEncResult};
use selfenc_crypto::{decrypt_chunk, derive_from_successors, post_hash, successor_indices};
use selfenc_storage::ChunkStore;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info};

use crate::data_map::{ChunkInfo, ChunkTable, DataMap};
use crate::pack::unpack;

/// Decrypt a single fetched chunk against the map.
pub fn decrypt_chunk_at(map: &DataMap, index: u32, ciphertext: &[u8]) -> SelfEncResult<Bytes> {
    let table = map.table();
    table.validate()?;
    let info = *table.chunks.get(index as usize).ok_or_else(|| {
        SelfEncError::DataMapMalformed(format!(
            "chunk index {index} out of range for {} chunks",
            table.chunks.len()
        ))
    })?;
    let (h1, h2) = successor_hashes(table, index);
    open_chunk(info, h1, h2, ciphertext)
}

/// Verify, decrypt and re-verify one chunk.
fn open_chunk(info: ChunkInfo, h1: Hash, h2: Hash, ciphertext: &[u8]) -> SelfEncResult<Bytes> {
    if ciphertext.len() != info.size as usize {
        error!(
            index = info.index,
            expected = info.size,
            actual = ciphertext.len(),
            "stored chunk length disagrees with the map"
        );
        return Err(SelfEncError::ChunkVerificationFailed { index: info.index });
    }
    if post_hash(ciphertext) != info.post_hash {
        error!(
            index = info.index,
            address = %hash_to_hex(&info.post_hash),
            "stored chunk does not match its address"
        );
        return Err(SelfEncError::ChunkVerificationFailed { index: info.index });
    }
    let km = derive_from_successors(info.index, &h1, &h2, ciphertext.len())?;
    let plaintext = decrypt_chunk(ciphertext, &km)?;
    if hash_bytes(&plaintext) != info.pre_hash {
        error!(index = info.index, "decrypted chunk does not match its pre-hash");
        return Err(SelfEncError::ChunkVerificationFailed { index: info.index });
    }
    Ok(Bytes::from(plaintext))
}

fn successor_hashes(table: &ChunkTable, index: u32) -> (Hash, Hash) {
    let (n1, n2) = successor_indices(index as usize, table.chunks.len());
    (table.chunks[n1].pre_hash, table.chunks[n2].pre_hash)
}

/// Fetch chunk `info` and decrypt it on the blocking pool.
async fn fetch_chunk<S>(table: &ChunkTable, info: ChunkInfo, store: &S) -> SelfEncResult<Bytes>
where
    S: ChunkStore + ?Sized,
{
    let (h1, h2) = successor_hashes(table, info.index);
    let ciphertext = store.get(info.post_hash).await?;
    debug!(index = info.index, bytes = ciphertext.len(), "fetched chunk");
    tokio::task::spawn_blocking(move || open_chunk(info, h1, h2, &ciphertext))
        .await
        .map_err(|e| SelfEncError::Task(format!("decrypt worker: {e}")))?
}

/// Resolve packed layers so callers always work on a Raw map.
async fn raw_map<'m, S>(
    map: &'m DataMap,
    store: &S,
    cfg: &CodecConfig,
) -> SelfEncResult<Cow<'m, DataMap>>
where
    S: ChunkStore + ?Sized,
{
    if map.is_packed() {
        Ok(Cow::Owned(unpack(map.clone(), store, cfg).await?))
    } else {
        Ok(Cow::Borrowed(map))
    }
}

/// Decrypt the bytes a map describes. Packed maps are unpacked first.
pub async fn decrypt<S>(map: &DataMap, store: &S, cfg: &CodecConfig) -> SelfEncResult<Bytes>
where
    S: ChunkStore + ?Sized,
{
    let raw = raw_map(map, store, cfg).await?;
    let data = decrypt_table(raw.table(), store, cfg).await?;
    info!(bytes = data.len(), chunks = raw.chunk_count(), "decrypted data");
    Ok(data)
}

/// Decrypt one table (no unpacking). Shared with the packer.
pub(crate) async fn decrypt_table<S>(
    table: &ChunkTable,
    store: &S,
    cfg: &CodecConfig,
) -> SelfEncResult<Bytes>
where
    S: ChunkStore + ?Sized,
{
    table.validate()?;
    let batch = cfg.concurrency.download_batch.max(1);

    let offsets = table.offsets();
    let mut out = vec![0u8; table.original_size as usize];

    // Arrival order is arbitrary; each chunk is placed by index as it lands
    stream::iter(table.chunks.iter().copied())
        .map(|info| async move {
            let plain = fetch_chunk(table, info, store).await?;
            Ok::<_, SelfEncError>((info.index, plain))
        })
        .buffer_unordered(batch)
        .try_for_each(|(index, plain)| {
            let start = offsets[index as usize] as usize;
            out[start..start + plain.len()].copy_from_slice(&plain);
            future::ready(Ok(()))
        })
        .await?;

    Ok(Bytes::from(out))
}

/// Decrypt into `writer`, in order, with up to `download_batch` fetches in
/// flight. Returns the number of bytes written.
pub async fn decrypt_to_writer<S, W>(
    map: &DataMap,
    store: &S,
    writer: &mut W,
    cfg: &CodecConfig,
) -> SelfEncResult<u64>
where
    S: ChunkStore + ?Sized,
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    let raw = raw_map(map, store, cfg).await?;
    let table = raw.table();
    table.validate()?;
    let batch = cfg.concurrency.download_batch.max(1);

    let mut chunks = stream::iter(table.chunks.iter().copied())
        .map(|info| fetch_chunk(table, info, store))
        .buffered(batch);

    let mut written = 0u64;
    while let Some(plain) = chunks.next().await {
        let plain = plain?;
        writer.write_all(&plain).await?;
        written += plain.len() as u64;
    }
    writer.flush().await?;

    if written != table.original_size {
        return Err(SelfEncError::DataMapMalformed(format!(
            "wrote {written} bytes, map claims {}",
            table.original_size
        )));
    }
    info!(bytes = written, chunks = table.chunks.len(), "streamed decryption");
    Ok(written)
}

/// Decrypt `len` bytes starting at `offset`, fetching only the chunks that
/// overlap the range.
pub async fn decrypt_range<S>(
    map: &DataMap,
    store: &S,
    offset: u64,
    len: u64,
    cfg: &CodecConfig,
) -> SelfEncResult<Bytes>
where
    S: ChunkStore + ?Sized,
{
    let raw = raw_map(map, store, cfg).await?;
    let table = raw.table();
    table.validate()?;

    let size = table.original_size;
    let end = offset
        .checked_add(len)
        .filter(|&end| end <= size)
        .ok_or(SelfEncError::RangeOutOfBounds { offset, len, size })?;
    if len == 0 {
        return Ok(Bytes::new());
    }

    let offsets = table.offsets();
    let touched: Vec<ChunkInfo> = table
        .chunks
        .iter()
        .zip(&offsets)
        .filter(|(info, start)| **start < end && **start + u64::from(info.size) > offset)
        .map(|(info, _)| *info)
        .collect();
    let Some(first) = touched.first() else {
        return Ok(Bytes::new());
    };
    let first_start = offsets[first.index as usize];
    debug!(offset, len, chunks = touched.len(), "range decryption");

    let parts: Vec<Bytes> = stream::iter(touched.iter().copied())
        .map(|info| fetch_chunk(table, info, store))
        .buffered(cfg.concurrency.download_batch.max(1))
        .try_collect()
        .await?;

    let mut joined = Vec::with_capacity(parts.iter().map(Bytes::len).sum());
    for part in &parts {
        joined.extend_from_slice(part);
    }
    let from = (offset - first_start) as usize;
    Ok(Bytes::from(joined).slice(from..from + len as usize))
}
