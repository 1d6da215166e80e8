//! Streaming self-encryption
//!
//! With the total size announced up front, boundaries are fixed before the
//! first byte arrives and chunks leave the encryptor as soon as the hashes of
//! their two successors are known. Chunk `i < N-2` waits for chunks `i+1` and
//! `i+2`; the last two chunks wrap around to chunks 0 and 1, which are hashed
//! first, so no more than three chunk plaintexts are ever held.
//!
//! Without a size the input is buffered and encrypted at `finalize`.

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use rayon::prelude::*;
use selfenc_chunks::{chunk_boundaries, hash_bytes, ChunkSpan, Hash, RawChunk};
use selfenc_core::{CodecConfig, SelfEncError, SelfEncResult};
use selfenc_crypto::{derive_from_successors, successor_indices};
use selfenc_storage::ChunkStore;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::data_map::{ChunkInfo, ChunkTable, DataMap};
use crate::encrypt::{encrypt, on_encrypt_pool, seal, store_chunks, EncryptedChunk};

const READ_BUF_SIZE: usize = 64 * 1024;

/// Reads queued ahead of the encryption worker
const INPUT_QUEUE: usize = 4;

/// Encrypted batches queued ahead of the sink
const OUTPUT_QUEUE: usize = 2;

/// Incremental encryptor fed with sequential writes.
#[derive(Debug)]
pub struct StreamEncryptor {
    cfg: CodecConfig,
    mode: Mode,
}

#[derive(Debug)]
enum Mode {
    Sized(SizedState),
    Buffered { buf: BytesMut },
}

#[derive(Debug)]
struct SizedState {
    total_size: u64,
    received: u64,
    spans: Vec<ChunkSpan>,
    /// Bytes of the chunk currently being filled
    current: BytesMut,
    /// Pre-hashes of every chunk completed so far, in index order
    pre_hashes: Vec<Hash>,
    /// Hashed chunks still waiting on a successor's hash
    pending: VecDeque<RawChunk>,
    infos: Vec<ChunkInfo>,
}

impl StreamEncryptor {
    /// Encryptor for an input of exactly `total_size` bytes.
    pub fn new(total_size: u64, cfg: &CodecConfig) -> SelfEncResult<Self> {
        cfg.validate()?;
        let spans = chunk_boundaries(total_size, cfg.chunking)?;
        let first_len = spans.first().map(|s| s.length as usize).unwrap_or(0);
        debug!(total_size, chunks = spans.len(), "stream encryptor ready");
        Ok(Self {
            cfg: *cfg,
            mode: Mode::Sized(SizedState {
                total_size,
                received: 0,
                current: BytesMut::with_capacity(first_len),
                pre_hashes: Vec::with_capacity(spans.len()),
                pending: VecDeque::with_capacity(3),
                infos: Vec::with_capacity(spans.len()),
                spans,
            }),
        })
    }

    /// Encryptor for an input whose length is only known at the end.
    pub fn with_unknown_size(cfg: &CodecConfig) -> SelfEncResult<Self> {
        cfg.validate()?;
        Ok(Self {
            cfg: *cfg,
            mode: Mode::Buffered {
                buf: BytesMut::new(),
            },
        })
    }

    /// Bytes accepted so far
    pub fn bytes_received(&self) -> u64 {
        match &self.mode {
            Mode::Sized(s) => s.received,
            Mode::Buffered { buf } => buf.len() as u64,
        }
    }

    /// Append the next bytes of input.
    ///
    /// Returns every chunk that became encryptable, in index order.
    pub fn write(&mut self, data: &[u8]) -> SelfEncResult<Vec<EncryptedChunk>> {
        match &mut self.mode {
            Mode::Buffered { buf } => {
                buf.extend_from_slice(data);
                Ok(Vec::new())
            }
            Mode::Sized(state) => state.write(data, &self.cfg),
        }
    }

    /// Finish the stream and produce the DataMap.
    ///
    /// A sized stream has already emitted all of its chunks by the time the
    /// last byte is written; one of unknown size emits them all here.
    pub fn finalize(self) -> SelfEncResult<(DataMap, Vec<EncryptedChunk>)> {
        match self.mode {
            Mode::Buffered { buf } => encrypt(buf.freeze(), &self.cfg),
            Mode::Sized(state) => {
                if state.received < state.total_size {
                    return Err(SelfEncError::StreamIncomplete {
                        expected: state.total_size,
                        received: state.received,
                    });
                }
                debug_assert!(state.pending.is_empty());
                Ok((
                    DataMap::Raw(ChunkTable {
                        chunks: state.infos,
                        original_size: state.total_size,
                    }),
                    Vec::new(),
                ))
            }
        }
    }
}

impl SizedState {
    fn write(&mut self, mut data: &[u8], cfg: &CodecConfig) -> SelfEncResult<Vec<EncryptedChunk>> {
        let after = self.received + data.len() as u64;
        if after > self.total_size {
            return Err(SelfEncError::StreamOverflow {
                expected: self.total_size,
                received: after,
            });
        }
        self.received = after;

        let mut ready = Vec::new();
        while !data.is_empty() {
            let index = self.pre_hashes.len();
            let want = self.spans[index].length as usize - self.current.len();
            let take = want.min(data.len());
            self.current.extend_from_slice(&data[..take]);
            data = &data[take..];

            if take == want {
                self.complete_chunk(index as u32, &mut ready);
            }
        }
        self.seal_ready(ready, cfg)
    }

    /// Hash the filled chunk and move every chunk whose successors are now
    /// hashed into `ready`.
    fn complete_chunk(&mut self, index: u32, ready: &mut Vec<RawChunk>) {
        let next_len = self
            .spans
            .get(index as usize + 1)
            .map(|s| s.length as usize)
            .unwrap_or(0);
        let content = std::mem::replace(&mut self.current, BytesMut::with_capacity(next_len))
            .freeze();
        self.pre_hashes.push(hash_bytes(&content));
        self.pending.push_back(RawChunk { index, content });
        trace!(index, pending = self.pending.len(), "chunk hashed");

        while let Some(front) = self.pending.front() {
            if self.successor_hashes(front.index).is_none() {
                break;
            }
            let Some(chunk) = self.pending.pop_front() else {
                break;
            };
            ready.push(chunk);
        }
    }

    /// Encrypt released chunks in parallel on the encryption pool.
    fn seal_ready(
        &mut self,
        ready: Vec<RawChunk>,
        cfg: &CodecConfig,
    ) -> SelfEncResult<Vec<EncryptedChunk>> {
        if ready.is_empty() {
            return Ok(Vec::new());
        }
        let this = &*self;
        let sealed = on_encrypt_pool(cfg, || -> SelfEncResult<Vec<(ChunkInfo, EncryptedChunk)>> {
            ready
                .par_iter()
                .map(|chunk| {
                    let (h1, h2) = this.successor_hashes(chunk.index).ok_or_else(|| {
                        SelfEncError::Task(format!("chunk {} released early", chunk.index))
                    })?;
                    let km = derive_from_successors(chunk.index, &h1, &h2, chunk.content.len())?;
                    seal(chunk, this.pre_hashes[chunk.index as usize], &km)
                })
                .collect()
        })??;

        let mut out = Vec::with_capacity(sealed.len());
        for (info, encrypted) in sealed {
            self.infos.push(info);
            out.push(encrypted);
        }
        Ok(out)
    }

    /// Successor pre-hashes of `index`, once both are known
    fn successor_hashes(&self, index: u32) -> Option<(Hash, Hash)> {
        let (n1, n2) = successor_indices(index as usize, self.spans.len());
        Some((*self.pre_hashes.get(n1)?, *self.pre_hashes.get(n2)?))
    }
}

/// Destination for chunks produced by a streaming encryption.
#[async_trait]
pub trait ChunkSink: Send {
    async fn accept(&mut self, chunk: EncryptedChunk) -> SelfEncResult<()>;

    /// Accept a batch of chunks, with up to `concurrency` in flight when the
    /// sink can overlap them. Defaults to one `accept` after another.
    async fn accept_all(
        &mut self,
        chunks: Vec<EncryptedChunk>,
        _concurrency: usize,
    ) -> SelfEncResult<()> {
        for chunk in chunks {
            self.accept(chunk).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ChunkSink for Vec<EncryptedChunk> {
    async fn accept(&mut self, chunk: EncryptedChunk) -> SelfEncResult<()> {
        self.push(chunk);
        Ok(())
    }

    async fn accept_all(
        &mut self,
        chunks: Vec<EncryptedChunk>,
        _concurrency: usize,
    ) -> SelfEncResult<()> {
        self.extend(chunks);
        Ok(())
    }
}

/// Sink that puts every chunk into a store as it arrives
pub struct StoreSink<'a, S: ?Sized> {
    store: &'a S,
    stored: usize,
}

impl<'a, S: ChunkStore + ?Sized> StoreSink<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store, stored: 0 }
    }

    /// Chunks put so far
    pub fn stored(&self) -> usize {
        self.stored
    }
}

#[async_trait]
impl<S: ChunkStore + ?Sized> ChunkSink for StoreSink<'_, S> {
    async fn accept(&mut self, chunk: EncryptedChunk) -> SelfEncResult<()> {
        self.store.put(chunk.address, chunk.content).await?;
        self.stored += 1;
        Ok(())
    }

    async fn accept_all(
        &mut self,
        chunks: Vec<EncryptedChunk>,
        concurrency: usize,
    ) -> SelfEncResult<()> {
        let n = chunks.len();
        store_chunks(self.store, chunks, concurrency).await?;
        self.stored += n;
        Ok(())
    }
}

/// Read `reader` to the end through a `StreamEncryptor`, handing each chunk
/// to `sink` as soon as it is available.
///
/// `total_size` selects sized (bounded memory) or buffered mode. Hashing and
/// encryption run on the blocking pool; the async side only reads input and
/// drains chunks into the sink, up to `upload_batch` at a time.
pub async fn encrypt_with_sink<R, K>(
    reader: R,
    total_size: Option<u64>,
    sink: &mut K,
    cfg: &CodecConfig,
) -> SelfEncResult<DataMap>
where
    R: AsyncRead + Unpin + Send,
    K: ChunkSink + ?Sized,
{
    let mut enc = match total_size {
        Some(n) => StreamEncryptor::new(n, cfg)?,
        None => StreamEncryptor::with_unknown_size(cfg)?,
    };
    let upload_batch = cfg.concurrency.upload_batch.max(1);

    let (input_tx, mut input_rx) = mpsc::channel::<Bytes>(INPUT_QUEUE);
    let (chunk_tx, mut chunk_rx) = mpsc::channel::<Vec<EncryptedChunk>>(OUTPUT_QUEUE);

    let worker = tokio::task::spawn_blocking(move || -> SelfEncResult<DataMap> {
        while let Some(piece) = input_rx.blocking_recv() {
            let ready = enc.write(&piece)?;
            if !ready.is_empty() && chunk_tx.blocking_send(ready).is_err() {
                return Err(SelfEncError::Task("chunk sink went away".into()));
            }
        }
        let (map, rest) = enc.finalize()?;
        if !rest.is_empty() && chunk_tx.blocking_send(rest).is_err() {
            return Err(SelfEncError::Task("chunk sink went away".into()));
        }
        Ok(map)
    });

    let feed = async move {
        let mut reader = reader;
        loop {
            let mut buf = BytesMut::with_capacity(READ_BUF_SIZE);
            if reader.read_buf(&mut buf).await? == 0 {
                break;
            }
            // A closed queue means the worker stopped; its result says why
            if input_tx.send(buf.freeze()).await.is_err() {
                break;
            }
        }
        Ok::<_, SelfEncError>(())
    };

    let drain = async {
        while let Some(batch) = chunk_rx.recv().await {
            sink.accept_all(batch, upload_batch).await?;
        }
        Ok::<_, SelfEncError>(())
    };

    futures::try_join!(feed, drain)?;
    let map = worker
        .await
        .map_err(|e| SelfEncError::Task(format!("stream encrypt worker: {e}")))??;

    debug!(
        bytes = map.original_size(),
        chunks = map.chunk_count(),
        "stream encryption complete"
    );
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use selfenc_core::config::ChunkingConfig;

    fn cfg(max: u32) -> CodecConfig {
        CodecConfig {
            chunking: ChunkingConfig {
                min_chunk_size: 1,
                max_chunk_size: max,
            },
            ..Default::default()
        }
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn sized_stream_matches_whole_buffer() {
        let data = sample(5_000);
        let (expected_map, expected_chunks) = encrypt(Bytes::from(data.clone()), &cfg(512)).unwrap();

        let mut enc = StreamEncryptor::new(data.len() as u64, &cfg(512)).unwrap();
        let mut chunks = Vec::new();
        for piece in data.chunks(97) {
            chunks.extend(enc.write(piece).unwrap());
        }
        let (map, rest) = enc.finalize().unwrap();
        assert!(rest.is_empty());
        assert_eq!(map, expected_map);
        assert_eq!(chunks, expected_chunks);
    }

    #[test]
    fn chunks_are_released_two_behind_the_reader() {
        // 40 bytes, max 10 -> four 10-byte chunks
        let data = sample(40);
        let mut enc = StreamEncryptor::new(40, &cfg(10)).unwrap();

        assert!(enc.write(&data[..20]).unwrap().is_empty());
        let after_third = enc.write(&data[20..30]).unwrap();
        assert_eq!(after_third.len(), 1, "chunk 0 needs chunks 1 and 2");
        let after_last = enc.write(&data[30..]).unwrap();
        assert_eq!(after_last.len(), 3, "chunks 1..=3 complete together");
    }

    #[test]
    fn unknown_size_stream_emits_at_finalize() {
        let data = sample(3_000);
        let mut enc = StreamEncryptor::with_unknown_size(&cfg(256)).unwrap();
        assert!(enc.write(&data).unwrap().is_empty());
        assert_eq!(enc.bytes_received(), 3_000);

        let (map, chunks) = enc.finalize().unwrap();
        let (expected_map, expected_chunks) = encrypt(Bytes::from(data), &cfg(256)).unwrap();
        assert_eq!(map, expected_map);
        assert_eq!(chunks, expected_chunks);
    }

    #[test]
    fn short_stream_is_incomplete() {
        let mut enc = StreamEncryptor::new(100, &cfg(10)).unwrap();
        enc.write(&[1u8; 60]).unwrap();
        let err = enc.finalize().unwrap_err();
        assert!(matches!(
            err,
            SelfEncError::StreamIncomplete {
                expected: 100,
                received: 60
            }
        ));
    }

    #[test]
    fn writing_past_the_announced_size_overflows() {
        let mut enc = StreamEncryptor::new(10, &cfg(10)).unwrap();
        enc.write(&[0u8; 8]).unwrap();
        let err = enc.write(&[0u8; 3]).unwrap_err();
        assert!(matches!(
            err,
            SelfEncError::StreamOverflow {
                expected: 10,
                received: 11
            }
        ));
    }

    #[test]
    fn announced_size_below_three_is_rejected() {
        assert!(matches!(
            StreamEncryptor::new(2, &cfg(10)),
            Err(SelfEncError::InputTooSmall { .. })
        ));
    }

    #[tokio::test]
    async fn reader_into_vec_sink() {
        let data = sample(10_000);
        let mut sink: Vec<EncryptedChunk> = Vec::new();
        let map = encrypt_with_sink(&data[..], Some(data.len() as u64), &mut sink, &cfg(1_000))
            .await
            .unwrap();
        assert_eq!(map.chunk_count(), 10);
        assert_eq!(sink.len(), 10);

        let mut buffered_sink: Vec<EncryptedChunk> = Vec::new();
        let buffered_map = encrypt_with_sink(&data[..], None, &mut buffered_sink, &cfg(1_000))
            .await
            .unwrap();
        assert_eq!(buffered_map, map);
        assert_eq!(buffered_sink, sink);
    }

    #[tokio::test]
    async fn encryption_leaves_the_runtime_responsive() {
        // Current-thread runtime: the ticker only runs while the encryption
        // future is parked
        let ticks = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = ticks.clone();
        let ticker = tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        });

        let data = sample(32 * 1024 * 1024);
        let mut sink: Vec<EncryptedChunk> = Vec::new();
        let map = encrypt_with_sink(&data[..], Some(data.len() as u64), &mut sink, &cfg(256 * 1024))
            .await
            .unwrap();
        ticker.abort();

        assert_eq!(map.chunk_count(), 128);
        assert!(ticks.load(std::sync::atomic::Ordering::Relaxed) > 0);
    }

    #[tokio::test]
    async fn store_sink_counts_batched_puts() {
        use selfenc_storage::MemoryStore;

        let data = sample(20_000);
        let (_, chunks) = encrypt(Bytes::from(data), &cfg(1_000)).unwrap();
        let store = MemoryStore::new();
        let mut sink = StoreSink::new(&store);
        sink.accept_all(chunks.clone(), 4).await.unwrap();

        assert_eq!(sink.stored(), 20);
        assert_eq!(store.len(), 20);
        assert_eq!(store.put_count(), 20);
    }
}
