use thiserror::Error;

pub type SelfEncResult<T> = Result<T, SelfEncError>;

#[derive(Debug, Error)]
pub enum SelfEncError {
    #[error("input too small for self-encryption: {size} bytes (minimum {min})")]
    InputTooSmall { size: u64, min: u64 },

    #[error("chunk not found: {0}")]
    ChunkNotFound(String),

    #[error("chunk {index} failed verification")]
    ChunkVerificationFailed { index: u32 },

    #[error("malformed data map: {0}")]
    DataMapMalformed(String),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("stream ended early: expected {expected} bytes, received {received}")]
    StreamIncomplete { expected: u64, received: u64 },

    #[error("stream overflow: {received} bytes written, only {expected} announced")]
    StreamOverflow { expected: u64, received: u64 },

    #[error("range {offset}+{len} lies beyond the {size}-byte input")]
    RangeOutOfBounds { offset: u64, len: u64, size: u64 },

    #[error("cipher input error: {0}")]
    CipherInput(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("worker task failed: {0}")]
    Task(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by a chunk store adapter.
///
/// The codec never retries; retry policy belongs to the adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("backend: {0}")]
    Backend(String),
}

impl From<StoreError> for SelfEncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(address) => SelfEncError::ChunkNotFound(address),
            other => SelfEncError::Store(other),
        }
    }
}
