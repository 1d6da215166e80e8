use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{SelfEncError, SelfEncResult};

/// Smallest input that still splits into three non-empty chunks
pub const MIN_ENCRYPTABLE_BYTES: u64 = 3;

/// Largest accepted `max_chunk_size`. The third chunk of a three-chunk
/// layout may exceed the maximum by two bytes and must still fit a u32.
pub const MAX_CHUNK_SIZE_LIMIT: u32 = u32::MAX - 2;

/// Upload concurrency override (number of chunk puts in flight)
pub const UPLOAD_BATCH_ENV: &str = "SELFENC_UPLOAD_BATCH";

/// Download concurrency override (number of chunk gets in flight)
pub const DOWNLOAD_BATCH_ENV: &str = "SELFENC_DOWNLOAD_BATCH";

/// Top-level configuration (loaded from selfenc.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfEncConfig {
    pub chunking: ChunkingConfig,
    pub packing: PackingConfig,
    pub concurrency: ConcurrencyConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Floor below which input is split into three near-equal chunks (default: 1)
    pub min_chunk_size: u32,
    /// Upper bound on a single chunk's plaintext size (default: 1 MiB)
    pub max_chunk_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackingConfig {
    /// Serialized data maps larger than this are self-encrypted into a packed map
    pub inline_threshold: usize,
    /// Maximum number of packed layers accepted when unpacking
    pub max_depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Encryption worker threads (0 = cpu_count)
    pub encrypt_workers: usize,
    /// Chunk puts in flight per encrypt call
    pub upload_batch: usize,
    /// Chunk gets in flight per decrypt call
    pub download_batch: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend kind: "fs", "memory" or "s3"
    pub backend: String,
    /// Root directory for the fs backend
    pub root: PathBuf,
    /// Key prefix under which chunk objects are written
    pub prefix: String,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// S3 bucket name
    pub bucket: String,
    /// Enforce HTTPS for S3 connections (error on HTTP endpoints)
    pub enforce_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

/// The subset of configuration the codec itself consumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecConfig {
    pub chunking: ChunkingConfig,
    pub packing: PackingConfig,
    pub concurrency: ConcurrencyConfig,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_chunk_size: 1,
            max_chunk_size: 1024 * 1024,
        }
    }
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self {
            inline_threshold: 4096,
            max_depth: 8,
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            encrypt_workers: 0,
            upload_batch: 8,
            download_batch: 8,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "fs".into(),
            root: PathBuf::from("~/.local/share/selfenc/store"),
            prefix: "selfenc".into(),
            endpoint: "http://localhost:8333".into(),
            region: "us-east-1".into(),
            bucket: "selfenc".into(),
            enforce_tls: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ChunkingConfig {
    /// Shortest chunk the balanced (more than three chunks) layout can emit.
    ///
    /// Reached at `3 * max + 1` bytes, split into four chunks.
    pub fn shortest_balanced_chunk(&self) -> u32 {
        ((3 * u64::from(self.max_chunk_size) + 1) / 4) as u32
    }
}

impl ConcurrencyConfig {
    /// Resolved worker count for the encryption pool
    pub fn workers(&self) -> usize {
        if self.encrypt_workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.encrypt_workers
        }
    }

    /// Apply `SELFENC_UPLOAD_BATCH` / `SELFENC_DOWNLOAD_BATCH` overrides.
    ///
    /// Unparseable or zero values are ignored with a warning.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(n) = batch_from_env(UPLOAD_BATCH_ENV) {
            self.upload_batch = n;
        }
        if let Some(n) = batch_from_env(DOWNLOAD_BATCH_ENV) {
            self.download_batch = n;
        }
        self
    }
}

fn batch_from_env(var: &str) -> Option<usize> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::warn!(var, value = %raw, "ignoring invalid batch size override");
            None
        }
    }
}

impl SelfEncConfig {
    /// Load configuration from a TOML file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> SelfEncResult<Self> {
        if !path.exists() {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| SelfEncError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the codec cannot work with.
    pub fn validate(&self) -> SelfEncResult<()> {
        self.codec().validate()?;
        match self.storage.backend.as_str() {
            "fs" | "memory" | "s3" => {}
            other => {
                return Err(SelfEncError::Config(format!(
                    "unknown storage backend '{other}' (expected fs, memory or s3)"
                )))
            }
        }
        match self.logging.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(SelfEncError::Config(format!(
                "unknown log format '{other}' (expected json or text)"
            ))),
        }
    }

    /// Codec settings with environment overrides applied
    pub fn codec(&self) -> CodecConfig {
        CodecConfig {
            chunking: self.chunking,
            packing: self.packing,
            concurrency: self.concurrency.with_env_overrides(),
        }
    }
}

impl CodecConfig {
    pub fn validate(&self) -> SelfEncResult<()> {
        let c = &self.chunking;
        if c.min_chunk_size == 0 || c.max_chunk_size == 0 {
            return Err(SelfEncError::Config(
                "chunk sizes must be non-zero".into(),
            ));
        }
        if c.min_chunk_size > c.max_chunk_size {
            return Err(SelfEncError::Config(format!(
                "min_chunk_size ({}) exceeds max_chunk_size ({})",
                c.min_chunk_size, c.max_chunk_size
            )));
        }
        if c.max_chunk_size > MAX_CHUNK_SIZE_LIMIT {
            return Err(SelfEncError::Config(format!(
                "max_chunk_size ({}) exceeds {MAX_CHUNK_SIZE_LIMIT}",
                c.max_chunk_size
            )));
        }
        if c.min_chunk_size > c.shortest_balanced_chunk() {
            return Err(SelfEncError::Config(format!(
                "min_chunk_size ({}) exceeds {}, the shortest chunk a max_chunk_size of {} can produce",
                c.min_chunk_size,
                c.shortest_balanced_chunk(),
                c.max_chunk_size
            )));
        }
        if self.packing.max_depth == 0 {
            return Err(SelfEncError::Config("packing.max_depth must be >= 1".into()));
        }
        if self.concurrency.upload_batch == 0 || self.concurrency.download_batch == 0 {
            return Err(SelfEncError::Config("batch sizes must be >= 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[chunking]
min_chunk_size = 64
max_chunk_size = 65536

[packing]
inline_threshold = 2048
max_depth = 4

[concurrency]
encrypt_workers = 2
upload_batch = 16
download_batch = 32

[storage]
backend = "s3"
endpoint = "https://s3.example.com:8333"
region = "us-west-2"
bucket = "my-bucket"
prefix = "data"
enforce_tls = true

[logging]
level = "debug"
format = "json"
"#;
        let config: SelfEncConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.chunking.min_chunk_size, 64);
        assert_eq!(config.chunking.max_chunk_size, 65536);
        assert_eq!(config.packing.inline_threshold, 2048);
        assert_eq!(config.packing.max_depth, 4);
        assert_eq!(config.concurrency.workers(), 2);
        assert_eq!(config.concurrency.upload_batch, 16);
        assert_eq!(config.storage.backend, "s3");
        assert!(config.storage.enforce_tls);
        assert_eq!(config.logging.format, "json");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_defaults() {
        let config: SelfEncConfig = toml::from_str("").unwrap();

        assert_eq!(config.chunking.min_chunk_size, 1);
        assert_eq!(config.chunking.max_chunk_size, 1024 * 1024);
        assert_eq!(config.packing.inline_threshold, 4096);
        assert_eq!(config.concurrency.upload_batch, 8);
        assert_eq!(config.storage.backend, "fs");
        assert_eq!(config.logging.level, "info");
        assert!(config.concurrency.workers() >= 1);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[chunking]
max_chunk_size = 4096
"#;
        let config: SelfEncConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.chunking.max_chunk_size, 4096);
        // Defaults
        assert_eq!(config.chunking.min_chunk_size, 1);
        assert_eq!(config.packing.max_depth, 8);
    }

    #[test]
    fn test_validate_rejects_inverted_sizes() {
        let mut config = SelfEncConfig::default();
        config.chunking.min_chunk_size = 1000;
        config.chunking.max_chunk_size = 10;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn test_validate_rejects_min_above_shortest_balanced_chunk() {
        let mut config = SelfEncConfig::default();
        config.chunking.min_chunk_size = 10;
        config.chunking.max_chunk_size = 10;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("shortest chunk"));

        // 31 bytes at max 10 splits 7, 8, 8, 8
        config.chunking.min_chunk_size = 7;
        assert_eq!(config.chunking.shortest_balanced_chunk(), 7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_shortest_balanced_chunk_small_maxima() {
        let sizes = |max| ChunkingConfig {
            min_chunk_size: 1,
            max_chunk_size: max,
        };
        assert_eq!(sizes(1).shortest_balanced_chunk(), 1);
        assert_eq!(sizes(5).shortest_balanced_chunk(), 4);
        assert_eq!(sizes(1024 * 1024).shortest_balanced_chunk(), 786_432);
        assert_eq!(sizes(u32::MAX).shortest_balanced_chunk(), 3_221_225_471);
    }

    #[test]
    fn test_validate_caps_max_chunk_size() {
        let mut config = SelfEncConfig::default();
        config.chunking.max_chunk_size = u32::MAX;
        assert!(matches!(config.validate(), Err(SelfEncError::Config(_))));
        config.chunking.max_chunk_size = MAX_CHUNK_SIZE_LIMIT;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_backend() {
        let mut config = SelfEncConfig::default();
        config.storage.backend = "ftp".into();
        assert!(matches!(config.validate(), Err(SelfEncError::Config(_))));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = SelfEncConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.packing.inline_threshold, 4096);
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("selfenc.toml");
        std::fs::write(&path, "[packing]\ninline_threshold = 1024\n").unwrap();
        let config = SelfEncConfig::load(&path).unwrap();
        assert_eq!(config.packing.inline_threshold, 1024);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = SelfEncConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: SelfEncConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.chunking, parsed.chunking);
        assert_eq!(config.packing, parsed.packing);
        assert_eq!(config.storage.prefix, parsed.storage.prefix);
    }
}
