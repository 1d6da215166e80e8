//! selfenc: self-encrypt files into a chunk store
//!
//! Commands:
//!   encrypt <file> [--out <map.json>] [--no-pack]  - stream a file into the store
//!   decrypt <map> <out>                            - restore a file from its data map
//!   inspect <map> [--resolve]                      - print a data map's chunk table
//!   health                                         - probe the configured store
//!   config show                                    - print the effective configuration
//!
//! `<map>` is either a path to a JSON data map or its hex encoding.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use selfenc::{
    decrypt_to_writer, encrypt_with_sink, pack, unpack, ChunkSink, DataMap, EncryptedChunk,
    SelfEncResult, StoreSink,
};
use selfenc_core::config::SelfEncConfig;
use selfenc_storage::{build_operator, check_health, OperatorStore, S3Credentials};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "selfenc",
    version,
    about = "Self-encrypting chunk store client",
    long_about = "selfenc: split files into convergently encrypted chunks and restore them from a data map"
)]
struct Cli {
    /// Path to selfenc.toml configuration file
    #[arg(long, short = 'c', env = "SELFENC_CONFIG", default_value = "selfenc.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [logging].level
    #[arg(long, env = "SELFENC_LOG")]
    log: Option<String>,

    /// Log format; overrides [logging].format
    #[arg(long, env = "SELFENC_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Self-encrypt a file into the configured store
    ///
    /// S3 credentials are read from AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY.
    Encrypt {
        /// File to encrypt
        file: PathBuf,
        /// Write the data map as JSON here instead of printing its hex form
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
        /// Keep the data map raw even when it exceeds the inline threshold
        #[arg(long)]
        no_pack: bool,
    },

    /// Restore a file from its data map
    Decrypt {
        /// Data map: JSON file path or hex string
        map: String,
        /// Destination file
        out: PathBuf,
    },

    /// Show a data map's chunk table
    Inspect {
        /// Data map: JSON file path or hex string
        map: String,
        /// Unpack packed layers through the store before printing
        #[arg(long)]
        resolve: bool,
    },

    /// Check that the configured store is reachable
    Health,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let level = cli.log.as_deref().unwrap_or(&config.logging.level);
    let format = cli.log_format.unwrap_or(if config.logging.format == "json" {
        LogFormat::Json
    } else {
        LogFormat::Text
    });
    init_logging(level, format);

    if !cli.config.exists() {
        warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        backend = %config.storage.backend,
        "selfenc starting"
    );

    match cli.command {
        Commands::Encrypt { file, out, no_pack } => {
            cmd_encrypt(&config, &file, out.as_deref(), no_pack).await
        }
        Commands::Decrypt { map, out } => cmd_decrypt(&config, &map, &out).await,
        Commands::Inspect { map, resolve } => cmd_inspect(&config, &map, resolve).await,
        Commands::Health => cmd_health(&config).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so a printed data map stays pipeable
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

// ── Config and storage ────────────────────────────────────────────────────────

fn load_config(path: &Path) -> Result<SelfEncConfig> {
    SelfEncConfig::load(path).with_context(|| format!("loading config: {}", path.display()))
}

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}

/// S3 credentials from the standard AWS variables, with SELFENC_ fallbacks.
fn credentials_from_env() -> Result<S3Credentials> {
    let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
        .or_else(|_| std::env::var("SELFENC_ACCESS_KEY_ID"))
        .context(
            "S3 credentials not set\n\
             Set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY environment variables.\n\
             Example:\n\
             \texport AWS_ACCESS_KEY_ID=your-key\n\
             \texport AWS_SECRET_ACCESS_KEY=your-secret",
        )?;
    let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .or_else(|_| std::env::var("SELFENC_SECRET_ACCESS_KEY"))
        .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
    Ok(S3Credentials {
        access_key_id,
        secret_access_key,
    })
}

fn open_store(config: &SelfEncConfig) -> Result<OperatorStore> {
    let mut storage = config.storage.clone();
    storage.root = expand_tilde(&storage.root);

    let creds = if storage.backend == "s3" {
        Some(credentials_from_env()?)
    } else {
        None
    };
    if storage.backend == "fs" {
        std::fs::create_dir_all(&storage.root)
            .with_context(|| format!("creating store root: {}", storage.root.display()))?;
    }
    let op = build_operator(&storage, creds.as_ref()).context("building storage operator")?;
    Ok(OperatorStore::new(op, storage.prefix))
}

/// Parse `<map>`: an existing file holding JSON, otherwise a hex string.
async fn read_map(arg: &str) -> Result<DataMap> {
    let path = Path::new(arg);
    if path.is_file() {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading data map: {}", path.display()))?;
        DataMap::from_bytes(&bytes).with_context(|| format!("parsing data map: {}", path.display()))
    } else {
        DataMap::from_hex(arg).context("argument is neither a data map file nor a hex data map")
    }
}

// ── Progress helpers ──────────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
    )
    .map(|s| s.progress_chars("=>-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Store sink that advances a progress bar by each stored chunk's size
struct ProgressSink<'a> {
    inner: StoreSink<'a, OperatorStore>,
    pb: ProgressBar,
}

#[async_trait]
impl ChunkSink for ProgressSink<'_> {
    async fn accept(&mut self, chunk: EncryptedChunk) -> SelfEncResult<()> {
        let len = chunk.content.len() as u64;
        self.inner.accept(chunk).await?;
        self.pb.inc(len);
        Ok(())
    }

    async fn accept_all(
        &mut self,
        chunks: Vec<EncryptedChunk>,
        concurrency: usize,
    ) -> SelfEncResult<()> {
        let len: u64 = chunks.iter().map(|c| c.content.len() as u64).sum();
        self.inner.accept_all(chunks, concurrency).await?;
        self.pb.inc(len);
        Ok(())
    }
}

// ── `selfenc encrypt` ─────────────────────────────────────────────────────────

async fn cmd_encrypt(
    config: &SelfEncConfig,
    file: &Path,
    out: Option<&Path>,
    no_pack: bool,
) -> Result<()> {
    let store = open_store(config)?;
    let codec = config.codec();

    let input = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("opening {}", file.display()))?;
    let size = input
        .metadata()
        .await
        .with_context(|| format!("reading metadata: {}", file.display()))?
        .len();

    let pb = make_progress_bar(size, "encrypt");
    pb.set_message(file.display().to_string());
    let mut sink = ProgressSink {
        inner: StoreSink::new(&store),
        pb: pb.clone(),
    };

    let mut map = encrypt_with_sink(input, Some(size), &mut sink, &codec)
        .await
        .with_context(|| format!("encrypting {}", file.display()))?;
    let stored = sink.inner.stored();

    if !no_pack {
        map = pack(map, &store, &codec)
            .await
            .context("packing data map")?;
    }
    pb.finish_with_message("done".to_string());

    match out {
        Some(path) => {
            let bytes = map.to_bytes().context("serializing data map")?;
            tokio::fs::write(path, bytes)
                .await
                .with_context(|| format!("writing data map: {}", path.display()))?;
            println!("Encrypted {}:", file.display());
            println!("  bytes:   {}", fmt_bytes(size));
            println!("  chunks:  {stored}");
            println!(
                "  map:     {} ({})",
                path.display(),
                if map.is_packed() { "packed" } else { "raw" }
            );
        }
        None => println!("{}", map.to_hex().context("encoding data map")?),
    }
    Ok(())
}

// ── `selfenc decrypt` ─────────────────────────────────────────────────────────

async fn cmd_decrypt(config: &SelfEncConfig, map_arg: &str, out: &Path) -> Result<()> {
    let map = read_map(map_arg).await?;
    let store = open_store(config)?;
    let codec = config.codec();

    let pb = make_spinner("decrypt");
    pb.set_message(out.display().to_string());

    let mut file = tokio::fs::File::create(out)
        .await
        .with_context(|| format!("creating {}", out.display()))?;
    let result = decrypt_to_writer(&map, &store, &mut file, &codec).await;
    drop(file);

    let written = match result {
        Ok(n) => n,
        Err(e) => {
            pb.abandon_with_message("failed".to_string());
            // Never leave a partial plaintext behind
            let _ = tokio::fs::remove_file(out).await;
            return Err(e).with_context(|| format!("decrypting into {}", out.display()));
        }
    };

    pb.finish_with_message("done".to_string());
    println!("Decrypted:");
    println!("  local:  {}", out.display());
    println!("  bytes:  {}", fmt_bytes(written));
    Ok(())
}

// ── `selfenc inspect` ─────────────────────────────────────────────────────────

async fn cmd_inspect(config: &SelfEncConfig, map_arg: &str, resolve: bool) -> Result<()> {
    let mut map = read_map(map_arg).await?;
    if resolve && map.is_packed() {
        let store = open_store(config)?;
        map = unpack(map, &store, &config.codec())
            .await
            .context("unpacking data map")?;
    }

    println!("kind:     {}", if map.is_packed() { "packed" } else { "raw" });
    println!("size:     {}", fmt_bytes(map.original_size()));
    println!("chunks:   {}", map.chunk_count());
    println!(
        "map size: {}",
        fmt_bytes(map.serialized_size().context("serializing data map")? as u64)
    );
    if let Err(e) = map.validate() {
        println!("invalid:  {e}");
    }
    println!();
    println!("{:>6}  {:>10}  {:<16}  {:<16}", "index", "size", "pre_hash", "post_hash");
    for c in map.infos() {
        println!(
            "{:>6}  {:>10}  {:<16}  {:<16}",
            c.index,
            c.size,
            &c.pre_hash.to_hex()[..16],
            &c.post_hash.to_hex()[..16],
        );
    }
    if map.is_packed() {
        println!();
        println!("(packed map: pass --resolve to show the chunks of the data it wraps)");
    }
    Ok(())
}

// ── `selfenc health` ──────────────────────────────────────────────────────────

async fn cmd_health(config: &SelfEncConfig) -> Result<()> {
    let store = open_store(config)?;
    check_health(&store)
        .await
        .with_context(|| format!("storage backend '{}' unreachable", config.storage.backend))?;
    println!("storage: ok ({})", config.storage.backend);
    Ok(())
}

// ── `selfenc config show` ─────────────────────────────────────────────────────

fn cmd_config_show(config: &SelfEncConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!(
            "# Configuration: defaults (no file at {})",
            config_path.display()
        );
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
