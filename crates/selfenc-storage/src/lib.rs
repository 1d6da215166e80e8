//! selfenc-storage: the chunk store capability consumed by the codec
//!
//! - `store`: the `ChunkStore` trait (put/get/delete by content address)
//! - `memory`: `MemoryStore`, a process-local store for tests and tools
//! - `operator`: `OperatorStore` over any OpenDAL backend (fs, memory, S3)

pub mod health;
pub mod memory;
pub mod operator;
pub mod store;

pub use health::{check_health, is_healthy};
pub use memory::MemoryStore;
pub use operator::{build_operator, OperatorStore, S3Credentials};
pub use selfenc_core::StoreError;
pub use store::ChunkStore;
