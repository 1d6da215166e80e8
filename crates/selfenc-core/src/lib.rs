pub mod config;
pub mod error;

pub use config::{CodecConfig, SelfEncConfig};
pub use error::{SelfEncError, SelfEncResult, StoreError};
