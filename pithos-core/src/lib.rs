//! Core utilities and types shared across all Pithos crates

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{BotChannelConfig, Config, PhotoHostConfig, Tuning, VideoHostConfig};
pub use error::{PithosError, PithosResult};
pub use types::{
    BackendKind, BlobHandle, Record, StoredBlob, UploadOptions, MANAGED_FIELDS,
};

/// Version information for the Pithos project
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
