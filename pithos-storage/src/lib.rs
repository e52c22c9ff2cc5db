//! Storage engine for Pithos: a document store layered over
//! heterogeneous blob-hosting backends
//!
//! The only primitive the underlying services offer is "store a named
//! blob, fetch bytes back later". Everything else (tables of JSON
//! records, queries, indexes, caching, compression, failover) is built
//! on top, in this crate.

pub mod backend;
pub mod cache;
pub mod compression;
pub mod fabric;
pub mod index;
pub mod stego;
pub mod table;

// Re-export commonly used types
pub use backend::{
    BotChannelBackend, MemoryBackend, PhotoApiBackend, StegoBackend, StorageBackend,
    VideoHostBackend, ENCODED_SUFFIX,
};
pub use cache::{CacheConfig, DocumentCache};
pub use compression::{Compressed, CompressionConfig, Compressor};
pub use fabric::StorageFabric;
pub use index::{IndexEntry, IndexStore, TableIndex};
pub use stego::StegoCodec;
pub use table::{
    BatchOperation, BatchOutcome, Predicate, Query, SortDirection, TableStore,
};

// Re-export the shared core so consumers need one import path
pub use pithos_core::{
    BackendKind, BlobHandle, Config, PithosError, PithosResult, Record, StoredBlob,
    UploadOptions,
};
