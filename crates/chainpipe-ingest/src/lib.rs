//! Chainpipe Ingest - chunked, head-aware EVM range ingestion
//!
//! Pages a block range out of a provider in bounded chunks and emits
//! ordered Arrow record batches per logical table (blocks, transactions,
//! logs), shaped by a field projection.

pub mod chunk;
pub mod provider;
pub mod query;
pub mod rpc;
pub mod source;
pub mod stream;
pub mod tables;

// Re-exports for convenience
pub use chunk::BlockRange;
pub use provider::{ProviderConfig, ProviderKind, DEFAULT_MAX_BLOCK_RANGE};
pub use query::{evm, Query};
pub use rpc::RpcSource;
pub use source::{Source, SourceError};
pub use stream::{ingest, ChunkTables, IngestOptions, Tables, INGEST_QUEUE_DEPTH};
