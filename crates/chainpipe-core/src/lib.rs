//! Chainpipe Core - Common infrastructure for blockchain data pipelines
//!
//! This crate provides the pieces shared by every pipeline stage:
//! retry with backoff, logging setup, and cooperative shutdown.

pub mod logging;
pub mod retry;
pub mod shutdown;

// Re-exports for convenience
pub use logging::init_logging;
pub use retry::{Retryable, RetryConfig, with_retry};
pub use shutdown::{is_shutdown_requested, request_shutdown, wait_for_shutdown};
