//! Source abstraction: head query + chunk fetch with error classification

use std::future::Future;

use chainpipe_core::Retryable;

use crate::chunk::BlockRange;
use crate::query::evm;
use crate::stream::Tables;

/// Error from a data source, split into the two classes the engine
/// cares about: retry transparently, or abort the run.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("transient source error: {0}")]
    Transient(String),
    #[error("fatal source error: {0}")]
    Fatal(String),
}

impl Retryable for SourceError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl SourceError {
    /// Classify a transport-level error by message. Rate limits, timeouts
    /// and connection drops are transient; everything else (bad auth,
    /// malformed request, unknown method) aborts the run.
    pub fn from_transport(e: impl std::fmt::Display) -> Self {
        let msg = e.to_string();
        if is_transient_message(&msg) {
            Self::Transient(msg)
        } else {
            Self::Fatal(msg)
        }
    }
}

fn is_transient_message(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    msg.contains("connection")
        || msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("reset")
        || msg.contains("broken pipe")
        || msg.contains("eof")
        || msg.contains("sending request")
        || msg.contains("rate limit")
        || msg.contains("too many requests")
        || msg.contains("429")
        || msg.contains("502")
        || msg.contains("503")
        || msg.contains("504")
        || msg.contains("internal server error")
        || msg.contains("service unavailable")
        || msg.contains("bad gateway")
        || msg.contains("temporarily")
        || msg.contains("try again")
        || msg.contains("not yet available")
}

/// A blockchain data source: reports its current frontier and fetches
/// one chunk of raw records shaped by the query's field projection.
///
/// Implementations retry transient failures internally; an error
/// returned here is terminal for the ingestion run.
pub trait Source {
    fn get_head(&self) -> impl Future<Output = Result<u64, SourceError>> + Send;

    fn fetch(
        &self,
        range: BlockRange,
        query: &evm::Query,
    ) -> impl Future<Output = Result<Tables, SourceError>> + Send;
}
