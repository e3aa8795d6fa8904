//! Provider descriptor: kind, endpoint, and per-kind tuning

use chainpipe_core::RetryConfig;

/// Default chunk width for RPC providers. Most public endpoints cap
/// `eth_getLogs` ranges well above this, so it is a safe paging unit.
pub const DEFAULT_MAX_BLOCK_RANGE: u64 = 1000;

/// Supported provider kinds. Closed set so adding a kind forces every
/// match site to handle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// JSON-RPC endpoint (local node, Alchemy/Infura style gateway)
    Rpc,
}

/// Connection descriptor for one data source.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub url: String,
    /// Maximum blocks per chunk fetch; `None` uses the kind default.
    pub max_block_range: Option<u64>,
    /// Stop ingestion once the requested range reaches the source head.
    pub stop_on_head: bool,
    pub retry: RetryConfig,
}

impl ProviderConfig {
    pub fn rpc(url: impl Into<String>) -> Self {
        Self {
            kind: ProviderKind::Rpc,
            url: url.into(),
            max_block_range: None,
            stop_on_head: false,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_max_block_range(mut self, max: u64) -> Self {
        self.max_block_range = Some(max);
        self
    }

    pub fn with_stop_on_head(mut self, stop: bool) -> Self {
        self.stop_on_head = stop;
        self
    }

    /// Chunk width to use, falling back to the kind-specific default.
    pub fn effective_max_block_range(&self) -> u64 {
        self.max_block_range.unwrap_or(match self.kind {
            ProviderKind::Rpc => DEFAULT_MAX_BLOCK_RANGE,
        })
    }
}
