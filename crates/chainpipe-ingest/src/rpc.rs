//! JSON-RPC source over an alloy HTTP provider

use alloy::network::Ethereum;
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::{Block, BlockId, Filter, Log};
use chainpipe_core::{with_retry, RetryConfig};
use futures_util::future::try_join_all;

use crate::chunk::BlockRange;
use crate::provider::ProviderConfig;
use crate::query::evm;
use crate::source::{Source, SourceError};
use crate::stream::Tables;
use crate::tables;

/// A `Source` backed by an EVM JSON-RPC endpoint.
pub struct RpcSource {
    provider: RootProvider<Ethereum>,
    retry: RetryConfig,
}

impl RpcSource {
    pub fn new(cfg: &ProviderConfig) -> Result<Self, SourceError> {
        let url = cfg
            .url
            .parse()
            .map_err(|e| SourceError::Fatal(format!("invalid provider url '{}': {e}", cfg.url)))?;
        Ok(Self {
            provider: RootProvider::new_http(url),
            retry: cfg.retry.clone(),
        })
    }

    /// Fetch the given blocks, with or without full transactions.
    async fn fetch_blocks(&self, numbers: Vec<u64>, full: bool) -> Result<Vec<Block>, SourceError> {
        try_join_all(numbers.into_iter().map(|number| async move {
            let op = format!("eth_getBlockByNumber({number})");
            with_retry(&self.retry, &op, || async {
                let builder = self.provider.get_block(BlockId::from(number));
                let block = if full {
                    builder.full().await
                } else {
                    builder.await
                }
                .map_err(SourceError::from_transport)?;
                // A block inside the requested range that the node does
                // not have yet is worth retrying (lagging replica).
                block.ok_or_else(|| {
                    SourceError::Transient(format!("block {number} not yet available"))
                })
            })
            .await
        }))
        .await
    }

    /// Fetch logs for the range: one call per log request, or a single
    /// unfiltered call when the query has none. Results are merged in
    /// (block, log index) order.
    async fn fetch_logs(
        &self,
        range: BlockRange,
        requests: &[evm::LogRequest],
    ) -> Result<Vec<Log>, SourceError> {
        let filters: Vec<Filter> = if requests.is_empty() {
            vec![range_filter(range)]
        } else {
            requests
                .iter()
                .map(|req| {
                    let mut filter = range_filter(range);
                    if !req.address.is_empty() {
                        filter = filter.address(req.address.clone());
                    }
                    for (slot, alternatives) in req.topics.iter().enumerate() {
                        if !alternatives.is_empty() {
                            filter.topics[slot] = alternatives.clone().into();
                        }
                    }
                    filter
                })
                .collect()
        };

        let results = try_join_all(filters.iter().map(|filter| async move {
            with_retry(&self.retry, "eth_getLogs", || async {
                self.provider
                    .get_logs(filter)
                    .await
                    .map_err(SourceError::from_transport)
            })
            .await
        }))
        .await?;

        Ok(merge_logs(results))
    }
}

/// Merge per-filter log results into one (block, log index) ordered vec.
/// Overlapping filters can match the same log twice, so mined duplicates
/// are dropped. Pending logs have no position and are never merged.
fn merge_logs(results: Vec<Vec<Log>>) -> Vec<Log> {
    let mut logs: Vec<Log> = results.into_iter().flatten().collect();
    logs.sort_by_key(|l| (l.block_number, l.log_index));
    logs.dedup_by(|a, b| {
        a.block_number.is_some()
            && a.log_index.is_some()
            && a.block_number == b.block_number
            && a.log_index == b.log_index
    });
    logs
}

fn range_filter(range: BlockRange) -> Filter {
    // Filter bounds are inclusive; the range is half-open.
    Filter::new()
        .from_block(range.start)
        .to_block(range.end - 1)
}

impl Source for RpcSource {
    async fn get_head(&self) -> Result<u64, SourceError> {
        with_retry(&self.retry, "eth_blockNumber", || async {
            self.provider
                .get_block_number()
                .await
                .map_err(SourceError::from_transport)
        })
        .await
    }

    async fn fetch(&self, range: BlockRange, query: &evm::Query) -> Result<Tables, SourceError> {
        let fields = &query.fields;
        let want_blocks = fields.block.any();
        let want_txs = fields.transaction.any();
        let want_logs = fields.log.any();

        // Log filters restrict the block tables to matching blocks
        // unless the query opts every block in.
        let restrict_to_matches = !query.logs.is_empty() && !query.include_all_blocks;

        let logs = if want_logs || ((want_blocks || want_txs) && restrict_to_matches) {
            self.fetch_logs(range, &query.logs).await?
        } else {
            Vec::new()
        };

        let mut out: Tables = Vec::new();

        if want_blocks || want_txs {
            let numbers: Vec<u64> = if restrict_to_matches {
                let mut numbers: Vec<u64> = logs.iter().filter_map(|l| l.block_number).collect();
                // fetch_logs returns logs in block order
                numbers.dedup();
                numbers
            } else {
                (range.start..range.end).collect()
            };
            let blocks = self.fetch_blocks(numbers, want_txs).await?;
            if want_blocks {
                let batch = tables::blocks_to_batch(&blocks, &fields.block)
                    .map_err(|e| SourceError::Fatal(format!("blocks batch: {e}")))?;
                if batch.num_rows() > 0 {
                    out.push(("blocks".to_string(), batch));
                }
            }
            if want_txs {
                let batch = tables::transactions_to_batch(&blocks, &fields.transaction)
                    .map_err(|e| SourceError::Fatal(format!("transactions batch: {e}")))?;
                if batch.num_rows() > 0 {
                    out.push(("transactions".to_string(), batch));
                }
            }
        }

        if want_logs {
            let batch = tables::logs_to_batch(&logs, &fields.log)
                .map_err(|e| SourceError::Fatal(format!("logs batch: {e}")))?;
            if batch.num_rows() > 0 {
                out.push(("logs".to_string(), batch));
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, Bytes, B256};

    fn rpc_log(position: Option<(u64, u64)>, marker: u8) -> Log {
        Log {
            inner: alloy::primitives::Log::new_unchecked(
                Address::repeat_byte(marker),
                vec![B256::repeat_byte(marker)],
                Bytes::new(),
            ),
            block_hash: None,
            block_number: position.map(|(block, _)| block),
            block_timestamp: None,
            transaction_hash: Some(B256::repeat_byte(0x11)),
            transaction_index: Some(0),
            log_index: position.map(|(_, index)| index),
            removed: false,
        }
    }

    #[test]
    fn merge_orders_and_drops_duplicates() {
        let merged = merge_logs(vec![
            vec![rpc_log(Some((7, 1)), 1), rpc_log(Some((5, 0)), 2)],
            vec![rpc_log(Some((7, 1)), 1)],
        ]);
        let positions: Vec<_> = merged
            .iter()
            .map(|l| (l.block_number.unwrap(), l.log_index.unwrap()))
            .collect();
        assert_eq!(positions, vec![(5, 0), (7, 1)]);
    }

    #[test]
    fn merge_keeps_distinct_pending_logs() {
        // Pending logs carry no position; they must not collapse into
        // each other.
        let merged = merge_logs(vec![vec![rpc_log(None, 1)], vec![rpc_log(None, 2)]]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].address(), Address::repeat_byte(1));
        assert_eq!(merged[1].address(), Address::repeat_byte(2));
    }
}
