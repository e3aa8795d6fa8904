//! The chunked ingestion loop: head gating, clamping, backpressure

use std::time::Duration;

use arrow::array::RecordBatch;
use chainpipe_core::{is_shutdown_requested, wait_for_shutdown};
use tokio::sync::mpsc;

use crate::chunk::BlockRange;
use crate::provider::ProviderConfig;
use crate::query::evm;
use crate::source::{Source, SourceError};

/// Ordered per-table batches. A plain vec keeps the fixed emission
/// order (blocks, transactions, logs, then step-created tables);
/// lookups are linear but the table count is tiny.
pub type Tables = Vec<(String, RecordBatch)>;

/// One chunk's worth of tables, tagged with its block range.
#[derive(Debug)]
pub struct ChunkTables {
    pub range: BlockRange,
    pub tables: Tables,
}

/// Capacity of the chunk queue between ingestion and the step pipeline.
/// Bounds memory when the sink is slower than the source.
pub const INGEST_QUEUE_DEPTH: usize = 4;

/// Sleep between head polls when tailing a caught-up chain.
const HEAD_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Ingestion tuning derived from the provider descriptor.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub max_block_range: u64,
    pub stop_on_head: bool,
}

impl From<&ProviderConfig> for IngestOptions {
    fn from(cfg: &ProviderConfig) -> Self {
        Self {
            max_block_range: cfg.effective_max_block_range(),
            stop_on_head: cfg.stop_on_head,
        }
    }
}

/// Start the ingestion loop for `query` against `source`.
///
/// Returns the receiving end of a bounded channel of per-chunk tables.
/// The producer stops on: range exhaustion, head reached (with
/// `stop_on_head`), a terminal source error (sent as the final item),
/// shutdown request, or the receiver being dropped.
pub fn ingest<S>(
    source: S,
    opts: IngestOptions,
    query: evm::Query,
) -> mpsc::Receiver<Result<ChunkTables, SourceError>>
where
    S: Source + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::channel(INGEST_QUEUE_DEPTH);
    tokio::spawn(run_ingest(source, opts, query, tx));
    rx
}

async fn run_ingest<S: Source>(
    source: S,
    opts: IngestOptions,
    query: evm::Query,
    tx: mpsc::Sender<Result<ChunkTables, SourceError>>,
) {
    if let Err(reason) = query.validate() {
        let _ = tx.send(Err(SourceError::Fatal(reason))).await;
        return;
    }

    let mut cursor = query.from_block;
    let mut head: Option<u64> = None;

    loop {
        if is_shutdown_requested() {
            log::info!("shutdown requested, stopping ingestion at block {cursor}");
            return;
        }
        if let Some(to) = query.to_block {
            if cursor >= to {
                break;
            }
        }

        // Head gating. With stop_on_head the cached frontier is
        // refreshed once when the cursor reaches it; if the chain has
        // not advanced, ingestion is done. Without it (tail mode, no
        // to_block) we wait for the chain instead.
        let head_gated = opts.stop_on_head || query.to_block.is_none();
        if head_gated {
            let mut h = match head {
                Some(h) if cursor < h => h,
                _ => match source.get_head().await {
                    Ok(h) => h,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                },
            };
            if cursor >= h {
                if opts.stop_on_head {
                    log::info!("reached head at block {h}, stopping ingestion");
                    break;
                }
                // Tail mode: wait for the chain to advance.
                while cursor >= h {
                    tokio::select! {
                        _ = tokio::time::sleep(HEAD_POLL_INTERVAL) => {}
                        _ = wait_for_shutdown() => {
                            log::info!("shutdown requested while waiting for head");
                            return;
                        }
                    }
                    h = match source.get_head().await {
                        Ok(h) => h,
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    };
                }
            }
            head = Some(h);
        }

        let mut hi = cursor.saturating_add(opts.max_block_range);
        if let Some(to) = query.to_block {
            hi = hi.min(to);
        }
        if head_gated {
            // Never fetch past the frontier observed for this chunk.
            hi = hi.min(head.unwrap_or(hi));
        }

        let range = BlockRange::new(cursor, hi);
        log::debug!("fetching chunk {range}");
        match source.fetch(range, &query).await {
            Ok(tables) => {
                if tx.send(Ok(ChunkTables { range, tables })).await.is_err() {
                    // Receiver gone: the run ended (error or abort).
                    return;
                }
                cursor = hi;
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }

    log::debug!("ingestion complete at block {cursor}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// Source that serves empty tables and records every fetched range.
    struct MockSource {
        head: AtomicU64,
        fetched: Mutex<Vec<BlockRange>>,
        head_calls: AtomicU64,
    }

    impl MockSource {
        fn new(head: u64) -> Self {
            Self {
                head: AtomicU64::new(head),
                fetched: Mutex::new(Vec::new()),
                head_calls: AtomicU64::new(0),
            }
        }
    }

    impl Source for &'static MockSource {
        async fn get_head(&self) -> Result<u64, SourceError> {
            self.head_calls.fetch_add(1, Ordering::Relaxed);
            Ok(self.head.load(Ordering::Relaxed))
        }

        async fn fetch(
            &self,
            range: BlockRange,
            _query: &evm::Query,
        ) -> Result<Tables, SourceError> {
            self.fetched.lock().unwrap().push(range);
            Ok(Vec::new())
        }
    }

    fn log_query(from: u64, to: Option<u64>) -> evm::Query {
        evm::Query {
            from_block: from,
            to_block: to,
            fields: evm::Fields {
                log: evm::LogFields::all(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn drain(
        mut rx: mpsc::Receiver<Result<ChunkTables, SourceError>>,
    ) -> Result<Vec<BlockRange>, SourceError> {
        let mut ranges = Vec::new();
        while let Some(item) = rx.recv().await {
            ranges.push(item?.range);
        }
        Ok(ranges)
    }

    #[tokio::test]
    async fn bounded_range_chunked_in_order() {
        let source: &'static MockSource = Box::leak(Box::new(MockSource::new(1_000_000)));
        let opts = IngestOptions {
            max_block_range: 1,
            stop_on_head: false,
        };
        let ranges = drain(ingest(source, opts, log_query(100, Some(103))))
            .await
            .unwrap();
        assert_eq!(
            ranges,
            vec![
                BlockRange::new(100, 101),
                BlockRange::new(101, 102),
                BlockRange::new(102, 103),
            ]
        );
        // No head gating without stop_on_head on a bounded range.
        assert_eq!(source.head_calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn stop_on_head_clamps_and_terminates() {
        let source: &'static MockSource = Box::leak(Box::new(MockSource::new(105)));
        let opts = IngestOptions {
            max_block_range: 10,
            stop_on_head: true,
        };
        let ranges = drain(ingest(source, opts, log_query(100, Some(200))))
            .await
            .unwrap();
        // One clamped chunk up to the head, then termination.
        assert_eq!(ranges, vec![BlockRange::new(100, 105)]);
        let fetched = source.fetched.lock().unwrap();
        assert!(fetched.iter().all(|r| r.end <= 105));
    }

    #[tokio::test]
    async fn stop_on_head_from_beyond_head_fetches_nothing() {
        let source: &'static MockSource = Box::leak(Box::new(MockSource::new(50)));
        let opts = IngestOptions {
            max_block_range: 10,
            stop_on_head: true,
        };
        let ranges = drain(ingest(source, opts, log_query(100, Some(200))))
            .await
            .unwrap();
        assert!(ranges.is_empty());
        assert!(source.fetched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn fatal_error_terminates_stream() {
        struct FailingSource;
        impl Source for FailingSource {
            async fn get_head(&self) -> Result<u64, SourceError> {
                Ok(u64::MAX)
            }
            async fn fetch(
                &self,
                _range: BlockRange,
                _query: &evm::Query,
            ) -> Result<Tables, SourceError> {
                Err(SourceError::Fatal("range unreachable".into()))
            }
        }
        let opts = IngestOptions {
            max_block_range: 10,
            stop_on_head: false,
        };
        let mut rx = ingest(FailingSource, opts, log_query(0, Some(100)));
        let first = rx.recv().await.unwrap();
        assert!(first.is_err());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn invalid_query_reported_as_fatal() {
        let source: &'static MockSource = Box::leak(Box::new(MockSource::new(100)));
        let opts = IngestOptions {
            max_block_range: 10,
            stop_on_head: false,
        };
        let mut rx = ingest(source, opts, log_query(10, Some(5)));
        match rx.recv().await.unwrap() {
            Err(SourceError::Fatal(_)) => {}
            other => panic!("expected fatal error, got {other:?}"),
        }
    }
}
