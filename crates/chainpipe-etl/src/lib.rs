//! chainpipe-etl: wires a source, the step pipeline, and a sink into
//! one run.
//!
//! A [`Pipeline`] is a declarative description; [`run_pipeline`] drives
//! it to completion and returns a [`RunSummary`]. Chunks flow through a
//! bounded channel, so a slow sink backpressures ingestion instead of
//! buffering the chain in memory.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chainpipe_ingest::{
    ingest, BlockRange, IngestOptions, ProviderConfig, ProviderKind, Query, RpcSource, Source,
    SourceError,
};
use chainpipe_steps::{run_steps, Step, StepError};
use chainpipe_store::{Writer, WriterConfig, WriterError};

/// A full pipeline description: where data comes from, how it is
/// transformed, and where it lands.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub provider: ProviderConfig,
    pub query: Query,
    pub steps: Vec<Step>,
    pub writer: WriterConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("source: {0}")]
    Source(#[from] SourceError),
    #[error("chunk {chunk}: {source}")]
    Step {
        chunk: BlockRange,
        #[source]
        source: StepError,
    },
    #[error("chunk {chunk}: {source}")]
    Writer {
        chunk: BlockRange,
        #[source]
        source: WriterError,
    },
    #[error("sink: {0}")]
    Sink(#[from] WriterError),
}

/// What a finished run looked like.
#[derive(Debug)]
pub struct RunSummary {
    pub chunks: u64,
    pub rows_written: BTreeMap<String, u64>,
    /// Rows discarded by tolerant decode failures plus values nulled by
    /// tolerant cast failures.
    pub rows_dropped: u64,
    pub elapsed: Duration,
}

/// Run a pipeline against its configured provider.
pub async fn run_pipeline(pipeline: Pipeline) -> Result<RunSummary, PipelineError> {
    match pipeline.provider.kind {
        ProviderKind::Rpc => {
            let source = RpcSource::new(&pipeline.provider)?;
            run_with_source(source, pipeline).await
        }
    }
}

/// Run a pipeline against an explicit source. The entry point for
/// tests and custom sources.
pub async fn run_with_source<S>(source: S, pipeline: Pipeline) -> Result<RunSummary, PipelineError>
where
    S: Source + Send + Sync + 'static,
{
    let started = Instant::now();
    let opts = IngestOptions::from(&pipeline.provider);
    let Query::Evm(query) = pipeline.query;

    log::info!(
        "starting pipeline: blocks [{}, {}), {} steps",
        query.from_block,
        query
            .to_block
            .map(|b| b.to_string())
            .unwrap_or_else(|| "tail".to_string()),
        pipeline.steps.len(),
    );

    let mut writer = Writer::open(&pipeline.writer)?;
    let mut rx = ingest(source, opts, query);

    let mut chunks = 0u64;
    let mut rows_dropped = 0u64;

    while let Some(item) = rx.recv().await {
        let chunk = item?;
        let range = chunk.range;

        let outcome = run_steps(&pipeline.steps, chunk.tables)
            .map_err(|source| PipelineError::Step { chunk: range, source })?;
        rows_dropped += outcome.rows_dropped;

        for (table, batch) in &outcome.tables {
            writer
                .write(table, batch)
                .map_err(|source| PipelineError::Writer { chunk: range, source })?;
        }

        chunks += 1;
        log::debug!("chunk {range} done ({chunks} total)");
    }

    let rows_written = writer.finish()?;
    let elapsed = started.elapsed();

    let total: u64 = rows_written.values().sum();
    log::info!(
        "pipeline complete: {chunks} chunks, {total} rows across {} tables in {:.1}s",
        rows_written.len(),
        elapsed.as_secs_f64(),
    );
    for (table, rows) in &rows_written {
        log::info!("  {table}: {rows} rows");
    }
    if rows_dropped > 0 {
        log::warn!("{rows_dropped} rows dropped by tolerant steps");
    }

    Ok(RunSummary {
        chunks,
        rows_written,
        rows_dropped,
        elapsed,
    })
}
