//! Ingest ten mainnet blocks (headers plus core transaction fields)
//! straight from an RPC node into a parquet dataset under ./data.
//!
//! Run with: RPC_URL=https://mainnet.gateway.tenderly.co \
//!     cargo run --example last_blocks

use anyhow::Result;
use chainpipe_etl::{run_pipeline, Pipeline};
use chainpipe_ingest::{evm, ProviderConfig, Query};
use chainpipe_steps::{Step, StepKind};
use chainpipe_store::WriterConfig;

#[tokio::main]
async fn main() -> Result<()> {
    chainpipe_core::init_logging(false, false);

    let url = std::env::var("RPC_URL")
        .unwrap_or_else(|_| "https://mainnet.gateway.tenderly.co".to_string());

    let provider = ProviderConfig::rpc(url)
        .with_max_block_range(10)
        .with_stop_on_head(true);

    let query = evm::Query {
        from_block: 18_000_000,
        to_block: Some(18_000_010),
        include_all_blocks: true,
        fields: evm::Fields {
            block: evm::BlockFields::all(),
            transaction: evm::TransactionFields {
                hash: true,
                from: true,
                to: true,
                value: true,
                ..Default::default()
            },
            ..Default::default()
        },
        ..Default::default()
    };

    let pipeline = Pipeline {
        provider,
        query: Query::Evm(query),
        steps: vec![Step::new(StepKind::HexEncode)],
        writer: WriterConfig::parquet_dataset("data"),
    };

    let summary = run_pipeline(pipeline).await?;
    println!(
        "wrote {} chunks in {:.1}s",
        summary.chunks,
        summary.elapsed.as_secs_f64()
    );
    Ok(())
}
