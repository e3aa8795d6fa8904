//! Ingest and decode ERC-20 Transfer events from an RPC node into a
//! parquet dataset under ./data/transfers.
//!
//! Run with: RPC_URL=https://mainnet.gateway.tenderly.co \
//!     cargo run --example erc20_transfers

use alloy::json_abi::Event;
use anyhow::{Context, Result};
use arrow::datatypes::DataType;
use chainpipe_etl::{run_pipeline, Pipeline};
use chainpipe_ingest::{evm, ProviderConfig, Query};
use chainpipe_steps::{CastByTypeConfig, EvmDecodeEventsConfig, Step, StepKind};
use chainpipe_store::WriterConfig;

const TRANSFER_SIGNATURE: &str =
    "Transfer(address indexed from, address indexed to, uint256 amount)";

#[tokio::main]
async fn main() -> Result<()> {
    chainpipe_core::init_logging(false, false);

    let url = std::env::var("RPC_URL")
        .unwrap_or_else(|_| "https://mainnet.gateway.tenderly.co".to_string());

    let topic0 = Event::parse(TRANSFER_SIGNATURE)
        .context("invalid transfer signature")?
        .selector();

    let provider = ProviderConfig::rpc(url)
        .with_max_block_range(2000)
        .with_stop_on_head(true);

    let query = evm::Query {
        from_block: 22_000_000,
        to_block: Some(22_001_000),
        logs: vec![evm::LogRequest::topic0(vec![topic0])],
        fields: evm::Fields {
            log: evm::LogFields::all(),
            ..Default::default()
        },
        ..Default::default()
    };

    let steps = vec![
        Step::new(StepKind::EvmDecodeEvents(EvmDecodeEventsConfig {
            event_signature: TRANSFER_SIGNATURE.to_string(),
            output_table: "transfers".to_string(),
            allow_decode_fail: true,
        })),
        // uint256 amounts land as decimal256; narrow them so downstream
        // engines without decimal256 support can read the dataset
        Step::new(StepKind::CastByType(CastByTypeConfig {
            from_type: DataType::Decimal256(76, 0),
            to_type: DataType::Decimal128(38, 0),
            allow_cast_fail: true,
        })),
        Step::new(StepKind::HexEncode),
    ];

    let pipeline = Pipeline {
        provider,
        query: Query::Evm(query),
        steps,
        writer: WriterConfig::parquet_dataset("data"),
    };

    let summary = run_pipeline(pipeline).await?;
    println!(
        "decoded {} transfer rows in {:.1}s",
        summary
            .rows_written
            .get("transfers")
            .copied()
            .unwrap_or_default(),
        summary.elapsed.as_secs_f64()
    );
    Ok(())
}
