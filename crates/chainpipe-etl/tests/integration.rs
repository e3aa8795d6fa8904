//! End-to-end pipeline runs against a deterministic in-memory source.

use std::sync::Arc;

use alloy::json_abi::Event;
use alloy::primitives::{Address, B256, U256};
use arrow::array::{BinaryArray, RecordBatch, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use chainpipe_etl::{run_with_source, Pipeline, PipelineError, RunSummary};
use chainpipe_ingest::{evm, BlockRange, ProviderConfig, Query, Source, SourceError, Tables};
use chainpipe_steps::{CastByTypeConfig, EvmDecodeEventsConfig, Step, StepKind};
use chainpipe_store::WriterConfig;
use duckdb::Connection;
use tempfile::TempDir;

const TRANSFER: &str = "Transfer(address indexed from, address indexed to, uint256 amount)";

/// Serves one block and one Transfer log per block in the range.
struct SyntheticSource {
    head: u64,
    /// Transfer amount per block; oversized values exercise cast failure.
    amount: U256,
}

impl SyntheticSource {
    fn new(head: u64) -> Self {
        Self {
            head,
            amount: U256::from(1000u64),
        }
    }

    fn with_amount(head: u64, amount: U256) -> Self {
        Self { head, amount }
    }
}

impl Source for SyntheticSource {
    async fn get_head(&self) -> Result<u64, SourceError> {
        Ok(self.head)
    }

    async fn fetch(&self, range: BlockRange, _query: &evm::Query) -> Result<Tables, SourceError> {
        let numbers: Vec<u64> = (range.start..range.end).collect();
        let selector = Event::parse(TRANSFER).unwrap().selector();

        let blocks_schema = Schema::new(vec![Field::new("number", DataType::UInt64, false)]);
        let blocks = RecordBatch::try_new(
            Arc::new(blocks_schema),
            vec![Arc::new(UInt64Array::from_iter_values(
                numbers.iter().copied(),
            ))],
        )
        .unwrap();

        let topic = |value: B256| -> BinaryArray {
            BinaryArray::from_iter_values(numbers.iter().map(|_| value.to_vec()))
        };
        let logs_schema = Schema::new(vec![
            Field::new("block_number", DataType::UInt64, false),
            Field::new("log_index", DataType::UInt64, false),
            Field::new("address", DataType::Binary, false),
            Field::new("topic0", DataType::Binary, true),
            Field::new("topic1", DataType::Binary, true),
            Field::new("topic2", DataType::Binary, true),
            Field::new("data", DataType::Binary, false),
        ]);
        let logs = RecordBatch::try_new(
            Arc::new(logs_schema),
            vec![
                Arc::new(UInt64Array::from_iter_values(numbers.iter().copied())),
                Arc::new(UInt64Array::from_iter_values(numbers.iter().map(|_| 0))),
                Arc::new(BinaryArray::from_iter_values(
                    numbers.iter().map(|_| Address::repeat_byte(0xaa).to_vec()),
                )),
                Arc::new(topic(selector)),
                Arc::new(topic(B256::left_padding_from(
                    Address::repeat_byte(0x11).as_slice(),
                ))),
                Arc::new(topic(B256::left_padding_from(
                    Address::repeat_byte(0x22).as_slice(),
                ))),
                Arc::new(BinaryArray::from_iter_values(
                    numbers.iter().map(|_| self.amount.to_be_bytes::<32>()),
                )),
            ],
        )
        .unwrap();

        Ok(vec![
            ("blocks".to_string(), blocks),
            ("logs".to_string(), logs),
        ])
    }
}

fn transfer_steps(allow_cast_fail: bool) -> Vec<Step> {
    vec![
        Step::new(StepKind::EvmDecodeEvents(EvmDecodeEventsConfig {
            event_signature: TRANSFER.to_string(),
            output_table: "transfers".to_string(),
            allow_decode_fail: false,
        })),
        Step::new(StepKind::CastByType(CastByTypeConfig {
            from_type: DataType::Decimal256(76, 0),
            to_type: DataType::Decimal128(38, 0),
            allow_cast_fail,
        })),
        Step::new(StepKind::HexEncode),
    ]
}

fn pipeline(writer: WriterConfig, steps: Vec<Step>) -> Pipeline {
    let provider = ProviderConfig::rpc("http://unused.invalid")
        .with_max_block_range(1)
        .with_stop_on_head(true);
    Pipeline {
        provider,
        query: Query::Evm(evm::Query {
            from_block: 100,
            to_block: Some(103),
            fields: evm::Fields {
                block: evm::BlockFields::all(),
                log: evm::LogFields::all(),
                ..Default::default()
            },
            ..Default::default()
        }),
        steps,
        writer,
    }
}

fn assert_full_run(summary: &RunSummary) {
    assert_eq!(summary.chunks, 3);
    assert_eq!(summary.rows_written.get("blocks"), Some(&3));
    assert_eq!(summary.rows_written.get("logs"), Some(&3));
    assert_eq!(summary.rows_written.get("transfers"), Some(&3));
    assert_eq!(summary.rows_dropped, 0);
}

#[tokio::test]
async fn parquet_dataset_end_to_end() {
    let dir = TempDir::new().unwrap();
    let summary = run_with_source(
        SyntheticSource::new(105),
        pipeline(
            WriterConfig::parquet_dataset(dir.path()),
            transfer_steps(true),
        ),
    )
    .await
    .unwrap();
    assert_full_run(&summary);

    // One file per chunk per table.
    for table in ["blocks", "logs", "transfers"] {
        for seq in 0..3 {
            let path = dir
                .path()
                .join(table)
                .join(format!("{table}_{seq:04}.parquet"));
            assert!(
                chainpipe_store::is_valid_parquet(&path),
                "missing {}",
                path.display()
            );
        }
    }

    // Decoded amounts survive cast and hex paths untouched.
    let conn = Connection::open_in_memory().unwrap();
    let glob = format!("{}/transfers/*.parquet", dir.path().display());
    let (rows, max_amount): (i64, i64) = conn
        .query_row(
            &format!("SELECT count(*), max(amount)::BIGINT FROM read_parquet('{glob}')"),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(rows, 3);
    assert_eq!(max_amount, 1000);
}

#[tokio::test]
async fn duckdb_sink_end_to_end() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("out.duckdb");
    let summary = run_with_source(
        SyntheticSource::new(105),
        pipeline(WriterConfig::duckdb(&db), transfer_steps(true)),
    )
    .await
    .unwrap();
    assert_full_run(&summary);

    let conn = Connection::open(&db).unwrap();
    let transfers: i64 = conn
        .query_row("SELECT count(*) FROM transfers", [], |row| row.get(0))
        .unwrap();
    assert_eq!(transfers, 3);
    let from: String = conn
        .query_row("SELECT \"from\" FROM transfers LIMIT 1", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(from, format!("0x{}", "11".repeat(20)));
}

#[tokio::test]
async fn strict_cast_overflow_fails_the_run() {
    let dir = TempDir::new().unwrap();
    // 2^130 does not fit decimal128(38, 0)
    let amount = U256::from(1u8) << 130;
    let err = run_with_source(
        SyntheticSource::with_amount(105, amount),
        pipeline(
            WriterConfig::parquet_dataset(dir.path()),
            transfer_steps(false),
        ),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, PipelineError::Step { .. }));
}

#[tokio::test]
async fn tolerant_cast_overflow_nulls_and_continues() {
    let dir = TempDir::new().unwrap();
    let amount = U256::from(1u8) << 130;
    let summary = run_with_source(
        SyntheticSource::with_amount(105, amount),
        pipeline(
            WriterConfig::parquet_dataset(dir.path()),
            transfer_steps(true),
        ),
    )
    .await
    .unwrap();
    // Rows are kept with a null amount, and the nulled values are counted.
    assert_eq!(summary.rows_written.get("transfers"), Some(&3));
    assert_eq!(summary.rows_dropped, 3);

    let conn = Connection::open_in_memory().unwrap();
    let glob = format!("{}/transfers/*.parquet", dir.path().display());
    let nulls: i64 = conn
        .query_row(
            &format!("SELECT count(*) FROM read_parquet('{glob}') WHERE amount IS NULL"),
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(nulls, 3);
}
