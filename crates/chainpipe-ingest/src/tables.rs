//! Raw record → Arrow batch construction, shaped by the field projection
//!
//! Column order is fixed per table; a field that is not selected is
//! absent from the batch, never fabricated.

use std::sync::Arc;

use alloy::consensus::Transaction as _;
use alloy::primitives::U256;
use alloy::rpc::types::{Block, Log};
use arrow::array::{
    ArrayRef, BinaryArray, Decimal128Array, Decimal256Array, RecordBatch, TimestampSecondArray,
    UInt64Array,
};
use arrow::datatypes::{i256, Field, Schema};
use arrow::error::ArrowError;

use crate::query::evm;

/// Precision/scale for 256-bit chain quantities.
pub const DECIMAL256_WIDTH: (u8, i8) = (76, 0);
/// Precision/scale for 128-bit chain quantities (gas prices).
pub const DECIMAL128_WIDTH: (u8, i8) = (38, 0);

/// Convert an unsigned 256-bit word to Arrow's signed `i256`.
/// Values with the top bit set do not fit and become null.
fn u256_to_i256(v: U256) -> Option<i256> {
    let bytes = v.to_be_bytes::<32>();
    if bytes[0] & 0x80 != 0 {
        return None;
    }
    Some(i256::from_be_bytes(bytes))
}

fn build_batch(cols: Vec<(&'static str, ArrayRef, bool)>) -> Result<RecordBatch, ArrowError> {
    let fields: Vec<Field> = cols
        .iter()
        .map(|(name, array, nullable)| Field::new(*name, array.data_type().clone(), *nullable))
        .collect();
    let arrays: Vec<ArrayRef> = cols.into_iter().map(|(_, array, _)| array).collect();
    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
}

/// Build the `blocks` batch for one chunk.
pub fn blocks_to_batch(
    blocks: &[Block],
    fields: &evm::BlockFields,
) -> Result<RecordBatch, ArrowError> {
    let mut cols: Vec<(&'static str, ArrayRef, bool)> = Vec::new();

    if fields.number {
        let array = UInt64Array::from_iter_values(blocks.iter().map(|b| b.header.inner.number));
        cols.push(("number", Arc::new(array), false));
    }
    if fields.hash {
        let array = BinaryArray::from_iter_values(blocks.iter().map(|b| b.header.hash));
        cols.push(("hash", Arc::new(array), false));
    }
    if fields.parent_hash {
        let array =
            BinaryArray::from_iter_values(blocks.iter().map(|b| b.header.inner.parent_hash));
        cols.push(("parent_hash", Arc::new(array), false));
    }
    if fields.timestamp {
        let array = TimestampSecondArray::from_iter_values(
            blocks.iter().map(|b| b.header.inner.timestamp as i64),
        );
        cols.push(("timestamp", Arc::new(array), false));
    }
    if fields.miner {
        let array =
            BinaryArray::from_iter_values(blocks.iter().map(|b| b.header.inner.beneficiary));
        cols.push(("miner", Arc::new(array), false));
    }
    if fields.gas_limit {
        let array = UInt64Array::from_iter_values(blocks.iter().map(|b| b.header.inner.gas_limit));
        cols.push(("gas_limit", Arc::new(array), false));
    }
    if fields.gas_used {
        let array = UInt64Array::from_iter_values(blocks.iter().map(|b| b.header.inner.gas_used));
        cols.push(("gas_used", Arc::new(array), false));
    }
    if fields.base_fee_per_gas {
        let array =
            UInt64Array::from_iter(blocks.iter().map(|b| b.header.inner.base_fee_per_gas));
        cols.push(("base_fee_per_gas", Arc::new(array), true));
    }
    if fields.size {
        let array = UInt64Array::from_iter(
            blocks
                .iter()
                .map(|b| b.header.size.and_then(|s| u64::try_from(s).ok())),
        );
        cols.push(("size", Arc::new(array), true));
    }

    build_batch(cols)
}

/// Build the `transactions` batch for one chunk from full blocks.
pub fn transactions_to_batch(
    blocks: &[Block],
    fields: &evm::TransactionFields,
) -> Result<RecordBatch, ArrowError> {
    let txs: Vec<_> = blocks.iter().flat_map(|b| b.transactions.txns()).collect();
    let mut cols: Vec<(&'static str, ArrayRef, bool)> = Vec::new();

    if fields.block_number {
        let array = UInt64Array::from_iter(txs.iter().map(|t| t.block_number));
        cols.push(("block_number", Arc::new(array), true));
    }
    if fields.transaction_index {
        let array = UInt64Array::from_iter(txs.iter().map(|t| t.transaction_index));
        cols.push(("transaction_index", Arc::new(array), true));
    }
    if fields.hash {
        let array = BinaryArray::from_iter_values(txs.iter().map(|t| *t.inner.tx_hash()));
        cols.push(("hash", Arc::new(array), false));
    }
    if fields.from {
        let array = BinaryArray::from_iter_values(txs.iter().map(|t| t.inner.signer()));
        cols.push(("from", Arc::new(array), false));
    }
    if fields.to {
        let values: Vec<Option<Vec<u8>>> = txs
            .iter()
            .map(|t| t.inner.to().map(|a| a.to_vec()))
            .collect();
        let array = BinaryArray::from_iter(values);
        cols.push(("to", Arc::new(array), true));
    }
    if fields.value {
        let array =
            Decimal256Array::from_iter(txs.iter().map(|t| u256_to_i256(t.inner.value())))
                .with_precision_and_scale(DECIMAL256_WIDTH.0, DECIMAL256_WIDTH.1)?;
        cols.push(("value", Arc::new(array), true));
    }
    if fields.nonce {
        let array = UInt64Array::from_iter_values(txs.iter().map(|t| t.inner.nonce()));
        cols.push(("nonce", Arc::new(array), false));
    }
    if fields.gas_limit {
        let array = UInt64Array::from_iter_values(txs.iter().map(|t| t.inner.gas_limit()));
        cols.push(("gas_limit", Arc::new(array), false));
    }
    if fields.gas_price {
        let array = Decimal128Array::from_iter(
            txs.iter()
                .map(|t| t.inner.gas_price().and_then(|p| i128::try_from(p).ok())),
        )
        .with_precision_and_scale(DECIMAL128_WIDTH.0, DECIMAL128_WIDTH.1)?;
        cols.push(("gas_price", Arc::new(array), true));
    }
    if fields.input {
        let array = BinaryArray::from_iter_values(txs.iter().map(|t| t.inner.input().as_ref()));
        cols.push(("input", Arc::new(array), false));
    }

    build_batch(cols)
}

/// Build the `logs` batch for one chunk.
pub fn logs_to_batch(logs: &[Log], fields: &evm::LogFields) -> Result<RecordBatch, ArrowError> {
    let mut cols: Vec<(&'static str, ArrayRef, bool)> = Vec::new();

    if fields.block_number {
        let array = UInt64Array::from_iter(logs.iter().map(|l| l.block_number));
        cols.push(("block_number", Arc::new(array), true));
    }
    if fields.transaction_hash {
        let values: Vec<Option<Vec<u8>>> = logs
            .iter()
            .map(|l| l.transaction_hash.map(|h| h.to_vec()))
            .collect();
        cols.push(("transaction_hash", Arc::new(BinaryArray::from_iter(values)), true));
    }
    if fields.transaction_index {
        let array = UInt64Array::from_iter(logs.iter().map(|l| l.transaction_index));
        cols.push(("transaction_index", Arc::new(array), true));
    }
    if fields.log_index {
        let array = UInt64Array::from_iter(logs.iter().map(|l| l.log_index));
        cols.push(("log_index", Arc::new(array), true));
    }
    if fields.address {
        let array = BinaryArray::from_iter_values(logs.iter().map(|l| l.inner.address));
        cols.push(("address", Arc::new(array), false));
    }
    for (slot, (name, selected)) in [
        ("topic0", fields.topic0),
        ("topic1", fields.topic1),
        ("topic2", fields.topic2),
        ("topic3", fields.topic3),
    ]
    .into_iter()
    .enumerate()
    {
        if !selected {
            continue;
        }
        let values: Vec<Option<Vec<u8>>> = logs
            .iter()
            .map(|l| l.inner.data.topics().get(slot).map(|t| t.to_vec()))
            .collect();
        cols.push((name, Arc::new(BinaryArray::from_iter(values)), true));
    }
    if fields.data {
        let array = BinaryArray::from_iter_values(logs.iter().map(|l| l.inner.data.data.as_ref()));
        cols.push(("data", Arc::new(array), false));
    }

    build_batch(cols)
}
