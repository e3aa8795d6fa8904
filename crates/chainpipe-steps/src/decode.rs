//! ABI event decoding: logs table → per-parameter columns

use std::sync::Arc;

use alloy::dyn_abi::{DynSolType, DynSolValue, EventExt};
use alloy::json_abi::Event;
use alloy::primitives::{B256, U256};
use arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Decimal256Array, RecordBatch, StringArray,
    UInt32Array,
};
use arrow::datatypes::{i256, Field, Schema};

use crate::{find_table, upsert_table, StepError, Tables};

/// Decode rows of the `logs` table matching an event signature's
/// selector into a new table of parameter columns.
#[derive(Debug, Clone)]
pub struct EvmDecodeEventsConfig {
    /// Human-readable signature, e.g.
    /// `Transfer(address indexed from, address indexed to, uint256 amount)`.
    pub event_signature: String,
    pub output_table: String,
    /// Tolerant mode: a row matching the selector but failing structural
    /// decode is dropped. Intolerant mode fails the run.
    pub allow_decode_fail: bool,
}

const SOURCE_TABLE: &str = "logs";

/// Log identity columns carried into the output when present.
const CARRY_COLUMNS: [&str; 4] = ["block_number", "transaction_hash", "log_index", "address"];

const TOPIC_COLUMNS: [&str; 4] = ["topic0", "topic1", "topic2", "topic3"];

/// Column shapes a decoded parameter can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColKind {
    Binary,
    Text,
    Bool,
    Dec256,
}

fn col_kind(ty: &DynSolType, indexed: bool) -> Option<ColKind> {
    match ty {
        DynSolType::Address | DynSolType::FixedBytes(_) => Some(ColKind::Binary),
        DynSolType::Bool => Some(ColKind::Bool),
        DynSolType::Uint(_) | DynSolType::Int(_) => Some(ColKind::Dec256),
        // Indexed dynamic parameters only carry their keccak hash.
        DynSolType::Bytes | DynSolType::String if indexed => Some(ColKind::Binary),
        DynSolType::Bytes => Some(ColKind::Binary),
        DynSolType::String => Some(ColKind::Text),
        _ => None,
    }
}

/// Per-parameter value buffer with typed push and rollback.
enum ColValues {
    Binary(Vec<Option<Vec<u8>>>),
    Text(Vec<Option<String>>),
    Bool(Vec<Option<bool>>),
    Dec256(Vec<Option<i256>>),
}

impl ColValues {
    fn new(kind: ColKind) -> Self {
        match kind {
            ColKind::Binary => Self::Binary(Vec::new()),
            ColKind::Text => Self::Text(Vec::new()),
            ColKind::Bool => Self::Bool(Vec::new()),
            ColKind::Dec256 => Self::Dec256(Vec::new()),
        }
    }

    fn push(&mut self, value: &DynSolValue) -> Result<(), String> {
        match (self, value) {
            (Self::Binary(v), DynSolValue::Address(a)) => v.push(Some(a.to_vec())),
            (Self::Binary(v), DynSolValue::FixedBytes(word, size)) => {
                v.push(Some(word[..*size].to_vec()))
            }
            (Self::Binary(v), DynSolValue::Bytes(b)) => v.push(Some(b.clone())),
            (Self::Text(v), DynSolValue::String(s)) => v.push(Some(s.clone())),
            (Self::Bool(v), DynSolValue::Bool(b)) => v.push(Some(*b)),
            (Self::Dec256(v), DynSolValue::Uint(u, _)) => {
                let value =
                    u256_to_i256(*u).ok_or_else(|| "uint out of decimal256 range".to_string())?;
                v.push(Some(value));
            }
            (Self::Dec256(v), DynSolValue::Int(i, _)) => {
                v.push(Some(i256::from_be_bytes(i.to_be_bytes::<32>())))
            }
            _ => return Err("decoded value does not match parameter type".to_string()),
        }
        Ok(())
    }

    fn truncate(&mut self, len: usize) {
        match self {
            Self::Binary(v) => v.truncate(len),
            Self::Text(v) => v.truncate(len),
            Self::Bool(v) => v.truncate(len),
            Self::Dec256(v) => v.truncate(len),
        }
    }

    fn finish(self) -> Result<ArrayRef, arrow::error::ArrowError> {
        Ok(match self {
            Self::Binary(v) => Arc::new(BinaryArray::from_iter(v)),
            Self::Text(v) => Arc::new(StringArray::from_iter(v)),
            Self::Bool(v) => Arc::new(BooleanArray::from_iter(v)),
            Self::Dec256(v) => {
                Arc::new(Decimal256Array::from_iter(v).with_precision_and_scale(76, 0)?)
            }
        })
    }
}

fn binary_col<'a>(logs: &'a RecordBatch, name: &str) -> Option<&'a BinaryArray> {
    logs.column_by_name(name)?.as_any().downcast_ref()
}

fn u256_to_i256(v: U256) -> Option<i256> {
    let bytes = v.to_be_bytes::<32>();
    if bytes[0] & 0x80 != 0 {
        return None;
    }
    Some(i256::from_be_bytes(bytes))
}

/// Run one decode step over the table map. Returns the number of rows
/// dropped under the tolerant failure mode.
pub(crate) fn decode_events(
    step: &str,
    cfg: &EvmDecodeEventsConfig,
    tables: &mut Tables,
) -> Result<u64, StepError> {
    let event = Event::parse(&cfg.event_signature).map_err(|e| StepError::Signature {
        step: step.to_string(),
        signature: cfg.event_signature.clone(),
        reason: e.to_string(),
    })?;

    let mut kinds = Vec::with_capacity(event.inputs.len());
    for input in &event.inputs {
        let ty = DynSolType::parse(&input.ty).map_err(|e| StepError::Signature {
            step: step.to_string(),
            signature: cfg.event_signature.clone(),
            reason: e.to_string(),
        })?;
        let kind = col_kind(&ty, input.indexed).ok_or_else(|| StepError::UnsupportedType {
            step: step.to_string(),
            param: input.name.clone(),
            ty: input.ty.clone(),
        })?;
        kinds.push(kind);
    }

    let Some(logs) = find_table(tables, SOURCE_TABLE) else {
        // Nothing to decode in this chunk.
        return Ok(0);
    };

    let (batch, dropped) = decode_batch(step, cfg, &event, &kinds, logs)?;
    if dropped > 0 {
        log::debug!(
            "step '{step}': dropped {dropped} rows failing decode of '{}'",
            cfg.event_signature
        );
    }
    upsert_table(tables, &cfg.output_table, batch);
    Ok(dropped)
}

fn decode_batch(
    step: &str,
    cfg: &EvmDecodeEventsConfig,
    event: &Event,
    kinds: &[ColKind],
    logs: &RecordBatch,
) -> Result<(RecordBatch, u64), StepError> {
    let selector = event.selector();

    let missing = |column: &str| StepError::Decode {
        step: step.to_string(),
        table: SOURCE_TABLE.to_string(),
        row: 0,
        reason: format!("logs table is missing required column '{column}'"),
    };

    let topic_cols: Vec<Option<&BinaryArray>> = TOPIC_COLUMNS
        .iter()
        .map(|name| binary_col(logs, name))
        .collect();
    let topic0 = topic_cols[0].ok_or_else(|| missing("topic0"))?;
    let data_col = binary_col(logs, "data").ok_or_else(|| missing("data"))?;

    let mut cols: Vec<ColValues> = kinds.iter().map(|k| ColValues::new(*k)).collect();
    let mut kept: Vec<u32> = Vec::new();
    let mut dropped = 0u64;

    for row in 0..logs.num_rows() {
        if topic0.is_null(row) || topic0.value(row) != selector.as_slice() {
            continue;
        }

        let mut failure: Option<String> = None;

        // Topics are contiguous; stop at the first absent slot.
        let mut topics: Vec<B256> = Vec::with_capacity(4);
        for col in topic_cols.iter() {
            match col {
                Some(col) if !col.is_null(row) => {
                    let raw = col.value(row);
                    if raw.len() != 32 {
                        failure = Some(format!("topic of width {} bytes", raw.len()));
                        break;
                    }
                    topics.push(B256::from_slice(raw));
                }
                _ => break,
            }
        }

        let data = if data_col.is_null(row) {
            &[][..]
        } else {
            data_col.value(row)
        };

        let committed = kept.len();
        if failure.is_none() {
            match event.decode_log_parts(topics.iter().copied(), data) {
                Ok(decoded) => {
                    let mut indexed = decoded.indexed.iter();
                    let mut body = decoded.body.iter();
                    for (col, input) in cols.iter_mut().zip(event.inputs.iter()) {
                        let value = if input.indexed {
                            indexed.next()
                        } else {
                            body.next()
                        };
                        match value {
                            Some(value) => {
                                if let Err(reason) = col.push(value) {
                                    failure = Some(reason);
                                    break;
                                }
                            }
                            None => {
                                failure = Some("missing decoded value".to_string());
                                break;
                            }
                        }
                    }
                }
                Err(e) => failure = Some(e.to_string()),
            }
        }

        match failure {
            None => kept.push(row as u32),
            Some(reason) => {
                for col in cols.iter_mut() {
                    col.truncate(committed);
                }
                if cfg.allow_decode_fail {
                    dropped += 1;
                } else {
                    return Err(StepError::Decode {
                        step: step.to_string(),
                        table: SOURCE_TABLE.to_string(),
                        row,
                        reason,
                    });
                }
            }
        }
    }

    // Carried identity columns first, then parameters in signature order.
    let indices = UInt32Array::from(kept);
    let mut fields: Vec<Field> = Vec::new();
    let mut arrays: Vec<ArrayRef> = Vec::new();

    for name in CARRY_COLUMNS {
        let Some((index, _)) = logs.schema().column_with_name(name) else {
            continue;
        };
        let taken = arrow::compute::take(logs.column(index), &indices, None).map_err(|e| {
            StepError::Arrow {
                step: step.to_string(),
                source: e,
            }
        })?;
        fields.push(logs.schema().field(index).clone());
        arrays.push(taken);
    }

    for (col, input) in cols.into_iter().zip(event.inputs.iter()) {
        let array = col.finish().map_err(|e| StepError::Arrow {
            step: step.to_string(),
            source: e,
        })?;
        fields.push(Field::new(&input.name, array.data_type().clone(), true));
        arrays.push(array);
    }

    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays).map_err(|e| {
        StepError::Arrow {
            step: step.to_string(),
            source: e,
        }
    })?;
    Ok((batch, dropped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, U256};
    use arrow::array::UInt64Array;
    use arrow::datatypes::DataType;

    const TRANSFER: &str = "Transfer(address indexed from, address indexed to, uint256 amount)";

    struct LogRow {
        block_number: u64,
        log_index: u64,
        topics: Vec<B256>,
        data: Vec<u8>,
    }

    fn logs_batch(rows: &[LogRow]) -> (String, RecordBatch) {
        let schema = Schema::new(vec![
            Field::new("block_number", DataType::UInt64, true),
            Field::new("log_index", DataType::UInt64, true),
            Field::new("topic0", DataType::Binary, true),
            Field::new("topic1", DataType::Binary, true),
            Field::new("topic2", DataType::Binary, true),
            Field::new("data", DataType::Binary, false),
        ]);
        let topic = |slot: usize| -> BinaryArray {
            BinaryArray::from_iter(
                rows.iter()
                    .map(|r| r.topics.get(slot).map(|t| t.to_vec())),
            )
        };
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(UInt64Array::from_iter_values(
                    rows.iter().map(|r| r.block_number),
                )),
                Arc::new(UInt64Array::from_iter_values(
                    rows.iter().map(|r| r.log_index),
                )),
                Arc::new(topic(0)),
                Arc::new(topic(1)),
                Arc::new(topic(2)),
                Arc::new(BinaryArray::from_iter_values(
                    rows.iter().map(|r| r.data.as_slice()),
                )),
            ],
        )
        .unwrap();
        ("logs".to_string(), batch)
    }

    fn transfer_selector() -> B256 {
        Event::parse(TRANSFER).unwrap().selector()
    }

    fn address_topic(byte: u8) -> B256 {
        B256::left_padding_from(Address::repeat_byte(byte).as_slice())
    }

    fn amount_word(amount: u64) -> Vec<u8> {
        U256::from(amount).to_be_bytes::<32>().to_vec()
    }

    fn decode_config(allow_decode_fail: bool) -> EvmDecodeEventsConfig {
        EvmDecodeEventsConfig {
            event_signature: TRANSFER.to_string(),
            output_table: "transfers".to_string(),
            allow_decode_fail,
        }
    }

    #[test]
    fn matching_row_decoded_others_excluded() {
        let mut tables = vec![logs_batch(&[
            LogRow {
                block_number: 100,
                log_index: 7,
                topics: vec![transfer_selector(), address_topic(0x11), address_topic(0x22)],
                data: amount_word(1000),
            },
            LogRow {
                block_number: 100,
                log_index: 8,
                topics: vec![B256::repeat_byte(0xff)],
                data: vec![],
            },
        ])];

        let dropped = decode_events("decode", &decode_config(false), &mut tables).unwrap();
        assert_eq!(dropped, 0);

        let transfers = find_table(&tables, "transfers").unwrap();
        assert_eq!(transfers.num_rows(), 1);

        let from = transfers
            .column_by_name("from")
            .unwrap()
            .as_any()
            .downcast_ref::<BinaryArray>()
            .unwrap();
        assert_eq!(from.value(0), Address::repeat_byte(0x11).as_slice());

        let to = transfers
            .column_by_name("to")
            .unwrap()
            .as_any()
            .downcast_ref::<BinaryArray>()
            .unwrap();
        assert_eq!(to.value(0), Address::repeat_byte(0x22).as_slice());

        let amount = transfers
            .column_by_name("amount")
            .unwrap()
            .as_any()
            .downcast_ref::<Decimal256Array>()
            .unwrap();
        assert_eq!(amount.value(0), i256::from_i128(1000));

        // identity columns carried through unchanged
        let block_number = transfers
            .column_by_name("block_number")
            .unwrap()
            .as_any()
            .downcast_ref::<UInt64Array>()
            .unwrap();
        assert_eq!(block_number.value(0), 100);
        let log_index = transfers
            .column_by_name("log_index")
            .unwrap()
            .as_any()
            .downcast_ref::<UInt64Array>()
            .unwrap();
        assert_eq!(log_index.value(0), 7);
    }

    #[test]
    fn malformed_row_dropped_when_tolerant() {
        let mut tables = vec![logs_batch(&[
            LogRow {
                block_number: 1,
                log_index: 0,
                topics: vec![transfer_selector(), address_topic(1), address_topic(2)],
                // 31 bytes: not a valid abi word
                data: vec![0u8; 31],
            },
            LogRow {
                block_number: 2,
                log_index: 0,
                topics: vec![transfer_selector(), address_topic(3), address_topic(4)],
                data: amount_word(5),
            },
        ])];

        let dropped = decode_events("decode", &decode_config(true), &mut tables).unwrap();
        assert_eq!(dropped, 1);

        let transfers = find_table(&tables, "transfers").unwrap();
        assert_eq!(transfers.num_rows(), 1);
        let block_number = transfers
            .column_by_name("block_number")
            .unwrap()
            .as_any()
            .downcast_ref::<UInt64Array>()
            .unwrap();
        assert_eq!(block_number.value(0), 2);
    }

    #[test]
    fn malformed_row_fails_run_when_strict() {
        let mut tables = vec![logs_batch(&[LogRow {
            block_number: 1,
            log_index: 0,
            topics: vec![transfer_selector(), address_topic(1), address_topic(2)],
            data: vec![0u8; 31],
        }])];

        let err = decode_events("decode", &decode_config(false), &mut tables).unwrap_err();
        assert!(matches!(err, StepError::Decode { .. }));
    }

    #[test]
    fn no_matches_yields_empty_table_with_schema() {
        let mut tables = vec![logs_batch(&[LogRow {
            block_number: 1,
            log_index: 0,
            topics: vec![B256::repeat_byte(0xee)],
            data: vec![],
        }])];

        decode_events("decode", &decode_config(false), &mut tables).unwrap();
        let transfers = find_table(&tables, "transfers").unwrap();
        assert_eq!(transfers.num_rows(), 0);
        assert!(transfers.schema().field_with_name("amount").is_ok());
    }

    #[test]
    fn missing_logs_table_is_a_noop() {
        let mut tables: Tables = Vec::new();
        let dropped = decode_events("decode", &decode_config(false), &mut tables).unwrap();
        assert_eq!(dropped, 0);
        assert!(tables.is_empty());
    }

    #[test]
    fn unsupported_parameter_type_rejected() {
        let cfg = EvmDecodeEventsConfig {
            event_signature: "Batch(uint256[] amounts)".to_string(),
            output_table: "batches".to_string(),
            allow_decode_fail: false,
        };
        let mut tables = vec![logs_batch(&[])];
        let err = decode_events("decode", &cfg, &mut tables).unwrap_err();
        assert!(matches!(err, StepError::UnsupportedType { .. }));
    }
}
