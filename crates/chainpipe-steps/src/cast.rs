//! By-type casting with configurable overflow tolerance

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, RecordBatch};
use arrow::compute::{cast_with_options, CastOptions};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::util::display::FormatOptions;

use crate::StepError;

/// Cast every column whose type equals `from_type` to `to_type`.
#[derive(Debug, Clone)]
pub struct CastByTypeConfig {
    pub from_type: DataType,
    pub to_type: DataType,
    /// Tolerant mode: a value that does not fit the destination type
    /// becomes null and the row is kept. Intolerant mode fails the run.
    pub allow_cast_fail: bool,
}

/// Returns the batch and the number of values nulled by tolerant
/// overflow (always 0 in strict mode, which errors instead).
pub(crate) fn cast_by_type(
    step: &str,
    table: &str,
    batch: &RecordBatch,
    cfg: &CastByTypeConfig,
) -> Result<(RecordBatch, u64), StepError> {
    let mut fields: Vec<Field> = Vec::with_capacity(batch.num_columns());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(batch.num_columns());
    let mut changed = false;
    let mut nulled = 0u64;

    let options = CastOptions {
        safe: cfg.allow_cast_fail,
        format_options: FormatOptions::default(),
    };

    for (field, column) in batch.schema().fields().iter().zip(batch.columns()) {
        if field.data_type() == &cfg.from_type {
            let cast = cast_with_options(column, &cfg.to_type, &options).map_err(|e| {
                StepError::Cast {
                    step: step.to_string(),
                    table: table.to_string(),
                    column: field.name().clone(),
                    source: e,
                }
            })?;
            // Safe casting may introduce nulls the source did not have;
            // count them so the run can report tolerated failures.
            nulled += cast.null_count().saturating_sub(column.null_count()) as u64;
            let nullable = field.is_nullable() || cfg.allow_cast_fail;
            fields.push(Field::new(field.name(), cfg.to_type.clone(), nullable));
            columns.push(cast);
            changed = true;
        } else {
            fields.push(field.as_ref().clone());
            columns.push(column.clone());
        }
    }

    if !changed {
        return Ok((batch.clone(), 0));
    }
    if nulled > 0 {
        log::debug!("step '{step}': nulled {nulled} values overflowing the target type in '{table}'");
    }
    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).map_err(|e| {
        StepError::Arrow {
            step: step.to_string(),
            source: e,
        }
    })?;
    Ok((batch, nulled))
}

/// Parse a type name as used in pipeline config files.
///
/// Accepts the lowercase names `boolean`, `int32`, `int64`, `uint32`,
/// `uint64`, `binary`, `utf8`, `timestamp`, and `decimal128(p, s)` /
/// `decimal256(p, s)`.
pub fn parse_data_type(s: &str) -> Option<DataType> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "boolean" | "bool" => return Some(DataType::Boolean),
        "int32" => return Some(DataType::Int32),
        "int64" => return Some(DataType::Int64),
        "uint32" => return Some(DataType::UInt32),
        "uint64" => return Some(DataType::UInt64),
        "binary" => return Some(DataType::Binary),
        "utf8" | "string" => return Some(DataType::Utf8),
        "timestamp" | "timestamp(second)" => {
            return Some(DataType::Timestamp(TimeUnit::Second, None))
        }
        _ => {}
    }

    let (name, args) = s.strip_suffix(')')?.split_once('(')?;
    let (precision, scale) = args.split_once(',')?;
    let precision: u8 = precision.trim().parse().ok()?;
    let scale: i8 = scale.trim().parse().ok()?;
    match name {
        "decimal128" => Some(DataType::Decimal128(precision, scale)),
        "decimal256" => Some(DataType::Decimal256(precision, scale)),
        _ => None,
    }
}
