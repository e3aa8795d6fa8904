//! Binary column → `0x`-prefixed lowercase hex text

use std::sync::Arc;

use alloy::primitives::hex;
use arrow::array::{
    Array, ArrayRef, BinaryArray, FixedSizeBinaryArray, LargeBinaryArray, RecordBatch, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;

/// Replace every binary-typed column with its hex text representation.
/// Non-binary columns pass through untouched, which makes the step
/// idempotent: a second application sees only text columns.
pub fn hex_encode(batch: &RecordBatch) -> Result<RecordBatch, ArrowError> {
    let mut fields: Vec<Field> = Vec::with_capacity(batch.num_columns());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(batch.num_columns());
    let mut changed = false;

    for (field, column) in batch.schema().fields().iter().zip(batch.columns()) {
        let encoded: Option<StringArray> = match field.data_type() {
            DataType::Binary => {
                let array = column
                    .as_any()
                    .downcast_ref::<BinaryArray>()
                    .expect("Binary column");
                Some(array.iter().map(|v| v.map(hex::encode_prefixed)).collect())
            }
            DataType::LargeBinary => {
                let array = column
                    .as_any()
                    .downcast_ref::<LargeBinaryArray>()
                    .expect("LargeBinary column");
                Some(array.iter().map(|v| v.map(hex::encode_prefixed)).collect())
            }
            DataType::FixedSizeBinary(_) => {
                let array = column
                    .as_any()
                    .downcast_ref::<FixedSizeBinaryArray>()
                    .expect("FixedSizeBinary column");
                Some(array.iter().map(|v| v.map(hex::encode_prefixed)).collect())
            }
            _ => None,
        };

        match encoded {
            Some(array) => {
                fields.push(Field::new(
                    field.name(),
                    DataType::Utf8,
                    field.is_nullable(),
                ));
                columns.push(Arc::new(array));
                changed = true;
            }
            None => {
                fields.push(field.as_ref().clone());
                columns.push(column.clone());
            }
        }
    }

    if !changed {
        return Ok(batch.clone());
    }
    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
}
