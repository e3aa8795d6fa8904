//! DuckDB sink: one SQL table per pipeline table, appended via the
//! arrow appender.

use std::collections::BTreeSet;
use std::path::Path;

use arrow::array::RecordBatch;
use arrow::datatypes::{DataType, Schema, TimeUnit};
use duckdb::Connection;

use crate::WriterError;

pub struct DuckDbWriter {
    conn: Connection,
    created: BTreeSet<String>,
}

impl std::fmt::Debug for DuckDbWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbWriter")
            .field("created", &self.created)
            .finish_non_exhaustive()
    }
}

impl DuckDbWriter {
    pub fn open(path: &Path) -> Result<Self, WriterError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn,
            created: BTreeSet::new(),
        })
    }

    pub fn write(&mut self, table: &str, batch: &RecordBatch) -> Result<(), WriterError> {
        if !self.created.contains(table) {
            let ddl = create_table_sql(table, &batch.schema())?;
            self.conn.execute_batch(&ddl)?;
            self.created.insert(table.to_string());
        }

        let mut appender = self.conn.appender(table)?;
        appender.append_record_batch(batch.clone())?;
        appender.flush()?;
        Ok(())
    }

    pub fn finish(self) -> Result<(), WriterError> {
        // Connection closes on drop; appenders are flushed per write.
        Ok(())
    }
}

fn create_table_sql(table: &str, schema: &Schema) -> Result<String, WriterError> {
    let mut columns = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        let sql_type = sql_type(field.data_type()).ok_or_else(|| WriterError::UnsupportedType {
            table: table.to_string(),
            column: field.name().clone(),
            ty: field.data_type().to_string(),
        })?;
        let not_null = if field.is_nullable() { "" } else { " NOT NULL" };
        columns.push(format!("\"{}\" {sql_type}{not_null}", field.name()));
    }
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS \"{table}\" ({});",
        columns.join(", ")
    ))
}

fn sql_type(ty: &DataType) -> Option<String> {
    let sql = match ty {
        DataType::Boolean => "BOOLEAN".to_string(),
        DataType::Int32 => "INTEGER".to_string(),
        DataType::Int64 => "BIGINT".to_string(),
        DataType::UInt32 => "UINTEGER".to_string(),
        DataType::UInt64 => "UBIGINT".to_string(),
        DataType::Float32 => "FLOAT".to_string(),
        DataType::Float64 => "DOUBLE".to_string(),
        DataType::Binary | DataType::LargeBinary | DataType::FixedSizeBinary(_) => {
            "BLOB".to_string()
        }
        DataType::Utf8 | DataType::LargeUtf8 => "VARCHAR".to_string(),
        // duckdb decimals top out at 38 digits; wider values must be
        // cast down before reaching this sink
        DataType::Decimal128(precision, scale) => format!("DECIMAL({precision}, {scale})"),
        DataType::Timestamp(TimeUnit::Second | TimeUnit::Millisecond | TimeUnit::Microsecond, _) => {
            "TIMESTAMP".to_string()
        }
        _ => return None,
    };
    Some(sql)
}
