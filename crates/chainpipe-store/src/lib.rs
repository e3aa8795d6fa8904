//! chainpipe-store: sinks for transformed chunk batches.
//!
//! One [`Writer`] per pipeline run. Each table's first batch pins its
//! schema; later batches for the same table must match exactly.

mod duck;
mod parquet_dataset;

pub use duck::DuckDbWriter;
pub use parquet_dataset::{ParquetDatasetWriter, cleanup_tmp_files, is_valid_parquet};

use std::collections::BTreeMap;
use std::path::PathBuf;

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;

/// Destination for a pipeline run.
#[derive(Debug, Clone)]
pub enum WriterConfig {
    /// Directory of parquet files, one subdirectory per table.
    ParquetDataset { base_dir: PathBuf, zstd_level: i32 },
    /// DuckDB database file; one SQL table per pipeline table.
    DuckDb { path: PathBuf },
}

impl WriterConfig {
    pub fn parquet_dataset(base_dir: impl Into<PathBuf>) -> Self {
        Self::ParquetDataset {
            base_dir: base_dir.into(),
            zstd_level: 3,
        }
    }

    pub fn duckdb(path: impl Into<PathBuf>) -> Self {
        Self::DuckDb { path: path.into() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error(
        "table '{table}': batch schema does not match the schema established by the first batch"
    )]
    SchemaMismatch { table: String },
    #[error("table '{table}': column '{column}' has type {ty} which the duckdb sink cannot store (cast to a narrower type first)")]
    UnsupportedType {
        table: String,
        column: String,
        ty: String,
    },
    #[error("sink io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("duckdb error: {0}")]
    DuckDb(#[from] duckdb::Error),
}

enum Backend {
    Parquet(ParquetDatasetWriter),
    DuckDb(DuckDbWriter),
}

/// Dispatching writer with per-table schema pinning and row accounting.
pub struct Writer {
    backend: Backend,
    schemas: BTreeMap<String, SchemaRef>,
    rows: BTreeMap<String, u64>,
}

impl Writer {
    pub fn open(config: &WriterConfig) -> Result<Self, WriterError> {
        let backend = match config {
            WriterConfig::ParquetDataset {
                base_dir,
                zstd_level,
            } => Backend::Parquet(ParquetDatasetWriter::open(base_dir, *zstd_level)?),
            WriterConfig::DuckDb { path } => Backend::DuckDb(DuckDbWriter::open(path)?),
        };
        Ok(Self {
            backend,
            schemas: BTreeMap::new(),
            rows: BTreeMap::new(),
        })
    }

    /// Append one batch to a table. Empty batches still pin the schema
    /// but produce no output.
    pub fn write(&mut self, table: &str, batch: &RecordBatch) -> Result<(), WriterError> {
        match self.schemas.get(table) {
            Some(expected) => {
                if batch.schema() != *expected {
                    return Err(WriterError::SchemaMismatch {
                        table: table.to_string(),
                    });
                }
            }
            None => {
                self.schemas.insert(table.to_string(), batch.schema());
            }
        }

        if batch.num_rows() == 0 {
            return Ok(());
        }

        match &mut self.backend {
            Backend::Parquet(w) => w.write(table, batch)?,
            Backend::DuckDb(w) => w.write(table, batch)?,
        }
        *self.rows.entry(table.to_string()).or_insert(0) += batch.num_rows() as u64;
        Ok(())
    }

    /// Rows written so far, per table.
    pub fn rows_written(&self) -> &BTreeMap<String, u64> {
        &self.rows
    }

    /// Flush and close the sink, returning the per-table row totals.
    pub fn finish(self) -> Result<BTreeMap<String, u64>, WriterError> {
        match self.backend {
            Backend::Parquet(w) => w.finish()?,
            Backend::DuckDb(w) => w.finish()?,
        }
        Ok(self.rows)
    }
}
