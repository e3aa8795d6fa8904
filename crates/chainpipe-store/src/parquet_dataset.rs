//! Parquet dataset sink: one directory per table, one file per chunk,
//! written tmp-first and renamed into place.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use arrow::array::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;

use crate::WriterError;

pub struct ParquetDatasetWriter {
    base_dir: PathBuf,
    props: WriterProperties,
    // next file sequence number per table
    seq: BTreeMap<String, usize>,
}

impl std::fmt::Debug for ParquetDatasetWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParquetDatasetWriter")
            .field("base_dir", &self.base_dir)
            .finish_non_exhaustive()
    }
}

impl ParquetDatasetWriter {
    pub fn open(base_dir: &Path, zstd_level: i32) -> Result<Self, WriterError> {
        fs::create_dir_all(base_dir)?;
        // An interrupted earlier run may have left partial tmp files.
        cleanup_tmp_files(base_dir)?;
        let level = ZstdLevel::try_new(zstd_level)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(level))
            .set_max_row_group_size(1024 * 1024)
            .build();
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            props,
            seq: BTreeMap::new(),
        })
    }

    /// Write one batch as a complete parquet file under the table's
    /// directory. The footer is flushed before the rename, so a file
    /// with the final name is always readable.
    pub fn write(&mut self, table: &str, batch: &RecordBatch) -> Result<(), WriterError> {
        let table_dir = self.base_dir.join(table);
        fs::create_dir_all(&table_dir)?;

        let seq = self.seq.entry(table.to_string()).or_insert(0);
        let filename = format!("{table}_{seq:04}.parquet");
        let final_path = table_dir.join(&filename);
        let tmp_path = table_dir.join(format!("{filename}.tmp"));

        if tmp_path.exists() {
            fs::remove_file(&tmp_path)?;
        }

        let file = File::create(&tmp_path)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(self.props.clone()))?;
        writer.write(batch)?;
        writer.close()?;
        fs::rename(&tmp_path, &final_path)?;

        log::debug!(
            "wrote {} rows to {}",
            batch.num_rows(),
            final_path.display()
        );
        *seq += 1;
        Ok(())
    }

    pub fn finish(self) -> Result<(), WriterError> {
        // Every file is finalized at write time.
        Ok(())
    }
}

/// Check whether a completed parquet file has a valid footer.
pub fn is_valid_parquet(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    let file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    parquet::file::reader::SerializedFileReader::new(file).is_ok()
}

/// Remove stale .tmp files left by an interrupted run. Walks the table
/// subdirectories of the dataset.
pub fn cleanup_tmp_files(base_dir: &Path) -> std::io::Result<()> {
    if !base_dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(base_dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&path)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "tmp") {
                log::warn!("Removing stale tmp file: {}", path.display());
                fs::remove_file(&path)?;
            }
        }
    }
    Ok(())
}
