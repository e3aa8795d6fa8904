//! Chainpipe Steps - ordered columnar transforms over per-chunk tables
//!
//! A step pipeline is a declared list of transforms applied to every
//! chunk's table map in order: ABI event decoding, hex encoding of
//! binary columns, and by-type casting. Tolerant failure modes drop or
//! null rows; intolerant ones abort the run.

pub mod cast;
pub mod decode;
pub mod hex_encode;

use arrow::array::RecordBatch;
use arrow::error::ArrowError;

pub use cast::{parse_data_type, CastByTypeConfig};
pub use decode::EvmDecodeEventsConfig;

/// Ordered per-table batches for one chunk. Mirrors the ingest layout:
/// a vec keeps emission order stable where a map would not.
pub type Tables = Vec<(String, RecordBatch)>;

/// One named transform step.
#[derive(Debug, Clone)]
pub struct Step {
    /// Optional label for diagnostics; defaults to the kind name.
    pub name: Option<String>,
    pub kind: StepKind,
}

impl Step {
    pub fn new(kind: StepKind) -> Self {
        Self { name: None, kind }
    }

    pub fn named(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: Some(name.into()),
            kind,
        }
    }

    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(self.kind.label())
    }
}

/// The supported transform kinds. Closed set: a new kind must be
/// handled everywhere steps are dispatched.
#[derive(Debug, Clone)]
pub enum StepKind {
    EvmDecodeEvents(EvmDecodeEventsConfig),
    HexEncode,
    CastByType(CastByTypeConfig),
}

impl StepKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::EvmDecodeEvents(_) => "evm_decode_events",
            Self::HexEncode => "hex_encode",
            Self::CastByType(_) => "cast_by_type",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("step '{step}': invalid event signature '{signature}': {reason}")]
    Signature {
        step: String,
        signature: String,
        reason: String,
    },
    #[error("step '{step}': unsupported parameter type '{ty}' for '{param}'")]
    UnsupportedType {
        step: String,
        param: String,
        ty: String,
    },
    #[error("step '{step}' (table '{table}'): row {row}: {reason}")]
    Decode {
        step: String,
        table: String,
        row: usize,
        reason: String,
    },
    #[error("step '{step}' (table '{table}', column '{column}'): cast failed: {source}")]
    Cast {
        step: String,
        table: String,
        column: String,
        #[source]
        source: ArrowError,
    },
    #[error("step '{step}': {source}")]
    Arrow {
        step: String,
        #[source]
        source: ArrowError,
    },
}

/// Result of running the step list over one chunk.
#[derive(Debug)]
pub struct StepOutcome {
    pub tables: Tables,
    /// Rows dropped or nulled by tolerant failure modes.
    pub rows_dropped: u64,
}

/// Apply `steps` in declaration order. Each step sees exactly the
/// tables its predecessor left behind.
pub fn run_steps(steps: &[Step], tables: Tables) -> Result<StepOutcome, StepError> {
    let mut tables = tables;
    let mut rows_dropped = 0u64;

    for step in steps {
        match &step.kind {
            StepKind::EvmDecodeEvents(cfg) => {
                rows_dropped += decode::decode_events(step.label(), cfg, &mut tables)?;
            }
            StepKind::HexEncode => {
                for (_, batch) in tables.iter_mut() {
                    *batch = hex_encode::hex_encode(batch).map_err(|e| StepError::Arrow {
                        step: step.label().to_string(),
                        source: e,
                    })?;
                }
            }
            StepKind::CastByType(cfg) => {
                for (name, batch) in tables.iter_mut() {
                    let (cast, nulled) = cast::cast_by_type(step.label(), name, batch, cfg)?;
                    *batch = cast;
                    rows_dropped += nulled;
                }
            }
        }
    }

    Ok(StepOutcome {
        tables,
        rows_dropped,
    })
}

/// Find a table by name.
pub(crate) fn find_table<'a>(tables: &'a Tables, name: &str) -> Option<&'a RecordBatch> {
    tables
        .iter()
        .find(|(table, _)| table == name)
        .map(|(_, batch)| batch)
}

/// Replace a table in place, or append it after the existing ones.
pub(crate) fn upsert_table(tables: &mut Tables, name: &str, batch: RecordBatch) {
    if let Some(slot) = tables.iter_mut().find(|(table, _)| table == name) {
        slot.1 = batch;
    } else {
        tables.push((name.to_string(), batch));
    }
}
