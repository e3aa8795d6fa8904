//! Pipeline description loading from TOML files

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chainpipe_etl::Pipeline;
use chainpipe_ingest::{evm, ProviderConfig, Query};
use chainpipe_steps::{
    parse_data_type, CastByTypeConfig, EvmDecodeEventsConfig, Step, StepKind,
};
use chainpipe_store::WriterConfig;
use serde::Deserialize;

/// On-disk pipeline description. Converted into a [`Pipeline`] after
/// environment expansion and step validation.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineFile {
    pub provider: RawProvider,
    pub query: evm::Query,
    #[serde(default)]
    pub steps: Vec<RawStep>,
    pub writer: RawWriter,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawProvider {
    #[serde(default = "default_provider_kind")]
    pub kind: String,
    pub url: String,
    pub max_block_range: Option<u64>,
    #[serde(default)]
    pub stop_on_head: bool,
}

fn default_provider_kind() -> String {
    "rpc".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawWriter {
    ParquetDataset {
        base_dir: PathBuf,
        #[serde(default = "default_zstd_level")]
        zstd_level: i32,
    },
    #[serde(rename = "duckdb")]
    DuckDb { path: PathBuf },
}

fn default_zstd_level() -> i32 {
    3
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawStep {
    EvmDecodeEvents {
        name: Option<String>,
        event_signature: String,
        output_table: String,
        #[serde(default)]
        allow_decode_fail: bool,
    },
    HexEncode { name: Option<String> },
    CastByType {
        name: Option<String>,
        from_type: String,
        to_type: String,
        #[serde(default)]
        allow_cast_fail: bool,
    },
}

impl PipelineFile {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Resolve into a runnable pipeline. `url_override` wins over the
    /// file's provider url.
    pub fn into_pipeline(self, url_override: Option<String>) -> Result<Pipeline> {
        if self.provider.kind != "rpc" {
            bail!("unsupported provider kind '{}'", self.provider.kind);
        }
        let url = match url_override {
            Some(url) => url,
            None => expand_env_var(&self.provider.url)
                .with_context(|| format!("provider url '{}' is unset", self.provider.url))?,
        };

        let mut provider =
            ProviderConfig::rpc(url).with_stop_on_head(self.provider.stop_on_head);
        if let Some(max) = self.provider.max_block_range {
            provider = provider.with_max_block_range(max);
        }

        let steps = self
            .steps
            .into_iter()
            .map(raw_step)
            .collect::<Result<Vec<_>>>()?;

        let writer = match self.writer {
            RawWriter::ParquetDataset {
                base_dir,
                zstd_level,
            } => WriterConfig::ParquetDataset {
                base_dir,
                zstd_level,
            },
            RawWriter::DuckDb { path } => WriterConfig::DuckDb { path },
        };

        Ok(Pipeline {
            provider,
            query: Query::Evm(self.query),
            steps,
            writer,
        })
    }
}

fn raw_step(raw: RawStep) -> Result<Step> {
    let (name, kind) = match raw {
        RawStep::EvmDecodeEvents {
            name,
            event_signature,
            output_table,
            allow_decode_fail,
        } => (
            name,
            StepKind::EvmDecodeEvents(EvmDecodeEventsConfig {
                event_signature,
                output_table,
                allow_decode_fail,
            }),
        ),
        RawStep::HexEncode { name } => (name, StepKind::HexEncode),
        RawStep::CastByType {
            name,
            from_type,
            to_type,
            allow_cast_fail,
        } => {
            let from_type = parse_data_type(&from_type)
                .with_context(|| format!("unknown cast source type '{from_type}'"))?;
            let to_type = parse_data_type(&to_type)
                .with_context(|| format!("unknown cast target type '{to_type}'"))?;
            (
                name,
                StepKind::CastByType(CastByTypeConfig {
                    from_type,
                    to_type,
                    allow_cast_fail,
                }),
            )
        }
    };
    Ok(match name {
        Some(name) => Step::named(name, kind),
        None => Step::new(kind),
    })
}

/// Expand a `${VAR}` reference to its environment value; plain strings
/// pass through.
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}
