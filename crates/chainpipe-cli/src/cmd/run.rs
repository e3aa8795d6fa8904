//! Run subcommand - execute a pipeline from its TOML description

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::config::PipelineFile;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Pipeline description file
    pub pipeline: PathBuf,

    /// Override the provider url from the file
    #[arg(long)]
    pub rpc_url: Option<String>,
}

pub async fn run(args: RunArgs) -> Result<()> {
    let pipeline = PipelineFile::from_file(&args.pipeline)?.into_pipeline(args.rpc_url)?;
    let summary = chainpipe_etl::run_pipeline(pipeline).await?;

    println!();
    println!("=== Run Summary ===");
    println!("Chunks: {}", summary.chunks);
    for (table, rows) in &summary.rows_written {
        println!("{table}: {rows} rows");
    }
    if summary.rows_dropped > 0 {
        println!("Dropped: {} rows", summary.rows_dropped);
    }
    println!("Elapsed: {:.1}s", summary.elapsed.as_secs_f64());

    Ok(())
}
