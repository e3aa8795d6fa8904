//! Head subcommand - report the current head block of an endpoint

use anyhow::{Context, Result};
use chainpipe_ingest::{ProviderConfig, RpcSource, Source};
use clap::Args;

#[derive(Args, Debug)]
pub struct HeadArgs {
    /// RPC endpoint (falls back to $RPC_URL)
    pub url: Option<String>,
}

pub async fn run(args: HeadArgs) -> Result<()> {
    let url = match args.url {
        Some(url) => url,
        None => std::env::var("RPC_URL").context("no url given and RPC_URL is unset")?,
    };

    let source = RpcSource::new(&ProviderConfig::rpc(&url))?;
    let head = source.get_head().await?;
    println!("{head}");
    Ok(())
}
