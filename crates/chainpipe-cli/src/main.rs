//! chainpipe - EVM range ingestion pipelines from a TOML description

use anyhow::Result;
use chainpipe_core::request_shutdown;
use clap::{Parser, Subcommand};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

mod cmd;
mod config;

#[derive(Parser)]
#[command(name = "chainpipe")]
#[command(about = "Run EVM block/log ingestion pipelines")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run a pipeline described by a TOML file
    Run(cmd::run::RunArgs),
    /// Print the current head block of an RPC endpoint
    Head(cmd::head::HeadArgs),
}

fn install_signal_handlers() {
    // First signal: request graceful shutdown (finish the in-flight
    // chunk, flush sinks). Second signal: exit immediately. Signals are
    // forwarded to a plain thread, so waking async waiters is fine here.
    let mut signals =
        Signals::new([SIGTERM, SIGINT]).expect("Failed to register signal handler");
    std::thread::spawn(move || {
        for _ in signals.forever() {
            if request_shutdown() {
                std::process::exit(130);
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    chainpipe_core::init_logging(cli.quiet, cli.debug);
    install_signal_handlers();

    match cli.command {
        Command::Run(args) => cmd::run::run(args).await,
        Command::Head(args) => cmd::head::run(args).await,
    }
}
