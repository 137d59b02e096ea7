use anyhow::Context;
use clap::Parser;
use memc_loader::cli::{args::Args, commands};

fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    let runtime = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;

    // The exit code reflects only fatal errors; the error rate is reported in the log
    runtime
        .block_on(commands::run(args))
        .context("Load failed")?;

    Ok(())
}
