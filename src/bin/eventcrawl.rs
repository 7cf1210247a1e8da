use std::fs;
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use eventcrawl::{runtime, Cli};
use tracing::error;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();
    match bootstrap_and_run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("fatal: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn bootstrap_and_run(cli: Cli) -> Result<()> {
    fs::create_dir_all(&cli.output_dir).with_context(|| {
        format!(
            "creating output directory {}",
            cli.output_dir.display()
        )
    })?;
    runtime::run(cli).map_err(|err| anyhow!(err))
}
