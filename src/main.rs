//! stagepool CLI: run lines through a pipeline of worker-pool stages.

use anyhow::Result;
use clap::Parser;
use stagepool::engine::{Cli, handle_run};
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
