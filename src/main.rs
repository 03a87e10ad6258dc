use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::LocalSet;

use forge_reload::{interact_stdio, logging, InteractOptions, STACK_SIZE};

#[derive(Parser, Debug)]
#[command(name = "forge_reload")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Forge script to run and watch
    script: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init();

    match run_on_large_stack(cli) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_on_large_stack(cli: Cli) -> Result<i32> {
    let session = std::thread::Builder::new()
        .name("forge-session".into())
        .stack_size(STACK_SIZE)
        .spawn(move || run(&cli))
        .context("failed to spawn the session thread")?;
    match session.join() {
        Ok(result) => result,
        Err(payload) => std::panic::resume_unwind(payload),
    }
}

fn run(cli: &Cli) -> Result<i32> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the runtime")?;

    let local = LocalSet::new();
    let result = local.block_on(&runtime, interact_stdio(&cli.script, &InteractOptions::default()));
    // stdin is read on a blocking thread that may still be parked in read(2)
    runtime.shutdown_background();

    result.with_context(|| format!("live console for {} failed", cli.script.display()))
}
