// Command-line front-end (spec §6, explicitly external to the core): loads
// `.env`, parses `--log-dir`/`--context` flags, seeds the initial Context,
// and drives one top-level recipe through the Executor. Grounded on the
// teacher's `runner-worker/src/main.rs` (`clap::Parser` args struct,
// `tracing_subscriber::fmt()` init, translate the async result to a process
// exit code) — simplified since this CLI has no IPC pipes to a listener
// process, just a recipe path and an exit code.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use serde_json::Value;

use recipe_executor::{Context, Executor};

/// Command-line arguments for the recipe executor.
#[derive(Parser, Debug)]
#[command(name = "recipe-executor", about = "Declarative recipe execution engine")]
struct Args {
    /// Path to the recipe JSON file to execute.
    recipe_path: PathBuf,

    /// Directory for log output.
    #[arg(long = "log-dir", default_value = "logs")]
    log_dir: PathBuf,

    /// Seeds an initial context artifact as `key=value` (repeatable).
    #[arg(long = "context", value_parser = parse_context_entry)]
    context: Vec<(String, String)>,
}

fn parse_context_entry(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) => Ok((key.to_string(), value.to_string())),
        None => Err(format!("expected key=value, got '{raw}'")),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    // .env loading is the CLI's responsibility, not the core's (spec §6);
    // a missing file is not an error, since most invocations have none.
    let _ = dotenvy::dotenv();

    let _log_guard = match recipe_executor_common::init_tracing(Some(&args.log_dir)) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("failed to initialize logging: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(args))
}

async fn run(args: Args) -> ExitCode {
    let mut artifacts = HashMap::with_capacity(args.context.len());
    for (key, value) in args.context {
        artifacts.insert(key, Value::String(value));
    }
    let mut ctx = Context::new(artifacts, HashMap::new());

    let recipe_path = args.recipe_path.to_string_lossy().to_string();
    tracing::info!(recipe = %recipe_path, "starting recipe");

    match Executor::new().execute(recipe_path.clone(), &mut ctx).await {
        Ok(()) => {
            tracing::info!(recipe = %recipe_path, "recipe completed successfully");
            ExitCode::SUCCESS
        }
        Err(err) => {
            let chained = anyhow::Error::new(err);
            eprintln!("recipe '{recipe_path}' failed: {chained:#}");
            tracing::error!(recipe = %recipe_path, error = %chained, "recipe failed");
            ExitCode::FAILURE
        }
    }
}
