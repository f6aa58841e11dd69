mod cli;
mod process;
mod state;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cli::{args::Args, op::Op, Get, Init, Ls, Mkdir, Mv, Put, Refresh, Rm, Stat, Version};

use state::AppState;

command_enum! {
    (Get, Get),
    (Init, Init),
    (Ls, Ls),
    (Mkdir, Mkdir),
    (Mv, Mv),
    (Put, Put),
    (Refresh, Refresh),
    (Rm, Rm),
    (Stat, Stat),
    (Version, Version),
}

/// Log settings from the config file, defaults before `init`
fn logging_config(args: &Args) -> anyhow::Result<(tracing::Level, Option<std::path::PathBuf>)> {
    let attache_dir = AppState::attache_dir(args.config_path.clone())?;
    if !attache_dir.exists() {
        return Ok((tracing::Level::WARN, None));
    }
    let state = AppState::load(Some(attache_dir.clone()))
        .with_context(|| format!("failed to load config from {}", attache_dir.display()))?;
    Ok((state.config.level(), state.config.log_dir))
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let (level, log_dir) = logging_config(&args).unwrap_or_else(|e| {
        eprintln!("Warning: {:#}, using default log settings", e);
        (tracing::Level::WARN, None)
    });
    let guards = process::init_logging(level, log_dir.as_deref());

    let ctx = cli::op::OpContext::new(args.config_path);

    let code = match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
            0
        }
        Err(e) => {
            tracing::debug!("command failed: {:?}", e);
            eprintln!("Error: {}", e);
            1
        }
    };
    // flush buffered log lines, exit skips destructors
    drop(guards);
    std::process::exit(code);
}
