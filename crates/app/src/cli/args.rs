pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "attache")]
#[command(about = "Store files as chat attachments")]
#[command(version)]
pub struct Args {
    /// Path to the attache config directory (defaults to ~/.attache)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
