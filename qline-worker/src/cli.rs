use std::path::PathBuf;

use clap::Parser;

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "qline-worker", version, about = "Drain a qline queue with the built-in executors")]
pub struct CliArgs {
    /// Path to configuration file (overrides QLINE_CONFIG_PATH)
    #[arg(short = 'c', long = "config-path")]
    pub config_path: Option<PathBuf>,

    /// Queue to consume; falls back to `queue.default`
    #[arg(short, long)]
    pub queue: Option<String>,

    /// JSON file holding an array of wire payloads to enqueue before starting
    #[arg(long)]
    pub seed: Option<PathBuf>,

    /// Process whatever is visible, then exit instead of polling
    #[arg(long)]
    pub drain: bool,
}

impl CliArgs {
    /// Config path from the command line, then the environment.
    pub fn resolved_config_path(&self) -> Option<PathBuf> {
        self.config_path
            .clone()
            .or_else(|| std::env::var_os("QLINE_CONFIG_PATH").map(PathBuf::from))
    }
}
