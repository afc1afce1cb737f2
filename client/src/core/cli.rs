use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::constants::{ENV_CONFIG, ENV_ENDPOINT, ENV_MODEL, ENV_TIMEOUT_SECS};

#[derive(Parser)]
#[command(name = "docpilot")]
#[command(version, about = "Documentation chat client", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Chat service base URL
    #[arg(long, short = 'e', global = true, env = ENV_ENDPOINT)]
    pub endpoint: Option<String>,

    /// Model variant to request
    #[arg(long, short = 'm', global = true, env = ENV_MODEL)]
    pub model: Option<String>,

    /// Request timeout in seconds
    #[arg(long, global = true, env = ENV_TIMEOUT_SECS)]
    pub timeout_secs: Option<u64>,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Start an interactive chat session (default command)
    Chat,
    /// Ask a single question and exit
    Ask {
        /// The question to send
        question: String,
    },
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
    pub config: Option<PathBuf>,
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        endpoint: cli.endpoint,
        model: cli.model,
        timeout_secs: cli.timeout_secs,
        config: cli.config,
    };
    (config, cli.command)
}
