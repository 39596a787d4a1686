use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "clawchat",
    version,
    disable_version_flag = true,
    about = "Web chat UI and WebSocket relay for a local gateway"
)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// HTTP server port (overrides config file setting)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Gateway WebSocket URL (overrides config file setting)
    #[arg(short, long)]
    pub gateway: Option<String>,

    /// Gateway auth token (overrides config file setting)
    #[arg(short, long)]
    pub token: Option<String>,

    /// Print version
    #[arg(short = 'v', long, action = ArgAction::Version)]
    pub version: Option<bool>,
}
