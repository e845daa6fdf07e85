use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(name = "stompd")]
#[command(version)]
#[command(about = "Standalone STOMP 1.2 server")]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Listen host, overriding the configuration file
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port, overriding the configuration file
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Require credentials on CONNECT
    #[arg(long)]
    pub secured: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
