use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "lidar-relay", version, about = "Lidar worker supervisor and UDP telemetry relay")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the relay, the worker supervisor and the HTTP API
    Serve {
        /// HTTP listen address (e.g., "127.0.0.1:3000")
        #[arg(long)]
        http_addr: Option<String>,

        /// Inbound UDP port for telemetry
        #[arg(short = 'p', long)]
        udp_port: Option<u16>,

        /// Directory containing the worker scripts
        #[arg(short, long)]
        scripts_dir: Option<PathBuf>,

        /// Path to config file (overrides ./lidar-relay.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Send a single UDP datagram and exit
    Send {
        /// Target host name or IP address
        #[arg(long)]
        host: String,

        /// Target UDP port
        #[arg(long)]
        port: i64,

        /// Datagram payload
        message: String,
    },
}
