use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// `gizmo-gateway` - narrative voice-chat gateway for the Gizmo-101 machine.
#[derive(Parser, Debug)]
#[command(name = "gizmo-gateway")]
#[command(version = "0.1.0")]
#[command(about = "Session-scoped voice chat over WebSocket with HTTP fallback.", long_about = None)]
pub struct Cli {
    /// Path to config.toml (defaults to built-in settings)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway server (default command)
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
    },

    /// Check the configured speech credential and list available voices
    Verify,

    /// Attach a terminal client to a running gateway
    Client {
        /// Duplex endpoint url
        #[arg(default_value = "ws://127.0.0.1:3003/ws")]
        url: String,
    },
}
