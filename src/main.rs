#![warn(clippy::all, clippy::pedantic)]

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use gizmo_gateway::cli::{Cli, Commands};
use gizmo_gateway::config::Config;
use gizmo_gateway::speech::{ElevenLabsSpeech, SpeechProvider};
use gizmo_gateway::{client, gateway};

#[tokio::main]
async fn main() -> Result<()> {
    // Install default crypto provider for Rustls TLS. Both reqwest and
    // tokio-tungstenite link rustls; without an explicit selection the
    // process-level CryptoProvider cannot be determined automatically.
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("Warning: Failed to install default crypto provider: {e:?}");
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve {
        port: None,
        host: None,
    }) {
        Commands::Serve { port, host } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            gateway::run_gateway(&config).await
        }
        Commands::Verify => {
            let speech = ElevenLabsSpeech::new(&config.speech);
            match speech.list_voices().await {
                Ok(voices) => {
                    println!("✓ Speech credential valid ({} voices)", voices.len());
                    for voice in voices {
                        println!("  {} ({})", voice.name, voice.voice_id);
                    }
                    Ok(())
                }
                Err(e) => anyhow::bail!("speech credential check failed: {e}"),
            }
        }
        Commands::Client { url } => client::run_client(&url).await,
    }
}
