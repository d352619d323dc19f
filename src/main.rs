use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use voicelink::client::Client;
use voicelink::config::{ClientConfig, ServerConfig};
use voicelink::device::{CpalMicrophone, CpalSpeaker};
use voicelink::pipeline::EchoPipeline;
use voicelink::presentation;
use voicelink::server::Server;
use voicelink::vad::SileroFactory;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream microphone audio to a voicelink server and play its replies
    Client {
        /// Websocket URL of the server
        #[arg(long)]
        url: Option<String>,
    },
    /// Accept client connections, detect utterances, and answer them
    Server {
        /// Listen address
        #[arg(long)]
        bind: Option<String>,
        /// Directory for captured utterance recordings
        #[arg(long)]
        archive_dir: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    match Cli::parse().command {
        Command::Client { url } => run_client(url).await,
        Command::Server { bind, archive_dir } => run_server(bind, archive_dir).await,
    }
}

async fn run_client(url: Option<String>) -> Result<()> {
    let mut config = ClientConfig::load().context("failed to load client configuration")?;
    if let Some(url) = url {
        config.server_url = url;
    }
    log::info!("🚀 starting voicelink client -> {}", config.server_url);

    let microphone = CpalMicrophone::new().context("failed to open microphone")?;
    log::info!("🎤 microphone ready");
    let speaker = Arc::new(CpalSpeaker::new().context("failed to open speaker")?);
    log::info!("🔊 speaker ready");

    let client = Client::new(config, speaker);
    let observer = presentation::spawn_observer(client.watch_state(), client.watch_emotion());

    tokio::select! {
        result = client.run(Box::new(microphone)) => {
            result.context("client loop failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("shutting down");
        }
    }
    observer.abort();
    Ok(())
}

async fn run_server(bind: Option<String>, archive_dir: Option<std::path::PathBuf>) -> Result<()> {
    let mut config = ServerConfig::load().context("failed to load server configuration")?;
    if let Some(bind) = bind {
        config.bind_addr = bind;
    }
    if archive_dir.is_some() {
        config.archive_dir = archive_dir;
    }
    log::info!("🚀 starting voicelink server on {}", config.bind_addr);

    let server = Server::new(config, Arc::new(SileroFactory), Arc::new(EchoPipeline))
        .context("failed to initialise server")?;

    tokio::select! {
        result = server.run() => {
            result.context("server loop failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("shutting down");
        }
    }
    Ok(())
}
