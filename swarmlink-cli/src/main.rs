//! Command-line client for a running `swarmlink-daemon`, grounded on
//! `nyx_cli::main`'s `Cli`/`Commands` dispatch shape: `clap` derive macros
//! describe the surface, `main` matches on the parsed subcommand and calls
//! one `cmd_*` function per command.

mod client;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use client::{require_completed, DaemonClient, DownloadState};
use std::time::Duration;

#[derive(Parser, Clone, Debug)]
#[command(author, version, about = "Control a swarmlink-daemon over its HTTP API", long_about = None)]
pub struct Cli {
    /// Base URL of the daemon's HTTP control surface.
    #[arg(long, global = true, default_value = "http://127.0.0.1:9911")]
    pub endpoint: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Show the daemon's identity.
    Status,
    /// List known peers for a content id.
    Peers(PeersCmd),
    /// Register a local file for serving and announce it to discovery.
    Serve(ServeCmd),
    /// Download content and wait for it to finish.
    Get(GetCmd),
}

#[derive(Args, Clone, Debug)]
pub struct PeersCmd {
    pub content_id: String,
}

#[derive(Args, Clone, Debug)]
pub struct ServeCmd {
    pub content_id: String,
    pub path: String,
    #[arg(long, default_value_t = 9910)]
    pub port: u16,
}

#[derive(Args, Clone, Debug)]
pub struct GetCmd {
    pub content_id: String,
    pub digest: String,
    pub output_path: String,
    #[arg(long, default_value_t = 8)]
    pub max_peers: usize,
    #[arg(long, default_value_t = 500)]
    pub poll_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let client = DaemonClient::new(&cli.endpoint);

    match &cli.command {
        Commands::Status => cmd_status(&client).await,
        Commands::Peers(cmd) => cmd_peers(&client, cmd).await,
        Commands::Serve(cmd) => cmd_serve(&client, cmd).await,
        Commands::Get(cmd) => cmd_get(&client, cmd).await,
    }
}

async fn cmd_status(client: &DaemonClient) -> Result<()> {
    let status = client.status().await?;
    println!("peer id: {}", status.peer_id);
    Ok(())
}

async fn cmd_peers(client: &DaemonClient, cmd: &PeersCmd) -> Result<()> {
    let peers = client.peers(&cmd.content_id).await?;
    if peers.peers.is_empty() {
        println!("no known peers for {}", cmd.content_id);
    }
    for peer in peers.peers {
        println!("{peer}");
    }
    Ok(())
}

async fn cmd_serve(client: &DaemonClient, cmd: &ServeCmd) -> Result<()> {
    let resp = client.register_content(&cmd.content_id, &cmd.path, cmd.port).await?;
    println!("registered {} with digest {}", cmd.content_id, resp.digest);
    Ok(())
}

async fn cmd_get(client: &DaemonClient, cmd: &GetCmd) -> Result<()> {
    let started = client.start_download(&cmd.content_id, &cmd.digest, &cmd.output_path, cmd.max_peers).await?;
    println!("download started: {}", started.download_id);

    loop {
        let status = client.download_status(&started.download_id).await?;
        println!("{}/{} chunks", status.received_chunks, status.total_chunks);
        match status.state {
            DownloadState::Completed => {
                println!("completed, {} bytes", status.total_bytes);
                return Ok(());
            }
            DownloadState::Failed => return require_completed(&status),
            DownloadState::Running => {
                tokio::time::sleep(Duration::from_millis(cmd.poll_interval_ms)).await;
            }
        }
    }
}
