//! `torrentdl`: download a single torrent from the command line.
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use torrentdl::config;
use torrentdl::coordinator::{Coordinator, CoordinatorError};
use torrentdl::peer_id;
use torrentdl::torrent::{TorrentError, TorrentFile};

/// Single-torrent BitTorrent downloading client.
#[derive(Parser, Debug)]
#[command(name = "torrentdl", about = "Single-torrent BitTorrent downloading client")]
struct Args {
    /// Path to the .torrent metainfo file to download.
    torrent_path: PathBuf,

    /// Local TCP port advertised to the tracker.
    #[arg(long, default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Raise logging verbosity from info to debug.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Error)]
enum AppError {
    #[error("failed to load torrent metainfo: {0}")]
    Torrent(#[from] TorrentError),
    #[error("failed to start coordinator: {0}")]
    Coordinator(#[from] CoordinatorError),
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "torrentdl exited with an error");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default_directive = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(args: Args) -> Result<(), AppError> {
    let torrent = TorrentFile::load(&args.torrent_path)?;
    tracing::info!(name = %torrent.info.name, pieces = torrent.num_pieces(), "loaded torrent");

    let peer_id = peer_id::generate();
    let (coordinator, mut progress) = Coordinator::new(torrent, peer_id, args.port)?;

    let progress_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config::PROGRESS_INTERVAL);
        ticker.tick().await; // first tick is immediate; don't print at t=0
        loop {
            ticker.tick().await;
            let snapshot = *progress.borrow();
            println!("Progress: {:.1}% - Peers: {}", snapshot.percent, snapshot.peers);
        }
    });

    coordinator.run().await?;
    progress_task.abort();
    Ok(())
}
