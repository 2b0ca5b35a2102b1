//! The coordinator: the single task that owns every piece of mutable shared
//! state (the piece table, the session pool, transfer counters) for one
//! download. Peer sessions and the tracker client never touch this state
//! directly — they only ever send it events, per spec §5's single-writer
//! model.
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::config;
use crate::peer::{PeerCommand, PeerEvent, PeerSession};
use crate::storage::{Storage, StorageError};
use crate::torrent::TorrentFile;
use crate::tracker::{self, AnnounceEvent};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("could not start tracker client: {0}")]
    Tracker(String),
}

pub type CoordinatorResult<T> = std::result::Result<T, CoordinatorError>;

#[derive(Debug, Clone)]
enum PieceState {
    Missing,
    InFlight { session: String, deadline: Instant },
    Complete,
}

struct SessionEntry {
    handle: PeerSession,
    peer_pieces: HashSet<u32>,
    choking: bool,
    /// Piece indices this coordinator currently considers in flight on this
    /// session. Doubles as the load metric for piece-selection tie-breaking.
    assigned: HashSet<u32>,
}

/// A point-in-time view of download progress, published on every state
/// change so the CLI driver can poll it without touching coordinator state.
#[derive(Debug, Clone, Copy)]
pub struct ProgressSnapshot {
    pub percent: f64,
    pub peers: usize,
}

pub struct Coordinator {
    torrent: TorrentFile,
    peer_id: [u8; 20],
    tracker: tracker::Client,
    storage: Storage,
    pieces: Vec<PieceState>,
    sessions: HashMap<String, SessionEntry>,
    events_tx: mpsc::Sender<PeerEvent>,
    events_rx: mpsc::Receiver<PeerEvent>,
    progress_tx: watch::Sender<ProgressSnapshot>,
    uploaded: u64,
    downloaded: u64,
    completed_pieces: usize,
}

impl Coordinator {
    /// Builds a coordinator for `torrent`, opening its output file eagerly.
    /// Returns a [`watch::Receiver`] the caller can poll independently of
    /// [`Coordinator::run`], which consumes `self`.
    pub fn new(
        torrent: TorrentFile,
        peer_id: [u8; 20],
        port: u16,
    ) -> CoordinatorResult<(Self, watch::Receiver<ProgressSnapshot>)> {
        let output_path = torrent.info.name.clone();
        Self::with_output_path(torrent, peer_id, port, output_path)
    }

    fn with_output_path(
        torrent: TorrentFile,
        peer_id: [u8; 20],
        port: u16,
        output_path: impl AsRef<std::path::Path>,
    ) -> CoordinatorResult<(Self, watch::Receiver<ProgressSnapshot>)> {
        let tracker = tracker::Client::new(peer_id, port)
            .map_err(|error| CoordinatorError::Tracker(error.to_string()))?;
        let storage =
            Storage::create(output_path, torrent.total_length() as u64, torrent.info.piece_length as u64)?;
        let pieces = vec![PieceState::Missing; torrent.num_pieces()];
        let (events_tx, events_rx) = mpsc::channel(config::EVENT_QUEUE_DEPTH);
        let (progress_tx, progress_rx) = watch::channel(ProgressSnapshot { percent: 0.0, peers: 0 });

        let coordinator = Self {
            torrent,
            peer_id,
            tracker,
            storage,
            pieces,
            sessions: HashMap::new(),
            events_tx,
            events_rx,
            progress_tx,
            uploaded: 0,
            downloaded: 0,
            completed_pieces: 0,
        };
        Ok((coordinator, progress_rx))
    }

    /// Drives the download to completion, or until Ctrl-C is observed.
    /// Always sends a best-effort `stopped` announce on the way out.
    pub async fn run(mut self) -> CoordinatorResult<()> {
        let interval = self.announce(AnnounceEvent::Started).await;
        let mut tracker_deadline = Instant::now() + interval;
        let mut tick = tokio::time::interval(config::TICK_INTERVAL);
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        while self.completed_pieces < self.pieces.len() {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested, closing peer sessions");
                    break;
                }
                _ = tick.tick() => {
                    self.check_staleness();
                    self.dispatch_pieces().await;
                }
                _ = tokio::time::sleep_until(tracker_deadline) => {
                    let interval = self.announce(AnnounceEvent::Empty).await;
                    tracker_deadline = Instant::now() + interval;
                }
                event = self.events_rx.recv() => {
                    if let Some(event) = event {
                        self.handle_event(event).await;
                    }
                }
            }
        }

        if self.completed_pieces == self.pieces.len() {
            tracing::info!("download complete");
            self.announce(AnnounceEvent::Completed).await;
        }
        self.announce(AnnounceEvent::Stopped).await;
        Ok(())
    }

    async fn announce(&mut self, event: AnnounceEvent) -> std::time::Duration {
        let left = (self.torrent.total_length() as u64).saturating_sub(self.downloaded);
        let response = self
            .tracker
            .announce(&self.torrent.announce, self.torrent.info_hash, self.uploaded, self.downloaded, left, event)
            .await;

        self.connect_new_peers(response.peers);
        response.interval.min(config::MAX_ANNOUNCE_INTERVAL)
    }

    fn connect_new_peers(&mut self, peers: Vec<tracker::Peer>) {
        for peer in peers {
            if self.sessions.len() >= config::MAX_PEERS {
                break;
            }
            let endpoint = peer.endpoint();
            if self.sessions.contains_key(&endpoint) {
                continue;
            }
            let addr = SocketAddr::new(peer.ip, peer.port);
            let handle = PeerSession::spawn(
                addr,
                self.torrent.info_hash,
                self.peer_id,
                self.pieces.len(),
                self.torrent.info.piece_length as u32,
                self.torrent.total_length() as u64,
                self.events_tx.clone(),
            );
            self.sessions.insert(
                endpoint,
                SessionEntry { handle, peer_pieces: HashSet::new(), choking: true, assigned: HashSet::new() },
            );
        }
        self.publish_progress();
    }

    async fn handle_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Connected { endpoint } => {
                tracing::info!(%endpoint, "peer connected");
            }
            PeerEvent::Closed { endpoint } => {
                self.forfeit_session_pieces(&endpoint);
                self.sessions.remove(&endpoint);
                tracing::info!(%endpoint, "peer session closed");
                self.publish_progress();
            }
            PeerEvent::PiecesAvailable { endpoint, indices } => {
                if let Some(entry) = self.sessions.get_mut(&endpoint) {
                    entry.peer_pieces.extend(indices);
                }
            }
            PeerEvent::Choked { endpoint } => {
                self.forfeit_session_pieces(&endpoint);
                if let Some(entry) = self.sessions.get_mut(&endpoint) {
                    entry.choking = true;
                }
            }
            PeerEvent::Unchoked { endpoint } => {
                if let Some(entry) = self.sessions.get_mut(&endpoint) {
                    entry.choking = false;
                }
            }
            PeerEvent::PieceAssembled { endpoint, index, data } => {
                self.on_piece_assembled(&endpoint, index, data).await;
            }
        }
    }

    /// Returns every piece this session had in flight to `Missing`, e.g. on
    /// choke or session close. Discards any partially buffered bytes: the
    /// next session to pick up the piece starts the blocks over from zero.
    fn forfeit_session_pieces(&mut self, endpoint: &str) {
        if let Some(entry) = self.sessions.get_mut(endpoint) {
            for index in entry.assigned.drain() {
                if let Some(state @ PieceState::InFlight { .. }) = self.pieces.get_mut(index as usize) {
                    *state = PieceState::Missing;
                }
            }
        }
    }

    async fn on_piece_assembled(&mut self, endpoint: &str, index: u32, data: Vec<u8>) {
        if let Some(entry) = self.sessions.get_mut(endpoint) {
            entry.assigned.remove(&index);
        }

        let Some(state) = self.pieces.get(index as usize) else {
            tracing::warn!(index, "piece index out of range, discarding");
            return;
        };
        if matches!(state, PieceState::Complete) {
            return;
        }

        let Some(expected) = self.torrent.pieces_hash.get(index as usize) else {
            return;
        };

        let mut hasher = Sha1::new();
        hasher.update(&data);
        let digest = hasher.finalize();

        if &digest[..] != expected.as_slice() {
            tracing::warn!(index, %endpoint, "piece hash mismatch, returning to missing");
            self.pieces[index as usize] = PieceState::Missing;
            return;
        }

        if let Err(error) = self.storage.commit(index, &data) {
            tracing::error!(index, %error, "failed to commit piece to disk");
            self.pieces[index as usize] = PieceState::Missing;
            return;
        }

        self.pieces[index as usize] = PieceState::Complete;
        self.completed_pieces += 1;
        self.downloaded += data.len() as u64;
        tracing::info!(index, completed = self.completed_pieces, total = self.pieces.len(), "piece committed");
        self.publish_progress();
    }

    /// Piece-selection tick: for every `Missing` piece, pick the
    /// least-loaded eligible session (unchoked, claims the piece) and
    /// dispatch block requests across it.
    async fn dispatch_pieces(&mut self) {
        for index in 0..self.pieces.len() as u32 {
            if !matches!(self.pieces[index as usize], PieceState::Missing) {
                continue;
            }
            let Some(endpoint) = self.pick_session_for(index) else { continue };

            let piece_size = self.torrent.piece_size(index as usize) as u32;
            let deadline = Instant::now() + config::REQUEST_STALENESS;
            self.pieces[index as usize] = PieceState::InFlight { session: endpoint.clone(), deadline };

            let handle = {
                let entry = self.sessions.get_mut(&endpoint).expect("endpoint came from the session map");
                entry.assigned.insert(index);
                entry.handle.clone()
            };

            let mut begin = 0u32;
            while begin < piece_size {
                let length = std::cmp::min(config::BLOCK_SIZE as u32, piece_size - begin);
                handle.send(PeerCommand::RequestBlock { index, begin, length }).await;
                begin += length;
            }
        }
    }

    /// Eligible: unchoked, handshaken (it's in the session map at all), and
    /// claims the piece. Least loaded, ties broken by endpoint string.
    fn pick_session_for(&self, index: u32) -> Option<String> {
        self.sessions
            .iter()
            .filter(|(_, entry)| !entry.choking && entry.peer_pieces.contains(&index))
            .min_by(|(endpoint_a, a), (endpoint_b, b)| {
                a.assigned.len().cmp(&b.assigned.len()).then_with(|| endpoint_a.cmp(endpoint_b))
            })
            .map(|(endpoint, _)| endpoint.clone())
    }

    /// Abandoned in-flight pieces (past their staleness deadline without
    /// completing) go back to `Missing` so the next tick can reassign them.
    fn check_staleness(&mut self) {
        let now = Instant::now();
        for (index, state) in self.pieces.iter_mut().enumerate() {
            if let PieceState::InFlight { session, deadline } = state {
                if now >= *deadline {
                    tracing::warn!(index, session = %session, "piece request stale, reassigning");
                    if let Some(entry) = self.sessions.get_mut(session.as_str()) {
                        entry.assigned.remove(&(index as u32));
                    }
                    *state = PieceState::Missing;
                }
            }
        }
    }

    fn publish_progress(&self) {
        let percent = if self.pieces.is_empty() {
            100.0
        } else {
            self.completed_pieces as f64 / self.pieces.len() as f64 * 100.0
        };
        let _ = self.progress_tx.send(ProgressSnapshot { percent, peers: self.sessions.len() });
    }
}
