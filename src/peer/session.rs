//! The per-peer task: owns one TCP connection, drives the handshake and the
//! message-level state machine, and reports block arrivals and
//! lifecycle changes to the coordinator over a bounded event channel.
//!
//! Mirrors the concurrency model of spec §5: the coordinator and a peer
//! session never share memory. The session holds all of its own state
//! (choke/interest flags, the peer's claimed pieces, pending requests,
//! partial piece buffers) and the coordinator holds its mirror of only the
//! slice it needs to schedule (which pieces a peer has, whether it's
//! choking us). The two halves stay in sync purely through
//! [`PeerEvent`]/[`PeerCommand`] messages.
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Instant;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::message::Message;
use super::{PeerError, PeerResult};
use crate::config::{COMMAND_QUEUE_DEPTH, HANDSHAKE_TIMEOUT};

/// Size in bytes of piece `index`, given the torrent's uniform piece length
/// and total length; the last piece is whatever remainder is left over.
/// Mirrors `TorrentFile::piece_size`, duplicated here so a session doesn't
/// need a `TorrentFile` to assemble correctly.
fn expected_piece_size(index: u32, num_pieces: usize, piece_length: u32, total_length: u64) -> usize {
    if num_pieces == 0 || index as usize >= num_pieces {
        return 0;
    }
    if index as usize + 1 < num_pieces {
        piece_length as usize
    } else {
        (total_length - piece_length as u64 * (num_pieces - 1) as u64) as usize
    }
}

/// Commands the coordinator issues to a session over its command channel.
#[derive(Debug, Clone)]
pub enum PeerCommand {
    RequestBlock { index: u32, begin: u32, length: u32 },
    Close,
}

/// Events a session emits to the coordinator over the shared event queue.
/// Events from one session are always delivered in the order that session
/// emitted them; there is no ordering guarantee between different sessions.
#[derive(Debug)]
pub enum PeerEvent {
    Connected { endpoint: String },
    Closed { endpoint: String },
    /// New pieces the peer has claimed, via `bitfield` or `have`.
    PiecesAvailable { endpoint: String, indices: Vec<u32> },
    /// The peer choked us: every block this session had pending is forfeit.
    Choked { endpoint: String },
    Unchoked { endpoint: String },
    PieceAssembled { endpoint: String, index: u32, data: Vec<u8> },
}

/// A handle the coordinator holds for a running session: its endpoint and a
/// sender half of its command channel. The session task itself runs
/// detached; its lifetime is tracked only through [`PeerEvent::Closed`].
#[derive(Debug, Clone)]
pub struct PeerSession {
    endpoint: String,
    commands: mpsc::Sender<PeerCommand>,
}

impl PeerSession {
    /// Spawns a new session task connecting to `addr`, and returns a handle
    /// to it immediately; connection and handshake happen in the background.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        addr: SocketAddr,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
        num_pieces: usize,
        piece_length: u32,
        total_length: u64,
        events: mpsc::Sender<PeerEvent>,
    ) -> Self {
        let endpoint = addr.to_string();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);

        tokio::spawn(run_session(
            addr,
            info_hash,
            peer_id,
            num_pieces,
            piece_length,
            total_length,
            events,
            commands_rx,
        ));

        Self { endpoint, commands: commands_tx }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Best-effort send: if the session has already closed, its command
    /// channel receiver is gone and the command is simply dropped.
    pub async fn send(&self, command: PeerCommand) {
        let _ = self.commands.send(command).await;
    }
}

struct SessionState {
    num_pieces: usize,
    piece_length: u32,
    total_length: u64,
    /// Whether we are choking the peer. We never serve uploads, so this is
    /// set once and never consulted — kept because the spec's session state
    /// names it as one of the four handshake-adjacent booleans.
    #[allow(dead_code)]
    am_choking: bool,
    /// Set once after the initial `interested` send; never toggled back or
    /// read since this session never cancels its own interest.
    #[allow(dead_code)]
    am_interested: bool,
    peer_choking: bool,
    /// Whether the peer is interested in us. Same story as `am_choking`:
    /// tracked because the peer sends it, never read because we never serve
    /// uploads.
    #[allow(dead_code)]
    peer_interested: bool,
    peer_pieces: HashSet<u32>,
    pending_requests: HashMap<(u32, u32), Instant>,
    partial_pieces: HashMap<u32, HashMap<u32, Vec<u8>>>,
}

impl SessionState {
    fn new(num_pieces: usize, piece_length: u32, total_length: u64) -> Self {
        Self {
            num_pieces,
            piece_length,
            total_length,
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
            peer_pieces: HashSet::new(),
            pending_requests: HashMap::new(),
            partial_pieces: HashMap::new(),
        }
    }

    fn expected_piece_size(&self, index: u32) -> usize {
        expected_piece_size(index, self.num_pieces, self.piece_length, self.total_length)
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_session(
    addr: SocketAddr,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    num_pieces: usize,
    piece_length: u32,
    total_length: u64,
    events: mpsc::Sender<PeerEvent>,
    commands: mpsc::Receiver<PeerCommand>,
) {
    let endpoint = addr.to_string();
    if let Err(error) = run(
        addr,
        info_hash,
        peer_id,
        num_pieces,
        piece_length,
        total_length,
        &events,
        commands,
        &endpoint,
    )
    .await
    {
        tracing::warn!(%endpoint, %error, "peer session ended");
    }
    let _ = events.send(PeerEvent::Closed { endpoint }).await;
}

#[allow(clippy::too_many_arguments)]
async fn run(
    addr: SocketAddr,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    num_pieces: usize,
    piece_length: u32,
    total_length: u64,
    events: &mpsc::Sender<PeerEvent>,
    mut commands: mpsc::Receiver<PeerCommand>,
    endpoint: &str,
) -> PeerResult<()> {
    let mut stream = timeout(HANDSHAKE_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| PeerError::HandshakeTimeout)??;

    super::handshake::perform(&mut stream, info_hash, peer_id).await?;
    let _ = events.send(PeerEvent::Connected { endpoint: endpoint.to_string() }).await;

    let mut state = SessionState::new(num_pieces, piece_length, total_length);
    Message::Interested.write(&mut stream).await?;
    state.am_interested = true;

    loop {
        tokio::select! {
            frame = Message::read(&mut stream) => {
                let message = frame?;
                handle_message(message, &mut state, events, endpoint).await;
            }
            command = commands.recv() => {
                match command {
                    Some(PeerCommand::RequestBlock { index, begin, length }) => {
                        request_block(&mut stream, &mut state, index, begin, length).await?;
                    }
                    Some(PeerCommand::Close) | None => return Ok(()),
                }
            }
        }
    }
}

async fn request_block(
    stream: &mut TcpStream,
    state: &mut SessionState,
    index: u32,
    begin: u32,
    length: u32,
) -> PeerResult<()> {
    if state.peer_choking {
        tracing::debug!(index, begin, "dropping request to a choking peer");
        return Ok(());
    }
    Message::Request { index, begin, length }.write(stream).await?;
    state.pending_requests.insert((index, begin), Instant::now());
    Ok(())
}

async fn handle_message(
    message: Message,
    state: &mut SessionState,
    events: &mpsc::Sender<PeerEvent>,
    endpoint: &str,
) {
    match message {
        Message::KeepAlive => {}
        Message::Choke => {
            state.peer_choking = true;
            state.pending_requests.clear();
            let _ = events.send(PeerEvent::Choked { endpoint: endpoint.to_string() }).await;
        }
        Message::Unchoke => {
            state.peer_choking = false;
            let _ = events.send(PeerEvent::Unchoked { endpoint: endpoint.to_string() }).await;
        }
        Message::Interested => state.peer_interested = true,
        Message::NotInterested => state.peer_interested = false,
        Message::Have { index } => {
            if (index as usize) < state.num_pieces && state.peer_pieces.insert(index) {
                let _ = events
                    .send(PeerEvent::PiecesAvailable { endpoint: endpoint.to_string(), indices: vec![index] })
                    .await;
            }
        }
        Message::Bitfield(bits) => {
            let mut newly_available = Vec::new();
            for (byte_index, byte) in bits.iter().enumerate() {
                for bit_index in 0..8u32 {
                    let piece_index = byte_index as u32 * 8 + bit_index;
                    if piece_index as usize >= state.num_pieces {
                        break;
                    }
                    if byte & (0x80 >> bit_index) != 0 && state.peer_pieces.insert(piece_index) {
                        newly_available.push(piece_index);
                    }
                }
            }
            if !newly_available.is_empty() {
                let _ = events
                    .send(PeerEvent::PiecesAvailable { endpoint: endpoint.to_string(), indices: newly_available })
                    .await;
            }
        }
        Message::Request { .. } => {
            // Serving uploads is out of scope; requests are acknowledged by
            // being parsed (so framing stays in sync) and otherwise ignored.
        }
        Message::Cancel { index, begin, .. } => {
            state.pending_requests.remove(&(index, begin));
        }
        Message::Piece { index, begin, block } => {
            on_piece(state, events, endpoint, index, begin, block).await;
        }
        Message::Unknown(_) => {}
    }
}

async fn on_piece(
    state: &mut SessionState,
    events: &mpsc::Sender<PeerEvent>,
    endpoint: &str,
    index: u32,
    begin: u32,
    block: Vec<u8>,
) {
    if state.pending_requests.remove(&(index, begin)).is_none() {
        // Unsolicited or already-forfeited block: discard silently.
        return;
    }

    let buffered = state.partial_pieces.entry(index).or_default();
    buffered.insert(begin, block);

    let received: usize = buffered.values().map(Vec::len).sum();
    let expected = state.expected_piece_size(index);

    // Assemble strictly once every expected byte is in hand. Counting
    // outstanding `pending_requests` instead would be wrong: `dispatch_pieces`
    // sends one `RequestBlock` command per block, and this task's
    // `tokio::select!` loop can read a `Piece` reply for an earlier block
    // before it has even drained the command for a later one, making
    // `pending_requests` look momentarily empty for this index.
    if received == expected {
        if let Some(pieces) = state.partial_pieces.remove(&index) {
            let mut offsets: Vec<u32> = pieces.keys().copied().collect();
            offsets.sort_unstable();
            let mut data = Vec::with_capacity(received);
            for offset in offsets {
                data.extend_from_slice(&pieces[&offset]);
            }
            let _ = events
                .send(PeerEvent::PieceAssembled { endpoint: endpoint.to_string(), index, data })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn piece_message_for_unknown_request_is_discarded() {
        let mut state = SessionState::new(4, 4, 16);
        let (events_tx, mut events_rx) = mpsc::channel(8);
        on_piece(&mut state, &events_tx, "1.2.3.4:6881", 0, 0, vec![1, 2, 3]).await;
        drop(events_tx);
        assert!(events_rx.recv().await.is_none());
        assert!(state.partial_pieces.is_empty());
    }

    #[tokio::test]
    async fn piece_assembles_once_all_blocks_arrive() {
        let mut state = SessionState::new(1, 6, 6);
        state.pending_requests.insert((0, 0), Instant::now());
        state.pending_requests.insert((0, 4), Instant::now());
        let (events_tx, mut events_rx) = mpsc::channel(8);

        on_piece(&mut state, &events_tx, "peer", 0, 4, vec![5, 6]).await;
        assert!(events_rx.try_recv().is_err());

        on_piece(&mut state, &events_tx, "peer", 0, 0, vec![1, 2, 3, 4]).await;
        match events_rx.recv().await {
            Some(PeerEvent::PieceAssembled { index, data, .. }) => {
                assert_eq!(index, 0);
                assert_eq!(data, vec![1, 2, 3, 4, 5, 6]);
            }
            other => panic!("expected PieceAssembled, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn partial_block_does_not_assemble_even_when_its_own_sibling_request_is_not_yet_pending() {
        // Mirrors the real race: `dispatch_pieces` sends one `RequestBlock`
        // command per block of a multi-block piece, and this task's
        // `select!` loop can read the first block's `Piece` reply before
        // it has drained the command for the second block, so
        // `pending_requests` holds no entries for this index even though
        // the piece is only half buffered.
        let mut state = SessionState::new(1, 8, 8);
        state.pending_requests.insert((0, 0), Instant::now());
        let (events_tx, mut events_rx) = mpsc::channel(8);

        on_piece(&mut state, &events_tx, "peer", 0, 0, vec![1, 2, 3, 4]).await;
        assert!(events_rx.try_recv().is_err(), "must wait for the full piece size, not an empty pending set");
        assert_eq!(state.partial_pieces[&0].len(), 1);

        state.pending_requests.insert((0, 4), Instant::now());
        on_piece(&mut state, &events_tx, "peer", 0, 4, vec![5, 6, 7, 8]).await;
        match events_rx.recv().await {
            Some(PeerEvent::PieceAssembled { index, data, .. }) => {
                assert_eq!(index, 0);
                assert_eq!(data, vec![1, 2, 3, 4, 5, 6, 7, 8]);
            }
            other => panic!("expected PieceAssembled, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn choke_clears_pending_requests() {
        let mut state = SessionState::new(1, 4, 4);
        state.pending_requests.insert((0, 0), Instant::now());
        let (events_tx, mut events_rx) = mpsc::channel(8);

        handle_message(Message::Choke, &mut state, &events_tx, "peer").await;
        assert!(state.peer_choking);
        assert!(state.pending_requests.is_empty());
        assert!(matches!(events_rx.recv().await, Some(PeerEvent::Choked { .. })));
    }

    #[tokio::test]
    async fn bitfield_reports_only_pieces_within_range() {
        let mut state = SessionState::new(10, 4, 40);
        let (events_tx, mut events_rx) = mpsc::channel(8);

        // bits: 11111111 11000000 -> pieces 0..=7 and 8,9 (10,11 out of range, dropped)
        handle_message(Message::Bitfield(vec![0b1111_1111, 0b1100_0000]), &mut state, &events_tx, "peer").await;

        assert_eq!(state.peer_pieces.len(), 10);
        match events_rx.recv().await {
            Some(PeerEvent::PiecesAvailable { indices, .. }) => assert_eq!(indices.len(), 10),
            other => panic!("expected PiecesAvailable, got {other:?}"),
        }
    }

    #[test]
    fn expected_piece_size_shortens_only_the_last_piece() {
        // 9 bytes across 3 pieces of length 4: 4, 4, 1.
        assert_eq!(expected_piece_size(0, 3, 4, 9), 4);
        assert_eq!(expected_piece_size(1, 3, 4, 9), 4);
        assert_eq!(expected_piece_size(2, 3, 4, 9), 1);
    }
}
