//! Tunable constants shared across the coordinator, peer sessions and tracker client.
//!
//! Centralising these here mirrors the protocol constants kept alongside the
//! handshake in `peer::handshake`, but these are cross-module so they live on
//! their own.

use std::time::Duration;

/// Size of a single requested block, per BEP 3.
pub const BLOCK_SIZE: usize = 16 * 1024;

/// Maximum number of simultaneously tracked peer sessions.
pub const MAX_PEERS: usize = 50;

/// Piece-selection tick cadence.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// TCP connect + handshake deadline.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Tracker HTTP request deadline.
pub const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound the coordinator clamps a tracker-proposed interval to.
pub const MAX_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(300);

/// Interval used when a tracker omits one, or when an announce fails outright.
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(1800);

/// Wait before retrying a failed announce.
pub const ANNOUNCE_RETRY_DELAY: Duration = Duration::from_secs(60);

/// A block request older than this is considered abandoned.
pub const REQUEST_STALENESS: Duration = Duration::from_secs(60);

/// Frame length above which a peer is in protocol violation.
pub const MAX_FRAME_LEN: u32 = 1024 * 1024;

/// Default local port advertised to the tracker.
pub const DEFAULT_PORT: u16 = 6681;

/// Depth of the event queue from peer sessions to the coordinator.
pub const EVENT_QUEUE_DEPTH: usize = 256;

/// Depth of the per-session command queue from the coordinator.
pub const COMMAND_QUEUE_DEPTH: usize = 256;

/// Cadence of the stdout progress line.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);
