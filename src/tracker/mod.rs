//! Tracker client logic for the BitTorrent protocol.
//!
//! This module implements the periodic HTTP exchange with a torrent's
//! tracker: announce requests and responses, peer parsing (compact and
//! non-compact), and raw-byte URL encoding of `info_hash`/`peer_id`.
//!
//! Per spec, transport failures and tracker-reported `failure reason`s never
//! propagate as an error — both collapse to an empty peer list and a default
//! retry interval, logged at `warn`. The coordinator is the one that decides
//! when to retry.
use crate::config;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// The tracker `event` parameter, as defined by BEP 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceEvent {
    Started,
    Stopped,
    Completed,
    Empty,
}

impl AnnounceEvent {
    fn as_str(self) -> &'static str {
        match self {
            AnnounceEvent::Started => "started",
            AnnounceEvent::Stopped => "stopped",
            AnnounceEvent::Completed => "completed",
            AnnounceEvent::Empty => "empty",
        }
    }
}

/// A peer endpoint returned by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Peer {
    pub ip: IpAddr,
    pub port: u16,
}

impl Peer {
    /// Canonical `"ip:port"` key used to dedupe against the session pool.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// The result of an announce: always succeeds from the caller's point of
/// view — failures are folded into an empty peer list, per spec §4.2.
#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    pub peers: Vec<Peer>,
    pub interval: Duration,
}

/// Internal error type for a single announce attempt; never leaves this module.
#[derive(Debug, Error)]
enum TrackerError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("bencode decoding error: {0}")]
    Bencode(#[from] serde_bencode::Error),
}

type TrackerResult<T> = std::result::Result<T, TrackerError>;

#[derive(Debug, Deserialize)]
struct RawAnnounceResponse {
    #[serde(rename = "failure reason")]
    failure_reason: Option<String>,
    #[serde(rename = "warning message")]
    warning_message: Option<String>,
    #[serde(default)]
    interval: Option<i64>,
    #[serde(default)]
    peers: RawPeers,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPeers {
    Compact(#[serde(with = "serde_bytes")] Vec<u8>),
    List(Vec<RawPeerDict>),
}

impl Default for RawPeers {
    fn default() -> Self {
        RawPeers::Compact(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct RawPeerDict {
    ip: String,
    port: u16,
}

fn parse_peers(raw: RawPeers) -> Vec<Peer> {
    match raw {
        RawPeers::Compact(bytes) => bytes
            .chunks_exact(6)
            .map(|chunk| {
                let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
                let port = u16::from_be_bytes([chunk[4], chunk[5]]);
                Peer { ip: IpAddr::V4(ip), port }
            })
            .collect(),
        RawPeers::List(dicts) => dicts
            .into_iter()
            .filter_map(|d| d.ip.parse::<IpAddr>().ok().map(|ip| Peer { ip, port: d.port }))
            .collect(),
    }
}

/// A client communicating with a single torrent's tracker.
pub struct Client {
    http: reqwest::Client,
    peer_id: [u8; 20],
    port: u16,
}

impl Client {
    pub fn new(peer_id: [u8; 20], port: u16) -> TrackerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config::ANNOUNCE_TIMEOUT)
            .build()?;
        Ok(Self { http, peer_id, port })
    }

    /// Issues an announce. Always returns a response — transport errors and
    /// `failure reason` responses are logged and folded into an empty peer
    /// list with the default retry interval.
    #[tracing::instrument(skip(self), fields(event = ?event))]
    pub async fn announce(
        &self,
        announce_url: &str,
        info_hash: [u8; 20],
        uploaded: u64,
        downloaded: u64,
        left: u64,
        event: AnnounceEvent,
    ) -> AnnounceResponse {
        match self
            .try_announce(announce_url, info_hash, uploaded, downloaded, left, event)
            .await
        {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(%error, "tracker announce failed, using empty peer list");
                AnnounceResponse {
                    peers: Vec::new(),
                    interval: config::DEFAULT_ANNOUNCE_INTERVAL,
                }
            }
        }
    }

    async fn try_announce(
        &self,
        announce_url: &str,
        info_hash: [u8; 20],
        uploaded: u64,
        downloaded: u64,
        left: u64,
        event: AnnounceEvent,
    ) -> TrackerResult<AnnounceResponse> {
        let url = format!(
            "{}?info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&event={}&compact=1",
            announce_url,
            url_encode(&info_hash),
            url_encode(&self.peer_id),
            self.port,
            uploaded,
            downloaded,
            left,
            event.as_str(),
        );
        tracing::debug!(%url, "making announce request to tracker");

        let response = self.http.get(&url).send().await?;
        let body = response.bytes().await?;
        Self::parse_announce_response(&body)
    }

    fn parse_announce_response(bytes: &[u8]) -> TrackerResult<AnnounceResponse> {
        let raw: RawAnnounceResponse = serde_bencode::from_bytes(bytes)?;

        if let Some(reason) = raw.failure_reason {
            tracing::warn!(%reason, "tracker reported a failure reason");
            return Ok(AnnounceResponse {
                peers: Vec::new(),
                interval: config::DEFAULT_ANNOUNCE_INTERVAL,
            });
        }
        if let Some(warning) = &raw.warning_message {
            tracing::warn!(%warning, "tracker warning");
        }

        let interval = raw
            .interval
            .filter(|i| *i > 0)
            .map(|secs| Duration::from_secs(secs as u64))
            .unwrap_or(config::DEFAULT_ANNOUNCE_INTERVAL);

        Ok(AnnounceResponse { peers: parse_peers(raw.peers), interval })
    }
}

/// URL-encodes a byte slice per RFC 3986: unreserved characters (`A-Za-z0-9-._~`)
/// pass through verbatim, every other byte becomes `%XX`. Operates on raw
/// bytes rather than a `String` so that `info_hash`/`peer_id` — which are not
/// valid UTF-8 in general — are encoded correctly.
fn url_encode(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for &byte in bytes {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_encode_passes_unreserved_bytes_through() {
        assert_eq!(url_encode(b"abcXYZ019-._~"), "abcXYZ019-._~");
    }

    #[test]
    fn url_encode_percent_escapes_everything_else() {
        assert_eq!(url_encode(b"Hello World!"), "Hello%20World%21");
    }

    #[test]
    fn url_encode_handles_raw_non_utf8_bytes() {
        let bytes = [0xffu8, 0x00, 0x20];
        assert_eq!(url_encode(&bytes), "%FF%00%20");
    }

    #[test]
    fn failure_reason_yields_empty_peers_and_default_interval() {
        let body = b"d14:failure reason5:oopse";
        let response = Client::parse_announce_response(body).unwrap();
        assert!(response.peers.is_empty());
        assert_eq!(response.interval, config::DEFAULT_ANNOUNCE_INTERVAL);
    }

    #[test]
    fn parses_compact_peer_list() {
        let mut peers_bytes = Vec::new();
        peers_bytes.extend_from_slice(&[127, 0, 0, 1]);
        peers_bytes.extend_from_slice(&6881u16.to_be_bytes());
        peers_bytes.extend_from_slice(&[10, 0, 0, 2]);
        peers_bytes.extend_from_slice(&6882u16.to_be_bytes());

        let mut body = Vec::new();
        body.extend_from_slice(b"d8:intervali900e5:peers");
        body.extend_from_slice(format!("{}:", peers_bytes.len()).as_bytes());
        body.extend_from_slice(&peers_bytes);
        body.extend_from_slice(b"e");

        let response = Client::parse_announce_response(&body).unwrap();
        assert_eq!(response.interval, Duration::from_secs(900));
        assert_eq!(response.peers.len(), 2);
        assert_eq!(response.peers[0].port, 6881);
        assert_eq!(response.peers[1].ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
    }

    #[test]
    fn missing_interval_defaults_to_1800() {
        let body = b"d5:peers0:e";
        let response = Client::parse_announce_response(body).unwrap();
        assert_eq!(response.interval, config::DEFAULT_ANNOUNCE_INTERVAL);
    }

    #[test]
    fn compact_peer_string_of_length_6n_yields_n_endpoints() {
        let n = 5;
        let peers_bytes = vec![0u8; 6 * n];
        let raw = RawPeers::Compact(peers_bytes);
        assert_eq!(parse_peers(raw).len(), n);
    }
}
