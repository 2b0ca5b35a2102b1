//! This module implements the BitTorrent peer handshake protocol.
//!
//! The handshake is the first message exchanged between two peers. It verifies
//! that both peers are participating in the same torrent (via info_hash) and
//! establishes basic protocol compatibility.
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::instrument;

use super::{PeerError, PeerResult};
use crate::config::HANDSHAKE_TIMEOUT;

const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

/// A BitTorrent handshake message, as defined by BEP 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub reserved: [u8; 8],
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { reserved: [0u8; 8], info_hash, peer_id }
    }

    /// Serializes the handshake into the 68-byte wire form:
    /// `0x13 | "BitTorrent protocol" | 8×reserved | info_hash(20) | peer_id(20)`.
    pub fn serialize(&self) -> [u8; 68] {
        let mut buf = [0u8; 68];
        buf[0] = PROTOCOL.len() as u8;
        buf[1..20].copy_from_slice(PROTOCOL);
        buf[20..28].copy_from_slice(&self.reserved);
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Parses a 68-byte handshake buffer without validating its info-hash.
    fn parse(buf: &[u8; 68]) -> PeerResult<Self> {
        if buf[0] as usize != PROTOCOL.len() || &buf[1..20] != PROTOCOL.as_slice() {
            return Err(PeerError::InvalidProtocol);
        }
        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&buf[20..28]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);
        Ok(Self { reserved, info_hash, peer_id })
    }

    /// Reads exactly 68 bytes from `stream` and parses them as a handshake.
    #[instrument(level = "trace", skip(stream))]
    async fn read(stream: &mut TcpStream) -> PeerResult<Self> {
        let mut buf = [0u8; 68];
        stream.read_exact(&mut buf).await?;
        Self::parse(&buf)
    }

    /// Validates that this handshake's info-hash matches the torrent we're downloading.
    pub fn validate(&self, expected_info_hash: [u8; 20]) -> PeerResult<()> {
        if self.info_hash != expected_info_hash {
            return Err(PeerError::InfoHashMismatch);
        }
        Ok(())
    }
}

/// Performs the full handshake exchange over an already-connected socket:
/// send ours, read theirs, validate the info-hash — all within the 10s
/// handshake deadline from spec §4.3/§5. A timeout, short read, or
/// info-hash mismatch all surface as the handshake failing; the caller
/// closes the connection in every case.
#[instrument(level = "debug", skip(stream))]
pub async fn perform(
    stream: &mut TcpStream,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
) -> PeerResult<Handshake> {
    timeout(HANDSHAKE_TIMEOUT, perform_inner(stream, info_hash, peer_id))
        .await
        .map_err(|_| PeerError::HandshakeTimeout)?
}

async fn perform_inner(
    stream: &mut TcpStream,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
) -> PeerResult<Handshake> {
    let ours = Handshake::new(info_hash, peer_id);
    stream.write_all(&ours.serialize()).await?;

    let theirs = Handshake::read(stream).await?;
    theirs.validate(info_hash)?;
    Ok(theirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn serialize_round_trips_through_parse() {
        let info_hash = [7u8; 20];
        let peer_id = [9u8; 20];
        let hs = Handshake::new(info_hash, peer_id);
        let bytes = hs.serialize();
        let parsed = Handshake::parse(&bytes).unwrap();
        assert_eq!(parsed, hs);
    }

    #[test]
    fn rejects_wrong_protocol_string() {
        let mut bytes = Handshake::new([0u8; 20], [0u8; 20]).serialize();
        bytes[1] = b'x';
        assert!(Handshake::parse(&bytes).is_err());
    }

    #[tokio::test]
    async fn handshake_succeeds_when_info_hashes_match() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let info_hash = [3u8; 20];

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 68];
            tokio::io::AsyncReadExt::read_exact(&mut socket, &mut buf).await.unwrap();
            let reply = Handshake::new(info_hash, [2u8; 20]).serialize();
            tokio::io::AsyncWriteExt::write_all(&mut socket, &reply).await.unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let result = perform(&mut client, info_hash, [1u8; 20]).await;
        server.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn handshake_fails_on_info_hash_mismatch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 68];
            tokio::io::AsyncReadExt::read_exact(&mut socket, &mut buf).await.unwrap();
            let reply = Handshake::new([99u8; 20], [2u8; 20]).serialize();
            tokio::io::AsyncWriteExt::write_all(&mut socket, &reply).await.unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let result = perform(&mut client, [3u8; 20], [1u8; 20]).await;
        server.await.unwrap();
        assert!(matches!(result, Err(PeerError::InfoHashMismatch)));
    }
}
