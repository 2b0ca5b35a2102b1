//! The post-handshake peer-wire message protocol: `u32_be length | u8 id |
//! payload`, length zero meaning keep-alive.
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{PeerError, PeerResult};
use crate::config::MAX_FRAME_LEN;

/// A single peer-wire message, per BEP 3 message ids 0-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { index: u32 },
    Bitfield(Vec<u8>),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
    /// An id outside 0-8. The frame body has already been consumed off the
    /// wire by the time this variant exists; the session simply ignores it.
    Unknown(u8),
}

impl Message {
    fn id(&self) -> Option<u8> {
        match self {
            Message::KeepAlive => None,
            Message::Choke => Some(0),
            Message::Unchoke => Some(1),
            Message::Interested => Some(2),
            Message::NotInterested => Some(3),
            Message::Have { .. } => Some(4),
            Message::Bitfield(_) => Some(5),
            Message::Request { .. } => Some(6),
            Message::Piece { .. } => Some(7),
            Message::Cancel { .. } => Some(8),
            Message::Unknown(id) => Some(*id),
        }
    }

    /// Serializes the message into its length-prefixed wire form.
    pub fn encode(&self) -> Vec<u8> {
        let Some(id) = self.id() else {
            return 0u32.to_be_bytes().to_vec();
        };

        let mut payload = Vec::new();
        match self {
            Message::Have { index } => payload.extend_from_slice(&index.to_be_bytes()),
            Message::Bitfield(bits) => payload.extend_from_slice(bits),
            Message::Request { index, begin, length } | Message::Cancel { index, begin, length } => {
                payload.extend_from_slice(&index.to_be_bytes());
                payload.extend_from_slice(&begin.to_be_bytes());
                payload.extend_from_slice(&length.to_be_bytes());
            }
            Message::Piece { index, begin, block } => {
                payload.extend_from_slice(&index.to_be_bytes());
                payload.extend_from_slice(&begin.to_be_bytes());
                payload.extend_from_slice(block);
            }
            _ => {}
        }

        let length = 1 + payload.len() as u32;
        let mut buf = Vec::with_capacity(4 + length as usize);
        buf.extend_from_slice(&length.to_be_bytes());
        buf.push(id);
        buf.extend_from_slice(&payload);
        buf
    }

    pub async fn write(&self, stream: &mut TcpStream) -> PeerResult<()> {
        stream.write_all(&self.encode()).await?;
        Ok(())
    }

    /// Reads one frame off `stream` and decodes it. A keep-alive is a frame
    /// of length 0. A frame whose length exceeds [`MAX_FRAME_LEN`] is a
    /// protocol violation.
    pub async fn read(stream: &mut TcpStream) -> PeerResult<Message> {
        let length = stream.read_u32().await?;
        if length == 0 {
            return Ok(Message::KeepAlive);
        }
        if length > MAX_FRAME_LEN {
            return Err(PeerError::ProtocolViolation(format!(
                "frame length {length} exceeds ceiling {MAX_FRAME_LEN}"
            )));
        }

        let mut buf = vec![0u8; length as usize];
        stream.read_exact(&mut buf).await?;
        Self::decode_body(&buf)
    }

    fn decode_body(buf: &[u8]) -> PeerResult<Message> {
        let id = *buf.first().ok_or_else(|| {
            PeerError::ProtocolViolation("non-keep-alive frame with empty body".to_string())
        })?;
        let payload = &buf[1..];

        let violation = |what: &str| PeerError::ProtocolViolation(what.to_string());

        Ok(match id {
            0 => Message::Choke,
            1 => Message::Unchoke,
            2 => Message::Interested,
            3 => Message::NotInterested,
            4 => {
                if payload.len() != 4 {
                    return Err(violation("have payload must be 4 bytes"));
                }
                Message::Have { index: u32::from_be_bytes(payload.try_into().unwrap()) }
            }
            5 => Message::Bitfield(payload.to_vec()),
            6 => {
                if payload.len() != 12 {
                    return Err(violation("request payload must be 12 bytes"));
                }
                Message::Request {
                    index: u32::from_be_bytes(payload[0..4].try_into().unwrap()),
                    begin: u32::from_be_bytes(payload[4..8].try_into().unwrap()),
                    length: u32::from_be_bytes(payload[8..12].try_into().unwrap()),
                }
            }
            7 => {
                if payload.len() < 8 {
                    return Err(violation("piece payload must be at least 8 bytes"));
                }
                Message::Piece {
                    index: u32::from_be_bytes(payload[0..4].try_into().unwrap()),
                    begin: u32::from_be_bytes(payload[4..8].try_into().unwrap()),
                    block: payload[8..].to_vec(),
                }
            }
            8 => {
                if payload.len() != 12 {
                    return Err(violation("cancel payload must be 12 bytes"));
                }
                Message::Cancel {
                    index: u32::from_be_bytes(payload[0..4].try_into().unwrap()),
                    begin: u32::from_be_bytes(payload[4..8].try_into().unwrap()),
                    length: u32::from_be_bytes(payload[8..12].try_into().unwrap()),
                }
            }
            other => Message::Unknown(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_alive_encodes_to_four_zero_bytes() {
        assert_eq!(Message::KeepAlive.encode(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn choke_round_trips() {
        let bytes = Message::Choke.encode();
        assert_eq!(bytes, vec![0, 0, 0, 1, 0]);
        assert_eq!(Message::decode_body(&bytes[4..]).unwrap(), Message::Choke);
    }

    #[test]
    fn have_round_trips() {
        let msg = Message::Have { index: 42 };
        let bytes = msg.encode();
        assert_eq!(Message::decode_body(&bytes[4..]).unwrap(), msg);
    }

    #[test]
    fn request_round_trips() {
        let msg = Message::Request { index: 1, begin: 16384, length: 16384 };
        let bytes = msg.encode();
        assert_eq!(Message::decode_body(&bytes[4..]).unwrap(), msg);
    }

    #[test]
    fn piece_round_trips() {
        let msg = Message::Piece { index: 0, begin: 0, block: vec![1, 2, 3, 4] };
        let bytes = msg.encode();
        assert_eq!(Message::decode_body(&bytes[4..]).unwrap(), msg);
    }

    #[test]
    fn bitfield_round_trips() {
        let msg = Message::Bitfield(vec![0b1010_0000]);
        let bytes = msg.encode();
        assert_eq!(Message::decode_body(&bytes[4..]).unwrap(), msg);
    }

    #[test]
    fn unknown_id_is_tolerated_not_rejected() {
        let body = [200u8, 1, 2, 3];
        assert_eq!(Message::decode_body(&body).unwrap(), Message::Unknown(200));
    }

    #[test]
    fn malformed_have_payload_is_a_protocol_violation() {
        assert!(Message::decode_body(&[4, 1, 2]).is_err());
    }
}
