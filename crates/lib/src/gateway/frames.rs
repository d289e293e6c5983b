//! Binary frame codec for terminal I/O multiplexing.
//!
//! A frame is a 17-byte header followed by the payload: bytes 0–15 are the
//! session UUID in canonical (big-endian) byte order, byte 16 is the stream
//! discriminator. The codec is pure; it never touches the socket. The
//! transport delivers binary messages verbatim and callers decode them here.

use thiserror::Error;
use uuid::Uuid;

/// Header size: 16 bytes of session id + 1 stream byte.
pub const FRAME_HEADER_LEN: usize = 17;

/// Which terminal stream a frame belongs to. Wire values: 0, 1, 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
    Stdin,
}

impl StreamKind {
    pub fn as_byte(self) -> u8 {
        match self {
            StreamKind::Stdout => 0,
            StreamKind::Stderr => 1,
            StreamKind::Stdin => 2,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(StreamKind::Stdout),
            1 => Some(StreamKind::Stderr),
            2 => Some(StreamKind::Stdin),
            _ => None,
        }
    }
}

/// A decoded binary frame: session, stream, raw payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryFrame {
    pub session_id: Uuid,
    pub stream: StreamKind,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: {0} bytes, need at least {FRAME_HEADER_LEN}")]
    TooShort(usize),

    #[error("unknown stream discriminator: {0}")]
    UnknownStream(u8),
}

/// Encode a frame. The payload may be empty.
pub fn encode_frame(session_id: Uuid, stream: StreamKind, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.extend_from_slice(session_id.as_bytes());
    out.push(stream.as_byte());
    out.extend_from_slice(payload);
    out
}

/// Decode a frame. Everything after the header is the payload.
pub fn decode_frame(bytes: &[u8]) -> Result<BinaryFrame, FrameError> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(FrameError::TooShort(bytes.len()));
    }
    let mut id = [0u8; 16];
    id.copy_from_slice(&bytes[..16]);
    let stream = StreamKind::from_byte(bytes[16]).ok_or(FrameError::UnknownStream(bytes[16]))?;
    Ok(BinaryFrame {
        session_id: Uuid::from_bytes(id),
        stream,
        payload: bytes[FRAME_HEADER_LEN..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_streams() {
        let session = Uuid::new_v4();
        for stream in [StreamKind::Stdout, StreamKind::Stderr, StreamKind::Stdin] {
            let payload = b"hello from the terminal";
            let encoded = encode_frame(session, stream, payload);
            let decoded = decode_frame(&encoded).expect("decode");
            assert_eq!(decoded.session_id, session);
            assert_eq!(decoded.stream, stream);
            assert_eq!(decoded.payload, payload);
        }
    }

    #[test]
    fn round_trips_empty_payload() {
        let session = Uuid::new_v4();
        let encoded = encode_frame(session, StreamKind::Stdin, &[]);
        assert_eq!(encoded.len(), FRAME_HEADER_LEN);
        let decoded = decode_frame(&encoded).expect("decode");
        assert_eq!(decoded.session_id, session);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn session_id_matches_canonical_string_form() {
        let session = Uuid::parse_str("a1b2c3d4-e5f6-7a8b-9c0d-e1f2a3b4c5d6").expect("uuid");
        let encoded = encode_frame(session, StreamKind::Stdout, b"x");
        // Header bytes are the hex pairs of the canonical string, hyphens stripped.
        assert_eq!(
            encoded[..16],
            [
                0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0xf6, 0x7a, 0x8b, 0x9c, 0x0d, 0xe1, 0xf2, 0xa3,
                0xb4, 0xc5, 0xd6
            ]
        );
        let decoded = decode_frame(&encoded).expect("decode");
        assert_eq!(
            decoded.session_id.to_string(),
            "a1b2c3d4-e5f6-7a8b-9c0d-e1f2a3b4c5d6"
        );
    }

    #[test]
    fn rejects_short_buffer() {
        assert_eq!(decode_frame(&[0u8; 16]), Err(FrameError::TooShort(16)));
        assert_eq!(decode_frame(&[]), Err(FrameError::TooShort(0)));
    }

    #[test]
    fn rejects_unknown_stream() {
        let mut bytes = vec![0u8; FRAME_HEADER_LEN];
        bytes[16] = 3;
        assert_eq!(decode_frame(&bytes), Err(FrameError::UnknownStream(3)));
    }
}
