//! Length-prefixed framing for text frames over a byte stream

use crate::NetworkError;
use bytes::{Buf, BufMut, BytesMut};

/// Default upper bound on a single frame's payload
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// One unit read off the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    /// Zero-length frame, the peer is closing cleanly
    Close,
}

/// Frames are a 4-byte big-endian length followed by UTF-8 JSON text
#[derive(Debug, Clone, Copy)]
pub struct FramedCodec {
    max_frame_len: usize,
}

impl Default for FramedCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FramedCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    /// Encode a text frame with length prefix
    pub fn encode(&self, frame: &str, buf: &mut BytesMut) -> Result<(), NetworkError> {
        if frame.is_empty() {
            return Err(NetworkError::ProtocolError("Empty frame".to_string()));
        }
        if frame.len() > self.max_frame_len {
            return Err(NetworkError::ProtocolError(format!(
                "Frame of {} bytes exceeds limit of {}",
                frame.len(),
                self.max_frame_len
            )));
        }

        buf.reserve(4 + frame.len());
        buf.put_u32(frame.len() as u32);
        buf.extend_from_slice(frame.as_bytes());
        Ok(())
    }

    /// Encode the zero-length close marker
    pub fn encode_close(buf: &mut BytesMut) {
        buf.put_u32(0);
    }

    /// Decode a frame from buffer
    /// Returns Some(frame) if a complete frame is available, None if more data needed
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<WireFrame>, NetworkError> {
        if buf.len() < 4 {
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&buf[..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        // Reject before buffering the payload
        if length > self.max_frame_len {
            return Err(NetworkError::ProtocolError(format!(
                "Frame of {length} bytes exceeds limit of {}",
                self.max_frame_len
            )));
        }

        if buf.len() < 4 + length {
            return Ok(None);
        }

        buf.advance(4);
        if length == 0 {
            return Ok(Some(WireFrame::Close));
        }

        let payload = buf.split_to(length);
        String::from_utf8(payload.to_vec())
            .map(|text| Some(WireFrame::Text(text)))
            .map_err(|_| NetworkError::ProtocolError("Frame is not valid UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_text() {
        let codec = FramedCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(r#"{"n":"tick"}"#, &mut buf).unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 12]);

        let frame = codec.decode(&mut buf).unwrap();
        assert_eq!(frame, Some(WireFrame::Text(r#"{"n":"tick"}"#.to_string())));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_close_marker() {
        let codec = FramedCodec::default();
        let mut buf = BytesMut::new();
        FramedCodec::encode_close(&mut buf);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(WireFrame::Close));
    }

    #[test]
    fn test_frame_limit_both_directions() {
        let codec = FramedCodec::new(8);
        let mut buf = BytesMut::new();
        assert!(codec.encode("0123456789", &mut buf).is_err());
        assert!(buf.is_empty());

        // Only the header has arrived, the length alone is enough to reject
        let mut buf = BytesMut::new();
        buf.put_u32(9);
        assert!(matches!(codec.decode(&mut buf), Err(NetworkError::ProtocolError(_))));
    }

    #[test]
    fn test_empty_text_is_not_encodable() {
        let codec = FramedCodec::default();
        let mut buf = BytesMut::new();
        assert!(codec.encode("", &mut buf).is_err());
    }
}
