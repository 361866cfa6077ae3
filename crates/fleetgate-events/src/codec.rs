//! Tokio codec for the newline-delimited JSON observer protocol.
//!
//! One JSON object per line in each direction. The decoder scans the buffer
//! for `\n`, parses the line as a [`ClientMessage`], and enforces a maximum
//! line length so a client cannot grow the buffer without bound.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::EventServerError;
use crate::messages::{ClientMessage, ServerMessage};

/// Default maximum line length in bytes (64 KB).
///
/// Observer requests are small; anything near this limit is a broken or
/// hostile client.
const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Codec pairing inbound [`ClientMessage`] lines with outbound
/// [`ServerMessage`] lines.
#[derive(Debug)]
pub struct WireCodec {
    max_line_length: usize,
}

impl WireCodec {
    pub fn new() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self { max_line_length }
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for WireCodec {
    type Item = ClientMessage;
    type Error = EventServerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(newline) = src.iter().position(|&b| b == b'\n') else {
            if src.len() > self.max_line_length {
                return Err(EventServerError::codec(format!(
                    "Line exceeds maximum length of {} bytes",
                    self.max_line_length
                )));
            }
            return Ok(None);
        };

        if newline > self.max_line_length {
            return Err(EventServerError::codec(format!(
                "Line exceeds maximum length of {} bytes",
                self.max_line_length
            )));
        }

        let line = src.split_to(newline + 1);
        let line = &line[..newline];
        // Tolerate CRLF clients
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        if line.is_empty() {
            // Blank keepalive line, skip it
            return self.decode(src);
        }

        let message = serde_json::from_slice(line)
            .map_err(|e| EventServerError::codec(format!("Invalid message: {e}")))?;
        Ok(Some(message))
    }
}

impl Encoder<ServerMessage> for WireCodec {
    type Error = EventServerError;

    fn encode(&mut self, item: ServerMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)
            .map_err(|e| EventServerError::codec(format!("Serialization failed: {e}")))?;
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_decode_single_line() {
        let mut codec = WireCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"ping\"}\n"[..]);

        let msg = codec.decode(&mut buf).unwrap();
        assert_eq!(msg, Some(ClientMessage::Ping));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_waits_for_newline() {
        let mut codec = WireCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"pi"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"ng\"}\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(ClientMessage::Ping));
    }

    #[test]
    fn test_decode_two_lines_in_one_read() {
        let mut codec = WireCodec::new();
        let mut buf =
            BytesMut::from(&b"{\"type\":\"ping\"}\n{\"type\":\"get_system_status\"}\n"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(ClientMessage::Ping));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(ClientMessage::GetSystemStatus)
        );
    }

    #[test]
    fn test_decode_crlf() {
        let mut codec = WireCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"ping\"}\r\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(ClientMessage::Ping));
    }

    #[test]
    fn test_decode_rejects_oversized_line() {
        let mut codec = WireCodec::with_max_line_length(32);
        let mut buf = BytesMut::from(vec![b'x'; 64].as_slice());

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(EventServerError::Codec(_))));
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        let mut codec = WireCodec::new();
        let mut buf = BytesMut::from(&b"not json\n"[..]);

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(EventServerError::Codec(_))));
    }

    #[test]
    fn test_encode_appends_newline() {
        let mut codec = WireCodec::new();
        let mut buf = BytesMut::new();

        codec
            .encode(ServerMessage::Pong { at: Utc::now() }, &mut buf)
            .unwrap();
        assert_eq!(buf.last(), Some(&b'\n'));
        assert_eq!(buf.iter().filter(|&&b| b == b'\n').count(), 1);
    }
}
