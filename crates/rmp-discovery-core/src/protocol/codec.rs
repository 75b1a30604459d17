//! JSON wire codec.
//!
//! Datagram transports carry exactly one message per packet. Stream
//! transports (RFCOMM) carry back-to-back JSON objects with no delimiter, so
//! a single read may hold part of a message or several of them. The decoder
//! finds object boundaries and keeps the unconsumed tail for the next read.

use bytes::{Buf, BytesMut};
use serde_json::Value;

use super::message::Message;
use crate::error::CodecError;

/// Upper bound for a single buffered frame before it is discarded.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Serialize a message to its wire form.
pub fn encode(msg: &Message) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(&msg.to_value())?)
}

/// Decode the first complete message in `buf`.
///
/// Returns `Ok(None)` when `buf` holds only whitespace or an incomplete
/// object; the caller should read more and retry.
pub fn decode(buf: &[u8]) -> Result<Option<(Message, &[u8])>, CodecError> {
    match split_frame(buf) {
        Split::Incomplete => Ok(None),
        Split::Complete { len, value } => {
            let msg = Message::from_value(value)?;
            Ok(Some((msg, &buf[len..])))
        }
        Split::Invalid { error, .. } => Err(CodecError::Json(error)),
    }
}

/// Decode a datagram holding exactly one message.
pub fn decode_datagram(data: &[u8]) -> Result<Message, CodecError> {
    let end = data
        .iter()
        .rposition(|b| *b != 0 && !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    let value: Value = serde_json::from_slice(&data[..end])?;
    Message::from_value(value)
}

enum Split {
    Incomplete,
    Complete { len: usize, value: Value },
    Invalid { skip: usize, error: serde_json::Error },
}

fn split_frame(buf: &[u8]) -> Split {
    let mut stream = serde_json::Deserializer::from_slice(buf).into_iter::<Value>();
    match stream.next() {
        None => Split::Incomplete,
        Some(Ok(value)) => Split::Complete {
            len: stream.byte_offset(),
            value,
        },
        Some(Err(e)) if e.is_eof() => Split::Incomplete,
        Some(Err(error)) => Split::Invalid {
            skip: resync_offset(buf),
            error,
        },
    }
}

/// Offset of the next candidate object start after the current position.
fn resync_offset(buf: &[u8]) -> usize {
    buf.iter()
        .skip(1)
        .position(|b| *b == b'{')
        .map_or(buf.len(), |i| i + 1)
}

/// Incremental decoder for stream transports.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_len: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_len(MAX_FRAME_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
            max_len,
        }
    }

    /// Append bytes read from the transport.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes received but not yet consumed by a complete message.
    pub fn remainder(&self) -> &[u8] {
        &self.buffer
    }

    /// Pop the next message.
    ///
    /// `None` means more input is needed. An `Err` reports input that was
    /// skipped; decoding can continue with the next call.
    pub fn next_frame(&mut self) -> Option<Result<Message, CodecError>> {
        if self.buffer.is_empty() {
            return None;
        }

        match split_frame(&self.buffer) {
            Split::Incomplete => {
                if self.buffer.iter().all(u8::is_ascii_whitespace) {
                    self.buffer.clear();
                } else if self.buffer.len() > self.max_len {
                    self.buffer.clear();
                    return Some(Err(CodecError::FrameTooLarge {
                        limit: self.max_len,
                    }));
                }
                None
            }
            Split::Complete { len, value } => {
                self.buffer.advance(len);
                Some(Message::from_value(value))
            }
            Split::Invalid { skip, error } => {
                self.buffer.advance(skip);
                Some(Err(CodecError::Json(error)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{ConnType, Messages};
    use serde_json::json;

    #[test]
    fn test_decode_complete_message_with_empty_remainder() {
        let (msg, rest) = decode(br#"{"connType":"ping","ping_msg":"ping"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(msg, Messages::probe());
        assert!(rest.is_empty());
    }

    #[test]
    fn test_decode_incomplete_is_not_an_error() {
        assert!(decode(br#"{"connType":"hel"#).unwrap().is_none());
        assert!(decode(b"   ").unwrap().is_none());
        assert!(decode(b"").unwrap().is_none());
    }

    #[test]
    fn test_decode_returns_tail() {
        let input = br#"{"connType":"value"}{"connType":"ping""#;
        let (msg, rest) = decode(input).unwrap().unwrap();
        assert_eq!(msg.conn_type(), &ConnType::Value);
        assert_eq!(rest, br#"{"connType":"ping""#);
    }

    #[test]
    fn test_split_message_reassembles() {
        let mut decoder = FrameDecoder::new();

        decoder.extend(br#"{"connType":"hello","local_"#);
        assert!(decoder.next_frame().is_none());

        decoder.extend(br#"id":"s1","dev_hw_addr":"aabb","type":"t"}"#);
        let msg = decoder.next_frame().unwrap().unwrap();
        assert_eq!(msg.conn_type(), &ConnType::Hello);
        assert_eq!(msg.get_str("local_id"), Some("s1"));
        assert!(decoder.remainder().is_empty());
        assert!(decoder.next_frame().is_none());
    }

    #[test]
    fn test_multiple_messages_in_one_read() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(br#"{"connType":"ping","ping_msg":"ping"} {"connType":"keepalive","global_id":101,"timeout":30}"#);

        let first = decoder.next_frame().unwrap().unwrap();
        let second = decoder.next_frame().unwrap().unwrap();
        assert!(decoder.next_frame().is_none());

        assert_eq!(first, Messages::probe());
        assert_eq!(second, Messages::keep_alive(101, 30));
    }

    #[test]
    fn test_garbage_is_skipped() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(br#"xx{"connType":"value"}"#);

        assert!(decoder.next_frame().unwrap().is_err());
        let msg = decoder.next_frame().unwrap().unwrap();
        assert_eq!(msg.conn_type(), &ConnType::Value);
    }

    #[test]
    fn test_non_object_frame_is_rejected() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"[1,2]");

        let err = decoder.next_frame().unwrap().unwrap_err();
        assert!(matches!(err, CodecError::NotAnObject));
        assert!(decoder.remainder().is_empty());
    }

    #[test]
    fn test_oversized_frame_is_dropped() {
        let mut decoder = FrameDecoder::with_max_len(16);
        decoder.extend(br#"{"connType":"hello","local_id":"#);

        let err = decoder.next_frame().unwrap().unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge { limit: 16 }));
        assert!(decoder.remainder().is_empty());
    }

    #[test]
    fn test_decode_datagram() {
        let msg = decode_datagram(b"{\"connType\":\"conf\",\"global_id\":100}\n\0").unwrap();
        assert_eq!(msg.conn_type(), &ConnType::Conf);

        assert!(decode_datagram(b"{\"connType\":").is_err());
        assert!(decode_datagram(b"not json").is_err());
    }

    #[test]
    fn test_encode_decode_preserves_fields() {
        let msg = Messages::hello("s1", "aabbcc", Some("10.0.0.2"), "temp", Some(100), None);
        let bytes = encode(&msg).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["connType"], json!("hello"));
        assert_eq!(value["host"], json!(100));
        assert_eq!(decode_datagram(&bytes).unwrap(), msg);
    }
}
