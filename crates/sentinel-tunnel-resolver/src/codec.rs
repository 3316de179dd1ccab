//! Minimal RESP (Redis serialization protocol) codec
//!
//! Only what a Sentinel client needs: commands are encoded as arrays of bulk
//! strings, and a single reply of any RESP2 type can be decoded incrementally.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Codec errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unknown reply type byte: 0x{0:02x}")]
    UnknownType(u8),

    #[error("Invalid length: {0}")]
    InvalidLength(String),

    #[error("Invalid integer: {0}")]
    InvalidInteger(String),

    #[error("Reply is not valid UTF-8")]
    InvalidUtf8,

    #[error("Reply too large: {0}")]
    TooLarge(usize),

    #[error("Missing CRLF after bulk string")]
    MissingTerminator,

    #[error("Reply nested deeper than {0} levels")]
    TooDeep(usize),
}

/// A decoded RESP reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    Simple(String),
    Error(String),
    Integer(i64),
    /// `None` is the nil bulk string (`$-1`)
    Bulk(Option<Bytes>),
    /// `None` is the nil array (`*-1`)
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Text content of a simple or (non-nil) bulk string
    pub fn as_text(&self) -> Option<String> {
        match self {
            RespValue::Simple(s) => Some(s.clone()),
            RespValue::Bulk(Some(bytes)) => String::from_utf8(bytes.to_vec()).ok(),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, RespValue::Bulk(None) | RespValue::Array(None))
    }
}

/// RESP codec
pub struct RespCodec;

impl RespCodec {
    /// Largest bulk string accepted in a reply (1MB)
    pub const MAX_BULK_SIZE: usize = 1024 * 1024;

    /// Largest array accepted in a reply
    pub const MAX_ARRAY_LEN: usize = 4096;

    /// Deepest array nesting accepted in a reply
    pub const MAX_DEPTH: usize = 8;

    /// Most bytes buffered while waiting for a single reply (2MB)
    pub const MAX_REPLY_SIZE: usize = 2 * 1024 * 1024;

    /// Encode a command as an array of bulk strings
    ///
    /// Format: `*<n>\r\n` followed by `$<len>\r\n<arg>\r\n` per argument
    pub fn encode_command(args: &[&str]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
        for arg in args {
            buf.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
            buf.extend_from_slice(arg.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        buf.freeze()
    }

    /// Decode one reply from the front of `buf`
    ///
    /// Returns Ok(Some(value)) and consumes the reply's bytes if a complete
    /// reply is buffered, Ok(None) if more data is needed (nothing consumed),
    /// Err on malformed input or once more than [`Self::MAX_REPLY_SIZE`]
    /// bytes are buffered without completing a reply
    pub fn decode(buf: &mut BytesMut) -> Result<Option<RespValue>, CodecError> {
        match parse_value(&buf[..], 0, 0)? {
            Some((value, consumed)) => {
                buf.advance(consumed);
                Ok(Some(value))
            }
            None if buf.len() > Self::MAX_REPLY_SIZE => Err(CodecError::TooLarge(buf.len())),
            None => Ok(None),
        }
    }
}

/// Find the CRLF-terminated line starting at `pos`
fn read_line(src: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rest = src.get(pos..)?;
    let end = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..end], pos + end + 2))
}

fn line_text(line: &[u8]) -> Result<String, CodecError> {
    String::from_utf8(line.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}

fn parse_length(line: &[u8]) -> Result<i64, CodecError> {
    let text = line_text(line)?;
    text.parse::<i64>()
        .map_err(|_| CodecError::InvalidLength(text))
}

fn parse_value(
    src: &[u8],
    pos: usize,
    depth: usize,
) -> Result<Option<(RespValue, usize)>, CodecError> {
    let Some(&type_byte) = src.get(pos) else {
        return Ok(None);
    };
    let Some((line, next)) = read_line(src, pos + 1) else {
        return Ok(None);
    };

    match type_byte {
        b'+' => Ok(Some((RespValue::Simple(line_text(line)?), next))),
        b'-' => Ok(Some((RespValue::Error(line_text(line)?), next))),
        b':' => {
            let text = line_text(line)?;
            let value = text
                .parse::<i64>()
                .map_err(|_| CodecError::InvalidInteger(text))?;
            Ok(Some((RespValue::Integer(value), next)))
        }
        b'$' => {
            let len = parse_length(line)?;
            if len == -1 {
                return Ok(Some((RespValue::Bulk(None), next)));
            }
            if len < 0 {
                return Err(CodecError::InvalidLength(len.to_string()));
            }
            let len = len as usize;
            if len > RespCodec::MAX_BULK_SIZE {
                return Err(CodecError::TooLarge(len));
            }
            // Payload plus trailing CRLF
            if src.len() < next + len + 2 {
                return Ok(None);
            }
            if &src[next + len..next + len + 2] != b"\r\n" {
                return Err(CodecError::MissingTerminator);
            }
            let data = Bytes::copy_from_slice(&src[next..next + len]);
            Ok(Some((RespValue::Bulk(Some(data)), next + len + 2)))
        }
        b'*' => {
            let len = parse_length(line)?;
            if len == -1 {
                return Ok(Some((RespValue::Array(None), next)));
            }
            if len < 0 {
                return Err(CodecError::InvalidLength(len.to_string()));
            }
            let len = len as usize;
            if len > RespCodec::MAX_ARRAY_LEN {
                return Err(CodecError::TooLarge(len));
            }
            if depth >= RespCodec::MAX_DEPTH {
                return Err(CodecError::TooDeep(RespCodec::MAX_DEPTH));
            }
            let mut items = Vec::with_capacity(len);
            let mut cursor = next;
            for _ in 0..len {
                match parse_value(src, cursor, depth + 1)? {
                    Some((item, after)) => {
                        items.push(item);
                        cursor = after;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespValue::Array(Some(items)), cursor)))
        }
        other => Err(CodecError::UnknownType(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_sentinel_command() {
        let encoded =
            RespCodec::encode_command(&["SENTINEL", "get-master-addr-by-name", "cache"]);
        assert_eq!(
            &encoded[..],
            b"*3\r\n$8\r\nSENTINEL\r\n$23\r\nget-master-addr-by-name\r\n$5\r\ncache\r\n"
        );
    }

    #[test]
    fn test_decode_master_address_reply() {
        let mut buf = BytesMut::from(&b"*2\r\n$9\r\n10.0.0.12\r\n$4\r\n6379\r\n"[..]);

        let value = RespCodec::decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            value,
            RespValue::Array(Some(vec![
                RespValue::Bulk(Some(Bytes::from_static(b"10.0.0.12"))),
                RespValue::Bulk(Some(Bytes::from_static(b"6379"))),
            ]))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete_consumes_nothing() {
        let full = b"*2\r\n$9\r\n10.0.0.12\r\n$4\r\n6379\r\n";

        for split in 0..full.len() {
            let mut buf = BytesMut::from(&full[..split]);
            assert_eq!(RespCodec::decode(&mut buf).unwrap(), None);
            assert_eq!(buf.len(), split);
        }
    }

    #[test]
    fn test_decode_scalar_types() {
        let mut buf = BytesMut::from(&b"+PONG\r\n-ERR unknown\r\n:42\r\n$-1\r\n*-1\r\n"[..]);

        assert_eq!(
            RespCodec::decode(&mut buf).unwrap(),
            Some(RespValue::Simple("PONG".to_string()))
        );
        assert_eq!(
            RespCodec::decode(&mut buf).unwrap(),
            Some(RespValue::Error("ERR unknown".to_string()))
        );
        assert_eq!(
            RespCodec::decode(&mut buf).unwrap(),
            Some(RespValue::Integer(42))
        );

        let nil_bulk = RespCodec::decode(&mut buf).unwrap().unwrap();
        assert!(nil_bulk.is_nil());
        let nil_array = RespCodec::decode(&mut buf).unwrap().unwrap();
        assert!(nil_array.is_nil());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let mut buf = BytesMut::from(&b"?what\r\n"[..]);
        assert_eq!(
            RespCodec::decode(&mut buf),
            Err(CodecError::UnknownType(b'?'))
        );

        let mut buf = BytesMut::from(&b"$3\r\nabcXY"[..]);
        assert_eq!(
            RespCodec::decode(&mut buf),
            Err(CodecError::MissingTerminator)
        );

        let mut buf = BytesMut::from(&b"$99999999\r\n"[..]);
        assert!(matches!(
            RespCodec::decode(&mut buf),
            Err(CodecError::TooLarge(_))
        ));
    }

    #[test]
    fn test_decode_rejects_deep_nesting() {
        let mut nested = "*1\r\n".repeat(RespCodec::MAX_DEPTH + 1);
        nested.push_str(":1\r\n");
        let mut buf = BytesMut::from(nested.as_bytes());
        assert_eq!(
            RespCodec::decode(&mut buf),
            Err(CodecError::TooDeep(RespCodec::MAX_DEPTH))
        );

        // Nesting right at the limit is fine
        let mut nested = "*1\r\n".repeat(RespCodec::MAX_DEPTH);
        nested.push_str(":1\r\n");
        let mut buf = BytesMut::from(nested.as_bytes());
        assert!(RespCodec::decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_decode_caps_buffered_reply() {
        // A simple string that never ends
        let mut buf = BytesMut::from(&b"+"[..]);
        buf.extend_from_slice(&vec![b'a'; RespCodec::MAX_REPLY_SIZE]);
        assert_eq!(
            RespCodec::decode(&mut buf),
            Err(CodecError::TooLarge(RespCodec::MAX_REPLY_SIZE + 1))
        );

        let mut buf = BytesMut::from(&b"+"[..]);
        buf.extend_from_slice(&vec![b'a'; 1024]);
        assert_eq!(RespCodec::decode(&mut buf), Ok(None));
    }

    #[test]
    fn test_as_text() {
        assert_eq!(
            RespValue::Bulk(Some(Bytes::from_static(b"6379"))).as_text(),
            Some("6379".to_string())
        );
        assert_eq!(RespValue::Bulk(None).as_text(), None);
        assert_eq!(RespValue::Integer(1).as_text(), None);
    }
}
