//! RESP Values
//!
//! [`RespValue`] is what the server replies with; [`encode_command`] builds
//! the request form (an array of bulk strings) used by clients, tests and
//! benches.
//!
//! | Prefix | Type | Example |
//! |---|---|---|
//! | `+` | simple string | `+OK\r\n` |
//! | `-` | error | `-ERR syntax error\r\n` |
//! | `:` | integer | `:1\r\n` |
//! | `$` | bulk string | `$3\r\nred\r\n`, null `$-1\r\n` |
//! | `*` | array | `*1\r\n$4\r\nPING\r\n`, null `*-1\r\n` |
//!
//! Every line ends with CRLF.

use bytes::{BufMut, Bytes, BytesMut};

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// Represents a value in the RESP protocol.
///
/// Bulk strings and arrays carry an `Option` because RESP has a distinct
/// null encoding for each of them (`$-1\r\n` and `*-1\r\n`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Non-binary-safe status line.
    /// Format: `+<string>\r\n`
    SimpleString(String),

    /// Error line.
    /// Format: `-<error message>\r\n`
    Error(String),

    /// 64-bit signed integer.
    /// Format: `:<integer>\r\n`
    Integer(i64),

    /// Binary-safe string, `None` for the null bulk string.
    /// Format: `$<length>\r\n<data>\r\n`
    BulkString(Option<Bytes>),

    /// Sequence of values, `None` for the null array.
    /// Format: `*<count>\r\n<element1><element2>...`
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// A status line such as `+OK`.
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    /// A non-null bulk string.
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    /// The null bulk string, `$-1\r\n`.
    pub fn null() -> Self {
        RespValue::BulkString(None)
    }

    /// The null array, `*-1\r\n`.
    pub fn null_array() -> Self {
        RespValue::Array(None)
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(Some(values))
    }

    /// `+OK`
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// `+PONG`
    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Encodes this value into a fresh vector.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.serialize_into(&mut buf);
        buf.to_vec()
    }

    /// Serializes the RESP value into an existing buffer.
    ///
    /// The connection layer uses this with buffers taken from the reply pool.
    pub fn serialize_into(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => write_line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::Error(s) => write_line(buf, prefix::ERROR, s.as_bytes()),
            RespValue::Integer(n) => write_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(Some(data)) => write_bulk(buf, data),
            RespValue::BulkString(None) => write_line(buf, prefix::BULK_STRING, b"-1"),
            RespValue::Array(Some(values)) => {
                write_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.serialize_into(buf);
                }
            }
            RespValue::Array(None) => write_line(buf, prefix::ARRAY, b"-1"),
        }
    }

    /// Upper bound of the encoded size, used to pick a pool tier.
    pub fn encoded_len_hint(&self) -> usize {
        match self {
            RespValue::SimpleString(s) | RespValue::Error(s) => s.len() + 3,
            RespValue::Integer(_) => 23,
            RespValue::BulkString(Some(data)) => data.len() + 25,
            RespValue::BulkString(None) | RespValue::Array(None) => 5,
            RespValue::Array(Some(values)) => {
                23 + values.iter().map(RespValue::encoded_len_hint).sum::<usize>()
            }
        }
    }

    /// The value of an integer reply.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

fn write_line(buf: &mut BytesMut, tag: u8, content: &[u8]) {
    buf.reserve(content.len() + 3);
    buf.put_u8(tag);
    buf.put_slice(content);
    buf.put_slice(CRLF);
}

fn write_bulk(buf: &mut BytesMut, data: &[u8]) {
    write_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
    buf.reserve(data.len() + 2);
    buf.put_slice(data);
    buf.put_slice(CRLF);
}

/// Encodes a client request: an array of bulk strings.
///
/// # Example
/// ```
/// use redkite::protocol::encode_command;
/// assert_eq!(
///     encode_command(&["SET", "color", "red"]),
///     b"*3\r\n$3\r\nSET\r\n$5\r\ncolor\r\n$3\r\nred\r\n".to_vec()
/// );
/// ```
pub fn encode_command<T: AsRef<[u8]>>(tokens: &[T]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    write_line(&mut buf, prefix::ARRAY, tokens.len().to_string().as_bytes());
    for token in tokens {
        write_bulk(&mut buf, token.as_ref());
    }
    buf.to_vec()
}
