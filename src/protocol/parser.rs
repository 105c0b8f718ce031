//! Incremental RESP Protocol Parser
//!
//! The parser owns an accumulation buffer. Network reads are handed to
//! [`RespParser::feed`], which decodes every complete top-level command and
//! keeps any trailing partial value for the next call.
//!
//! ## How the Parser Works
//!
//! Each type reader returns:
//! - `Ok(Some(value))` - a complete value, the cursor sits after it
//! - `Ok(None)` - not enough data yet, the cursor is back on the type byte
//! - `Err(ParseError)` - invalid protocol data
//!
//! Because every reader rewinds on `Ok(None)`, an array that is missing its
//! last element gives back its count line and all the elements it already
//! decoded. The next `feed()` starts again from exactly the same byte.
//!
//! ```text
//!   buf:  [ consumed | *3\r\n$3\r\nSET\r\n$5\r\ncol ]
//!                    ^ offset                      ^ size
//! ```

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::{Buf, Bytes, BytesMut};
use std::ops::Range;
use thiserror::Error;
use tracing::{trace, warn};

/// Errors that can occur during RESP parsing.
///
/// All of them are protocol violations: the connection reports them to the
/// peer and resets the parser instead of waiting for more bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Unknown type prefix byte
    #[error("Unknown RESP type byte: {0:#04x}")]
    UnknownType(u8),

    /// Integer reply content is not a valid i64
    #[error("Invalid integer value: {0}")]
    InvalidInteger(String),

    /// Bulk string length is not a number, below -1 or too large
    #[error("Invalid bulk string length: {0}")]
    InvalidBulkLength(String),

    /// Bulk string payload not followed by CRLF
    #[error("Malformed bulk string: missing or incorrect trailing CRLF")]
    MalformedBulkString,

    /// Array count is not a number or below -1
    #[error("Invalid array length: {0}")]
    InvalidArrayLength(String),

    /// Invalid UTF-8 in a simple string or error line
    #[error("Invalid UTF-8 in line")]
    InvalidUtf8,

    /// Arrays nested deeper than [`MAX_NESTING_DEPTH`]
    #[error("maximum nesting depth exceeded: {0}")]
    TooDeep(usize),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: i64 = 512 * 1024 * 1024;

/// Maximum array nesting depth (prevent stack overflow)
pub const MAX_NESTING_DEPTH: usize = 32;

/// Smallest capacity the accumulation buffer grows to.
pub const MIN_BUFFER_CAPACITY: usize = 1024;

/// An incremental RESP parser.
///
/// One instance belongs to one connection.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use redkite::protocol::RespParser;
///
/// let mut parser = RespParser::new();
/// let mut commands = Vec::new();
///
/// parser.feed(b"*2\r\n$3\r\nGET\r\n$4\r\nna", |cmd| commands.push(cmd)).unwrap();
/// assert!(commands.is_empty());
///
/// parser.feed(b"me\r\n", |cmd| commands.push(cmd)).unwrap();
/// assert_eq!(commands, vec![vec![Bytes::from("GET"), Bytes::from("name")]]);
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    /// Accumulated bytes, `buf.len()` is the logical size
    buf: BytesMut,
    /// Read offset into `buf`
    pos: usize,
    /// Current nesting depth (for array parsing)
    depth: usize,
}

impl RespParser {
    /// Creates a new parser instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `data` and invokes `on_command` for every complete command.
    ///
    /// A command is a top-level array with at least one string element;
    /// its elements are handed over as raw tokens. Null values and empty
    /// arrays are skipped, other top-level values are logged and dropped.
    ///
    /// On error the offending bytes stay buffered; callers are expected to
    /// [`reset`](Self::reset) the parser.
    pub fn feed<F>(&mut self, data: &[u8], mut on_command: F) -> ParseResult<()>
    where
        F: FnMut(Vec<Bytes>),
    {
        self.append(data);

        while self.pos < self.buf.len() {
            self.depth = 0;
            match self.read_value()? {
                Some(value) => emit(value, &mut on_command),
                None => {
                    trace!(buffered = self.buffered(), "Incomplete value, need more data");
                    break;
                }
            }
        }

        self.compact();
        Ok(())
    }

    /// Discards all buffered bytes.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.pos = 0;
        self.depth = 0;
    }

    /// Number of bytes received but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Current read offset into the accumulation buffer.
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Current capacity of the accumulation buffer.
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    fn append(&mut self, data: &[u8]) {
        if self.buf.len() + data.len() > self.buf.capacity() {
            // Reclaim the consumed prefix before growing.
            self.drop_consumed();
            let required = self.buf.len() + data.len();
            if required > self.buf.capacity() {
                let target = (required * 2).max(MIN_BUFFER_CAPACITY);
                self.buf.reserve(target - self.buf.len());
            }
        }
        self.buf.extend_from_slice(data);
    }

    fn compact(&mut self) {
        if self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        } else if self.pos > self.buf.len() / 2 {
            self.drop_consumed();
        }
    }

    fn drop_consumed(&mut self) {
        if self.pos > 0 {
            self.buf.advance(self.pos);
            self.pos = 0;
        }
    }

    /// Reads one value starting at the type byte under the cursor.
    ///
    /// Leaves the cursor on the type byte unless a complete value was read.
    fn read_value(&mut self) -> ParseResult<Option<RespValue>> {
        let Some(&tag) = self.buf.get(self.pos) else {
            return Ok(None);
        };

        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::TooDeep(MAX_NESTING_DEPTH));
        }

        let start = self.pos;
        self.pos += 1;

        let result = match tag {
            prefix::SIMPLE_STRING => self.read_text().map(|v| v.map(RespValue::SimpleString)),
            prefix::ERROR => self.read_text().map(|v| v.map(RespValue::Error)),
            prefix::INTEGER => self.read_integer(),
            prefix::BULK_STRING => self.read_bulk_string(),
            prefix::ARRAY => self.read_array(),
            other => Err(ParseError::UnknownType(other)),
        };

        if !matches!(result, Ok(Some(_))) {
            self.pos = start;
        }
        result
    }

    /// `+<string>\r\n` and `-<message>\r\n`
    fn read_text(&mut self) -> ParseResult<Option<String>> {
        let Some(line) = self.read_line() else {
            return Ok(None);
        };
        std::str::from_utf8(&self.buf[line])
            .map(|s| Some(s.to_owned()))
            .map_err(|_| ParseError::InvalidUtf8)
    }

    /// `:<integer>\r\n`
    fn read_integer(&mut self) -> ParseResult<Option<RespValue>> {
        let Some(line) = self.read_line() else {
            return Ok(None);
        };
        let n = self
            .parse_number(line)
            .map_err(ParseError::InvalidInteger)?;
        Ok(Some(RespValue::Integer(n)))
    }

    /// `$<length>\r\n<data>\r\n`
    fn read_bulk_string(&mut self) -> ParseResult<Option<RespValue>> {
        let Some(line) = self.read_line() else {
            return Ok(None);
        };
        let length = self
            .parse_number(line.clone())
            .map_err(ParseError::InvalidBulkLength)?;

        if length == -1 {
            return Ok(Some(RespValue::BulkString(None)));
        }
        if !(0..=MAX_BULK_SIZE).contains(&length) {
            return Err(ParseError::InvalidBulkLength(self.line_text(line)));
        }

        let data_start = self.pos;
        let data_end = data_start + length as usize;
        if self.buf.len() < data_end + CRLF.len() {
            return Ok(None);
        }
        if &self.buf[data_end..data_end + CRLF.len()] != CRLF {
            return Err(ParseError::MalformedBulkString);
        }

        let data = Bytes::copy_from_slice(&self.buf[data_start..data_end]);
        self.pos = data_end + CRLF.len();
        Ok(Some(RespValue::BulkString(Some(data))))
    }

    /// `*<count>\r\n<elements...>`
    fn read_array(&mut self) -> ParseResult<Option<RespValue>> {
        let Some(line) = self.read_line() else {
            return Ok(None);
        };
        let count = self
            .parse_number(line.clone())
            .map_err(ParseError::InvalidArrayLength)?;

        if count == -1 {
            return Ok(Some(RespValue::Array(None)));
        }
        if count < 0 {
            return Err(ParseError::InvalidArrayLength(self.line_text(line)));
        }

        let count = count as usize;
        // The count is untrusted; let the vector grow as elements really arrive.
        let mut elements = Vec::with_capacity(count.min(64));

        self.depth += 1;
        for _ in 0..count {
            match self.read_value()? {
                Some(value) => elements.push(value),
                None => return Ok(None),
            }
        }
        self.depth -= 1;

        Ok(Some(RespValue::Array(Some(elements))))
    }

    /// Consumes one CRLF-terminated line, returning the range of its content.
    fn read_line(&mut self) -> Option<Range<usize>> {
        let end = self.pos + find_crlf(&self.buf[self.pos..])?;
        let line = self.pos..end;
        self.pos = end + CRLF.len();
        Some(line)
    }

    /// Parses a decimal line, handing back its text on failure.
    fn parse_number(&self, line: Range<usize>) -> Result<i64, String> {
        let text = &self.buf[line];
        std::str::from_utf8(text)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| String::from_utf8_lossy(text).into_owned())
    }

    fn line_text(&self, line: Range<usize>) -> String {
        String::from_utf8_lossy(&self.buf[line]).into_owned()
    }
}

/// Hands a decoded top-level value to the command callback.
fn emit<F>(value: RespValue, on_command: &mut F)
where
    F: FnMut(Vec<Bytes>),
{
    match value {
        RespValue::Array(Some(items)) => {
            let tokens = into_tokens(items);
            if !tokens.is_empty() {
                on_command(tokens);
            }
        }
        RespValue::Array(None) | RespValue::BulkString(None) => {}
        other => warn!(value = ?other, "Discarding non-array top-level value"),
    }
}

/// Keeps bulk and simple strings, drops anything else from a command array.
fn into_tokens(items: Vec<RespValue>) -> Vec<Bytes> {
    items
        .into_iter()
        .filter_map(|item| match item {
            RespValue::BulkString(Some(data)) => Some(data),
            RespValue::SimpleString(s) => Some(Bytes::from(s)),
            other => {
                warn!(element = ?other, "Dropping non-string element from command");
                None
            }
        })
        .collect()
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Decodes a single RESP value from the start of `buf`.
///
/// Returns the value and the number of bytes it occupied. Used on the
/// client side of tests and tools to read replies.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    let mut parser = RespParser::new();
    parser.append(buf);
    Ok(parser.read_value()?.map(|value| (value, parser.pos)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::encode_command;

    fn feed_all(parser: &mut RespParser, data: &[u8]) -> ParseResult<Vec<Vec<Bytes>>> {
        let mut commands = Vec::new();
        parser.feed(data, |cmd| commands.push(cmd))?;
        Ok(commands)
    }

    fn tokens(args: &[&str]) -> Vec<Bytes> {
        args.iter().map(|s| Bytes::from(s.to_string())).collect()
    }

    #[test]
    fn test_parse_set_command() {
        let mut parser = RespParser::new();
        let commands = feed_all(
            &mut parser,
            b"*3\r\n$3\r\nSET\r\n$5\r\ncolor\r\n$3\r\nred\r\n",
        )
        .unwrap();
        assert_eq!(commands, vec![tokens(&["SET", "color", "red"])]);
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_roundtrip() {
        let original = tokens(&["SET", "user:101", "", "binary\r\n\0value"]);
        let mut parser = RespParser::new();
        let commands = feed_all(&mut parser, &encode_command(&original)).unwrap();
        assert_eq!(commands, vec![original]);
    }

    #[test]
    fn test_fragmentation_invariance() {
        let encoded = encode_command(&["SET", "color", "red"]);
        let expected = tokens(&["SET", "color", "red"]);

        for split in 0..=encoded.len() {
            let mut parser = RespParser::new();
            let mut commands = feed_all(&mut parser, &encoded[..split]).unwrap();
            commands.extend(feed_all(&mut parser, &encoded[split..]).unwrap());
            assert_eq!(commands, vec![expected.clone()], "split at {}", split);
        }
    }

    #[test]
    fn test_byte_by_byte_pipeline() {
        let mut stream = encode_command(&["SET", "k1", "v1"]);
        stream.extend(encode_command(&["GET", "k1"]));
        stream.extend(encode_command(&["DEL", "k1", "k2"]));

        let mut parser = RespParser::new();
        let mut commands = Vec::new();
        for byte in &stream {
            commands.extend(feed_all(&mut parser, std::slice::from_ref(byte)).unwrap());
        }

        assert_eq!(
            commands,
            vec![
                tokens(&["SET", "k1", "v1"]),
                tokens(&["GET", "k1"]),
                tokens(&["DEL", "k1", "k2"]),
            ]
        );
    }

    #[test]
    fn test_incomplete_array_rolls_back() {
        let mut parser = RespParser::new();
        let commands = feed_all(&mut parser, b"*2\r\n$3\r\nGET\r\n$4\r\nna").unwrap();
        assert!(commands.is_empty());
        assert_eq!(parser.offset(), 0);
        assert_eq!(parser.buffered(), 19);

        let commands = feed_all(&mut parser, b"me\r\n").unwrap();
        assert_eq!(commands, vec![tokens(&["GET", "name"])]);
    }

    #[test]
    fn test_incomplete_after_complete_command() {
        let mut parser = RespParser::new();
        let mut data = encode_command(&["PING"]);
        data.extend_from_slice(b"*1\r\n$4\r\nPI");

        let commands = feed_all(&mut parser, &data).unwrap();
        assert_eq!(commands, vec![tokens(&["PING"])]);
        assert_eq!(parser.buffered(), 10);
    }

    #[test]
    fn test_null_and_empty_top_level_ignored() {
        let mut parser = RespParser::new();
        let commands = feed_all(&mut parser, b"*-1\r\n$-1\r\n*0\r\n").unwrap();
        assert!(commands.is_empty());
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_non_array_top_level_discarded() {
        let mut parser = RespParser::new();
        let mut data = b"+OK\r\n:12\r\n$3\r\nfoo\r\n".to_vec();
        data.extend(encode_command(&["PING"]));
        let commands = feed_all(&mut parser, &data).unwrap();
        assert_eq!(commands, vec![tokens(&["PING"])]);
    }

    #[test]
    fn test_non_string_elements_dropped() {
        let mut parser = RespParser::new();
        let commands = feed_all(
            &mut parser,
            b"*5\r\n$3\r\nDEL\r\n:1\r\n+a\r\n$-1\r\n*1\r\n$1\r\nb\r\n",
        )
        .unwrap();
        assert_eq!(commands, vec![tokens(&["DEL", "a"])]);
    }

    #[test]
    fn test_array_of_only_non_strings_ignored() {
        let mut parser = RespParser::new();
        let commands = feed_all(&mut parser, b"*2\r\n:1\r\n:2\r\n").unwrap();
        assert!(commands.is_empty());
    }

    #[test]
    fn test_invalid_integer() {
        let mut parser = RespParser::new();
        let err = feed_all(&mut parser, b"*1\r\n:abc\r\n").unwrap_err();
        assert_eq!(err, ParseError::InvalidInteger("abc".to_string()));
        assert_eq!(err.to_string(), "Invalid integer value: abc");
    }

    #[test]
    fn test_invalid_bulk_length() {
        let mut parser = RespParser::new();
        let err = feed_all(&mut parser, b"*1\r\n$-5\r\n").unwrap_err();
        assert_eq!(err.to_string(), "Invalid bulk string length: -5");

        let mut parser = RespParser::new();
        let err = feed_all(&mut parser, b"*1\r\n$x\r\n").unwrap_err();
        assert_eq!(err, ParseError::InvalidBulkLength("x".to_string()));
    }

    #[test]
    fn test_bulk_string_missing_crlf() {
        let mut parser = RespParser::new();
        let err = feed_all(&mut parser, b"*1\r\n$3\r\nfooXY").unwrap_err();
        assert_eq!(err, ParseError::MalformedBulkString);
        assert_eq!(
            err.to_string(),
            "Malformed bulk string: missing or incorrect trailing CRLF"
        );
    }

    #[test]
    fn test_unknown_type_byte() {
        let mut parser = RespParser::new();
        let err = feed_all(&mut parser, b"@invalid\r\n").unwrap_err();
        assert_eq!(err, ParseError::UnknownType(b'@'));
    }

    #[test]
    fn test_invalid_array_length() {
        let mut parser = RespParser::new();
        let err = feed_all(&mut parser, b"*-2\r\n").unwrap_err();
        assert_eq!(err, ParseError::InvalidArrayLength("-2".to_string()));
    }

    #[test]
    fn test_nesting_limit() {
        let mut data = Vec::new();
        for _ in 0..=MAX_NESTING_DEPTH + 1 {
            data.extend_from_slice(b"*1\r\n");
        }
        data.extend_from_slice(b"$1\r\na\r\n");

        let mut parser = RespParser::new();
        assert!(matches!(
            feed_all(&mut parser, &data),
            Err(ParseError::TooDeep(_))
        ));
    }

    #[test]
    fn test_reset_after_error() {
        let mut parser = RespParser::new();
        assert!(feed_all(&mut parser, b"?garbage\r\n").is_err());
        parser.reset();
        assert_eq!(parser.buffered(), 0);

        let commands = feed_all(&mut parser, &encode_command(&["PING"])).unwrap();
        assert_eq!(commands, vec![tokens(&["PING"])]);
    }

    #[test]
    fn test_large_value_in_chunks() {
        let value = "v".repeat(200_000);
        let encoded = encode_command(&["SET", "big", value.as_str()]);

        let mut parser = RespParser::new();
        let mut commands = Vec::new();
        for chunk in encoded.chunks(1500) {
            commands.extend(feed_all(&mut parser, chunk).unwrap());
        }

        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0][2].len(), 200_000);
        assert!(parser.capacity() >= MIN_BUFFER_CAPACITY);
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_buffer_drained_after_full_parse() {
        let mut parser = RespParser::new();
        for _ in 0..100 {
            feed_all(&mut parser, &encode_command(&["GET", "key"])).unwrap();
            assert_eq!(parser.offset(), 0);
            assert_eq!(parser.buffered(), 0);
        }
    }

    #[test]
    fn test_parse_message_replies() {
        assert_eq!(
            parse_message(b"$-1\r\n").unwrap(),
            Some((RespValue::null(), 5))
        );
        assert_eq!(
            parse_message(b":1\r\n").unwrap(),
            Some((RespValue::integer(1), 4))
        );
        assert_eq!(
            parse_message(b"-ERR boom\r\n").unwrap(),
            Some((RespValue::error("ERR boom"), 11))
        );
        assert_eq!(parse_message(b"$5\r\nhel").unwrap(), None);
    }

    #[test]
    fn test_binary_safe_bulk_string() {
        let (value, _) = parse_message(b"$5\r\nhel\x00o\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::bulk_string(Bytes::from(&b"hel\x00o"[..])));
    }
}
