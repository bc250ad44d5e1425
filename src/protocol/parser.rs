//! Incremental RESP Request Parser
//!
//! Clients only ever send arrays of bulk strings, so the parser understands
//! exactly two frame types: `*` arrays and `$` bulk strings. Anything else in
//! the leading position is a protocol violation.
//!
//! The parser works on a borrowed buffer and returns either:
//! - `Ok(Some((value, consumed)))` - one complete frame, `consumed` bytes used
//! - `Ok(None)` - the frame is incomplete, more bytes are needed
//! - `Err(ParseError)` - the bytes can never form a valid frame
//!
//! After an error the stream cannot be resynchronised. Callers drop the
//! connection instead of trying to skip ahead.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur during RESP parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Leading byte is neither `*` nor `$`
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// A length line that is not a base-10 i64
    #[error("invalid integer: {0:?}")]
    InvalidInteger(String),

    /// Bulk string length is negative (but not -1 for null)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative (but not -1 for null)
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Structural violation (missing CRLF, nesting too deep)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth (prevent stack overflow)
pub const MAX_NESTING_DEPTH: usize = 32;

/// Upper bound on elements preallocated for an array header.
const MAX_PREALLOC: usize = 1024;

/// Longest decimal i64 (`-9223372036854775808`).
const MAX_INTEGER_LEN: usize = 20;

/// A RESP request parser.
///
/// The parser is stateless between calls; it only carries the limits it
/// enforces, so one instance can be reused for every frame on a connection.
///
/// # Example
///
/// ```
/// use emberkv::protocol::{RespParser, RespValue};
/// use bytes::Bytes;
///
/// let parser = RespParser::new();
/// let (value, consumed) = parser
///     .parse(b"*1\r\n$4\r\nPING\r\n")
///     .unwrap()
///     .unwrap();
/// assert_eq!(value, RespValue::Array(vec![RespValue::BulkString(Bytes::from("PING"))]));
/// assert_eq!(consumed, 14);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct RespParser {
    max_bulk_len: usize,
    max_depth: usize,
}

impl Default for RespParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RespParser {
    /// Creates a parser with the default limits.
    pub fn new() -> Self {
        Self::with_limits(MAX_BULK_SIZE, MAX_NESTING_DEPTH)
    }

    /// Creates a parser with explicit bulk size and nesting limits.
    pub fn with_limits(max_bulk_len: usize, max_depth: usize) -> Self {
        Self {
            max_bulk_len,
            max_depth,
        }
    }

    /// Largest bulk payload this parser accepts.
    pub fn max_bulk_len(&self) -> usize {
        self.max_bulk_len
    }

    /// Attempts to parse one frame from the front of `buf`.
    pub fn parse(&self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.parse_value(buf, 0)
    }

    fn parse_value(&self, buf: &[u8], depth: usize) -> ParseResult<Option<(RespValue, usize)>> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };

        match first {
            prefix::BULK_STRING => self.parse_bulk_string(buf),
            prefix::ARRAY => self.parse_array(buf, depth),
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }

    /// Parses a bulk string: `$<length>\r\n<data>\r\n`
    fn parse_bulk_string(&self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        debug_assert!(buf[0] == prefix::BULK_STRING);

        let Some((length, header_len)) = read_integer(&buf[1..])? else {
            return Ok(None);
        };
        let data_start = 1 + header_len;

        let Some(length) = self.bulk_len(length)? else {
            return Ok(Some((RespValue::Null, data_start)));
        };

        let data_end = data_start + length;
        let total = data_end + CRLF.len();
        if buf.len() < total {
            return Ok(None);
        }
        check_trailing_crlf(&buf[data_end..total])?;

        let data = Bytes::copy_from_slice(&buf[data_start..data_end]);
        Ok(Some((RespValue::BulkString(data), total)))
    }

    /// Parses an array: `*<count>\r\n<elements...>`
    fn parse_array(&self, buf: &[u8], depth: usize) -> ParseResult<Option<(RespValue, usize)>> {
        debug_assert!(buf[0] == prefix::ARRAY);

        self.check_depth(depth)?;

        let Some((count, header_len)) = read_integer(&buf[1..])? else {
            return Ok(None);
        };
        let mut consumed = 1 + header_len;

        let Some(count) = array_len(count)? else {
            return Ok(Some((RespValue::Null, consumed)));
        };
        let mut elements = Vec::with_capacity(count.min(MAX_PREALLOC));

        for _ in 0..count {
            match self.parse_value(&buf[consumed..], depth + 1)? {
                Some((value, used)) => {
                    elements.push(value);
                    consumed += used;
                }
                None => return Ok(None),
            }
        }

        Ok(Some((RespValue::Array(elements), consumed)))
    }

    /// Checks whether `buf` starts with a complete frame, without building it.
    ///
    /// Progress is kept in `state`, so a call made after more bytes arrive
    /// only examines the new bytes plus at most one unfinished header or
    /// bulk payload. Returns the frame length once the frame is complete.
    ///
    /// `buf` must start with the same bytes on every call until `state` is
    /// reset. Errors are the ones [`RespParser::parse`] reports for the same
    /// input.
    pub fn scan(&self, buf: &[u8], state: &mut ScanState) -> ParseResult<Option<usize>> {
        loop {
            let rest = &buf[state.offset..];
            let Some(&first) = rest.first() else {
                return Ok(None);
            };

            let element_len = match first {
                prefix::BULK_STRING => {
                    let Some((length, header_len)) = read_integer(&rest[1..])? else {
                        return Ok(None);
                    };
                    let header = 1 + header_len;
                    match self.bulk_len(length)? {
                        None => header,
                        Some(length) => {
                            let total = header + length + CRLF.len();
                            if rest.len() < total {
                                return Ok(None);
                            }
                            check_trailing_crlf(&rest[header + length..total])?;
                            total
                        }
                    }
                }
                prefix::ARRAY => {
                    self.check_depth(state.pending.len())?;
                    let Some((count, header_len)) = read_integer(&rest[1..])? else {
                        return Ok(None);
                    };
                    let header = 1 + header_len;
                    match array_len(count)? {
                        Some(count) if count > 0 => {
                            state.offset += header;
                            state.pending.push(count);
                            continue;
                        }
                        _ => header,
                    }
                }
                other => return Err(ParseError::UnknownPrefix(other)),
            };

            state.offset += element_len;

            // Close every array this element completed
            loop {
                match state.pending.last_mut() {
                    None => return Ok(Some(state.offset)),
                    Some(remaining) if *remaining > 1 => {
                        *remaining -= 1;
                        break;
                    }
                    Some(_) => {
                        state.pending.pop();
                    }
                }
            }
        }
    }

    /// Validates a bulk length header. `None` is the null bulk string.
    fn bulk_len(&self, length: i64) -> ParseResult<Option<usize>> {
        if length == -1 {
            return Ok(None);
        }
        let length = usize::try_from(length).map_err(|_| ParseError::InvalidBulkLength(length))?;
        if length > self.max_bulk_len {
            return Err(ParseError::MessageTooLarge {
                size: length,
                max: self.max_bulk_len,
            });
        }
        Ok(Some(length))
    }

    fn check_depth(&self, depth: usize) -> ParseResult<()> {
        if depth >= self.max_depth {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                self.max_depth
            )));
        }
        Ok(())
    }
}

/// Progress of [`RespParser::scan`] through a partially received frame.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanState {
    /// Bytes at the front of the frame already checked
    offset: usize,
    /// Elements still expected by each open array, innermost last
    pending: Vec<usize>,
}

impl ScanState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets all progress. Call once the scanned frame has been consumed.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.pending.clear();
    }
}

/// Validates an array count header. `None` is the null array.
fn array_len(count: i64) -> ParseResult<Option<usize>> {
    if count == -1 {
        return Ok(None);
    }
    usize::try_from(count)
        .map(Some)
        .map_err(|_| ParseError::InvalidArrayLength(count))
}

fn check_trailing_crlf(bytes: &[u8]) -> ParseResult<()> {
    if bytes != CRLF {
        return Err(ParseError::ProtocolError(
            "bulk string missing trailing CRLF".to_string(),
        ));
    }
    Ok(())
}

/// Reads one CRLF-terminated line.
///
/// Returns the line without its terminator and the number of bytes consumed
/// including the terminator, or `None` if no CRLF has arrived yet.
pub fn read_line(buf: &[u8]) -> Option<(&[u8], usize)> {
    find_crlf(buf).map(|pos| (&buf[..pos], pos + CRLF.len()))
}

/// Reads one CRLF-terminated line and parses it as a base-10 `i64`.
///
/// Only the first few bytes are searched for the terminator: a line longer
/// than any `i64` is rejected as soon as it is seen, instead of waiting for
/// a CRLF that may never come.
pub fn read_integer(buf: &[u8]) -> ParseResult<Option<(i64, usize)>> {
    let window = &buf[..buf.len().min(MAX_INTEGER_LEN + CRLF.len())];
    let Some((line, consumed)) = read_line(window) else {
        if window.len() == MAX_INTEGER_LEN + CRLF.len() {
            return Err(ParseError::InvalidInteger(
                String::from_utf8_lossy(window).into_owned(),
            ));
        }
        return Ok(None);
    };

    let n = std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ParseError::InvalidInteger(String::from_utf8_lossy(line).into_owned()))?;

    Ok(Some((n, consumed)))
}

/// Finds the position of the first CRLF in the buffer.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Parses a single frame with the default limits.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}
