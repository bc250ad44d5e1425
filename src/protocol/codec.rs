//! Stream Codec
//!
//! [`RespCodec`] turns any async byte stream into a sequence of frames.
//! Incoming bytes accumulate in a `BytesMut` buffer. Each read resumes a
//! [`RespParser::scan`] where the previous one stopped, and the frame is only
//! built once the scan reports it complete, so a frame arriving in many small
//! reads costs time linear in its size. Pipelined requests that arrive in one
//! TCP segment are handed out one at a time.
//!
//! Replies go through a `BufWriter` and are flushed after each frame.

use crate::protocol::parser::{ParseError, RespParser, ScanState};
use crate::protocol::types::RespValue;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};

/// Initial read buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Slack allowed in the read buffer beyond the largest bulk payload, to hold
/// the surrounding headers and the start of the next pipelined frame.
const READ_HEADROOM: usize = 64 * 1024;

/// Errors produced while reading or writing frames.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Peer closed the stream between frames
    #[error("connection closed")]
    Closed,

    /// Peer closed the stream in the middle of a frame
    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("read buffer limit exceeded: {size} bytes (max: {max})")]
    BufferFull { size: usize, max: usize },
}

/// Reads and writes RESP frames on a byte stream.
#[derive(Debug)]
pub struct RespCodec<S> {
    stream: BufWriter<S>,
    buffer: BytesMut,
    parser: RespParser,
    scan: ScanState,
    max_buffer: usize,
}

impl<S> RespCodec<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a stream using the default parser limits.
    pub fn new(stream: S) -> Self {
        Self::with_parser(stream, RespParser::new())
    }

    /// Wraps a stream using a parser with custom limits.
    pub fn with_parser(stream: S, parser: RespParser) -> Self {
        Self {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser,
            scan: ScanState::new(),
            max_buffer: parser.max_bulk_len().saturating_add(READ_HEADROOM),
        }
    }

    /// Reads exactly one frame.
    ///
    /// Returns the frame together with the number of bytes it occupied on
    /// the wire. Bytes that belong to later frames stay buffered.
    pub async fn read_value(&mut self) -> Result<(RespValue, usize), CodecError> {
        loop {
            if let Some(frame_len) = self.parser.scan(&self.buffer, &mut self.scan)? {
                let frame = self.buffer.split_to(frame_len);
                self.scan.reset();
                return match self.parser.parse(&frame)? {
                    Some((value, _)) => Ok((value, frame_len)),
                    None => Err(ParseError::ProtocolError("frame ended early".to_string()).into()),
                };
            }

            if self.buffer.len() >= self.max_buffer {
                return Err(CodecError::BufferFull {
                    size: self.buffer.len(),
                    max: self.max_buffer,
                });
            }

            if self.buffer.capacity() - self.buffer.len() < 1024 {
                self.buffer.reserve(INITIAL_BUFFER_SIZE);
            }

            let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;
            if n == 0 {
                return Err(if self.buffer.is_empty() {
                    CodecError::Closed
                } else {
                    CodecError::UnexpectedEof
                });
            }
        }
    }

    /// Writes one frame and flushes it. Returns the number of bytes written.
    pub async fn write_value(&mut self, value: &RespValue) -> Result<usize, CodecError> {
        let bytes = value.serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(bytes.len())
    }

    /// Number of bytes received but not yet parsed into a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
