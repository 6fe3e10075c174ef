//! # Transport Framer
//!
//! Splits a continuous byte stream into discrete JSON values and writes
//! messages back out as self-delimited values.
//!
//! ## Philosophy
//!
//! - **Value Boundaries**: A frame ends where its outermost object or array
//!   closes. There is no length prefix, and newlines are not required.
//! - **Semantics-Free**: The framer classifies envelopes but knows nothing
//!   about ids, pending calls or dispatch.
//! - **No Retries**: Every error is reported upward and is terminal for the stream.

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::error::Error;
use crate::error::Result;
use crate::message::Message;

/// Default ceiling for a single frame.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Framing knobs shared by readers and writers.
#[derive(Debug, Clone)]
pub struct FramerConfig {
    /// Largest frame a reader will buffer before giving up with `Oversized`.
    pub max_frame_len: usize,
    /// Append `\n` after every written value. Readers never depend on it.
    pub trailing_newline: bool,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            trailing_newline: true,
        }
    }
}

// ============================================================================
//  SCANNER
// ============================================================================

/// Incremental structural scanner.
///
/// Tracks nesting depth while honoring string literals and escapes, and
/// remembers how far it got so each new chunk is only looked at once.
#[derive(Debug, Default)]
pub(crate) struct Scanner {
    pos: usize,
    depth: usize,
    started: bool,
    in_string: bool,
    escaped: bool,
}

impl Scanner {
    /// Returns the exclusive end of the first complete value in `buf`, if any.
    pub(crate) fn scan(&mut self, buf: &[u8]) -> Result<Option<usize>> {
        while self.pos < buf.len() {
            let byte = buf[self.pos];
            self.pos += 1;

            if !self.started {
                match byte {
                    b' ' | b'\t' | b'\r' | b'\n' => continue,
                    b'{' | b'[' => {
                        self.started = true;
                        self.depth = 1;
                        continue;
                    }
                    other => {
                        return Err(Error::Malformed(format!(
                            "Unexpected byte 0x{:02x} outside of a JSON value",
                            other
                        )));
                    }
                }
            }

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        return Ok(Some(self.pos));
                    }
                }
                _ => {}
            }
        }

        Ok(None)
    }

    /// True once the scanner has seen the first byte of a value.
    pub(crate) fn in_value(&self) -> bool {
        self.started
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
//  READ SIDE
// ============================================================================

/// Reads framed messages from the input half of a stream.
pub struct FrameReader<R> {
    reader: R,
    buf: Vec<u8>,
    scanner: Scanner,
    max_frame_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_config(reader, &FramerConfig::default())
    }

    pub fn with_config(reader: R, config: &FramerConfig) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(READ_CHUNK),
            scanner: Scanner::default(),
            max_frame_len: config.max_frame_len,
        }
    }

    /// Reads the next complete message.
    ///
    /// Cancel-safe: bytes already pulled off the stream stay buffered if the
    /// future is dropped before completing.
    pub async fn read_message(&mut self) -> Result<Message> {
        let frame = self.read_frame().await?;
        tracing::trace!(len = frame.len(), "read frame");
        Message::from_slice(&frame)
    }

    /// Reads the raw bytes of the next complete JSON value.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some(end) = self.scanner.scan(&self.buf)? {
                let frame: Vec<u8> = self.buf.drain(..end).collect();
                self.scanner.reset();
                return Ok(frame);
            }

            if self.buf.len() > self.max_frame_len {
                return Err(Error::Oversized { limit: self.max_frame_len });
            }

            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                return if self.scanner.in_value() {
                    Err(Error::Malformed("Stream closed in the middle of a frame".into()))
                } else {
                    Err(Error::Eof)
                };
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Reads a single message straight off `reader`.
///
/// Bytes past the end of the first value are lost, so this is only suitable
/// for one-shot exchanges. Use [`FrameReader`] for a stream of messages.
pub async fn read_message<R: AsyncRead + Unpin>(reader: R) -> Result<Message> {
    FrameReader::new(reader).read_message().await
}

// ============================================================================
//  WRITE SIDE
// ============================================================================

/// Writes framed messages to the output half of a stream.
///
/// # Invariants
/// At most one write may be in flight per stream. The writer takes `&mut self`
/// and holds no lock of its own; callers sharing it must serialize access.
pub struct FrameWriter<W> {
    writer: W,
    trailing_newline: bool,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self::with_config(writer, &FramerConfig::default())
    }

    pub fn with_config(writer: W, config: &FramerConfig) -> Self {
        Self {
            writer,
            trailing_newline: config.trailing_newline,
        }
    }

    /// Serializes `message` and writes it as one value, then flushes.
    pub async fn write_message(&mut self, message: &Message) -> Result<()> {
        let mut bytes = message.to_vec()?;
        if self.trailing_newline {
            bytes.push(b'\n');
        }
        tracing::trace!(len = bytes.len(), kind = message.kind(), "write frame");
        self.write_frame(&bytes).await
    }

    /// Writes bytes that are already a complete frame.
    pub async fn write_frame(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Flushes and closes the output side.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Writes a single message to `writer` and flushes it.
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<()> {
    let mut bytes = message.to_vec()?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
