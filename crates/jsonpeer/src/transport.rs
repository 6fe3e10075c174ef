//! # Transport Abstraction
//!
//! A duplex byte stream, handed to a peer already constructed.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The Transport knows nothing about JSON, ids or methods.
//!   It owns the read half and the write half of one connection.
//! - **Supplied, Never Created**: Pipes, sockets, child-process stdio and
//!   in-memory pipes are all built by the embedding application and passed in.

use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;

/// Boxed read half of a transport.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin + 'static>;

/// Boxed write half of a transport.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin + 'static>;

/// Default capacity of each direction of an in-memory pipe.
const MEMORY_PIPE_CAPACITY: usize = 64 * 1024;

/// The two halves of a duplex byte stream.
pub struct Transport {
    reader: BoxReader,
    writer: BoxWriter,
}

impl Transport {
    /// Wraps a single bidirectional stream (e.g. a `TcpStream` or `UnixStream`).
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_parts(reader, writer)
    }

    /// Wraps separate input and output streams (e.g. a pair of pipes or stdio).
    pub fn from_parts<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    /// Uses this process's stdin and stdout.
    pub fn stdio() -> Self {
        Self::from_parts(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Creates two transports connected to each other in memory.
    ///
    /// Bytes written on `a` are read by `b` and vice versa.
    pub fn memory_pair() -> (Self, Self) {
        Self::memory_pair_with_capacity(MEMORY_PIPE_CAPACITY)
    }

    pub fn memory_pair_with_capacity(capacity: usize) -> (Self, Self) {
        let (a, b) = tokio::io::duplex(capacity);
        (Self::new(a), Self::new(b))
    }

    pub fn into_split(self) -> (BoxReader, BoxWriter) {
        (self.reader, self.writer)
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}
