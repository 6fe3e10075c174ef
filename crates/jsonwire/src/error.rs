//! # Error Definitions
//!
//! Everything that can go wrong while moving a message across the stream.
//! All of these terminate the connection that produced them.

/// Framing and decoding failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The stream closed cleanly with no partial frame pending.
    Eof,
    /// The bytes did not form JSON, or the JSON was not a JSON-RPC message.
    Malformed(String),
    /// A single frame grew past the configured limit before completing.
    Oversized { limit: usize },
    /// The underlying stream failed.
    Io(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Eof => write!(f, "End of stream"),
            Self::Malformed(msg) => write!(f, "Malformed message: {}", msg),
            Self::Oversized { limit } => write!(f, "Frame exceeds limit of {} bytes", limit),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

/// A specialized Result type for framing operations.
pub type Result<T> = std::result::Result<T, Error>;
