//! # Error Definitions
//!
//! Failures a caller of a peer can observe. Transport failures end one
//! connection; remote failures are ordinary error replies.

use jsonwire::message::METHOD_NOT_FOUND;
use jsonwire::ErrorObject;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The caller cancelled the call before its reply arrived.
    Cancelled,
    /// The connection closed (locally or by the peer) before the call completed,
    /// or the call was attempted on a closed connection.
    ConnectionClosed,
    /// No reply arrived within the configured call timeout.
    Timeout,
    /// The peer answered with an error reply.
    Remote(ErrorObject),
    /// Framing or I/O failure while writing.
    Wire(jsonwire::Error),
}

/// Coarse classification of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Cancelled,
    ConnectionClosed,
    Timeout,
    MethodNotFound,
    HandlerFailed,
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::ConnectionClosed => ErrorKind::ConnectionClosed,
            Self::Timeout => ErrorKind::Timeout,
            Self::Remote(obj) if obj.code == METHOD_NOT_FOUND => ErrorKind::MethodNotFound,
            Self::Remote(_) => ErrorKind::HandlerFailed,
            Self::Wire(_) => ErrorKind::Io,
        }
    }

    /// The error object sent by the peer, if this is a remote failure.
    pub fn remote(&self) -> Option<&ErrorObject> {
        match self {
            Self::Remote(obj) => Some(obj),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "Call cancelled"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Call timed out"),
            Self::Remote(obj) => write!(f, "Remote failure: {}", obj),
            Self::Wire(e) => write!(f, "Wire error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<jsonwire::Error> for Error {
    fn from(e: jsonwire::Error) -> Self {
        Self::Wire(e)
    }
}

impl From<ErrorObject> for Error {
    fn from(e: ErrorObject) -> Self {
        Self::Remote(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
