//! # jsonwire
//!
//! JSON-RPC 2.0 messages and the framing that carries them over a byte stream.
//!
//! ## Architecture
//!
//! Messages are plain JSON objects written back to back. A reader finds the
//! end of each one by structural completion (balanced braces and brackets,
//! with string literals and escapes honored), so the stream needs no length
//! prefix and no delimiter. Writers append a newline anyway, which keeps the
//! output friendly to line-oriented peers and tools.
//!
//! ```text
//! {"jsonrpc":"2.0","id":1,"method":"echo","params":{"x":1}}
//! {"jsonrpc":"2.0","id":1,"result":{"x":1}}
//! ```
//!
//! This crate has no notion of pending calls or dispatch. See `jsonpeer`.

pub mod error;
pub mod framer;
pub mod message;

pub use error::Error;
pub use error::Result;
pub use framer::read_message;
pub use framer::write_message;
pub use framer::FrameReader;
pub use framer::FrameWriter;
pub use framer::FramerConfig;
pub use message::ErrorObject;
pub use message::Id;
pub use message::Message;

#[cfg(test)]
mod tests;
