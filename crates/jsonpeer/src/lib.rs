//! # jsonpeer
//!
//! Duplex JSON-RPC 2.0 peers over any async byte stream.
//!
//! ## Architecture
//!
//! Every connection runs the same engine ([`Connection`]): a read loop that
//! resolves replies against a table of pending calls and hands everything
//! else to one of two front ends.
//!
//! ```text
//!            ┌──────────────┐   Reply ─▶ pending table ─▶ caller
//! Transport ─┤  read loop   ├─ Call / Notification ─┬─▶ Peer:   Events stream
//!            └──────────────┘                       └─▶ Server: Registry ─▶ Handler task ─▶ reply
//! ```
//!
//! ## Invariants
//! - **Unique Ids**: Ids of outstanding calls on one connection never collide.
//! - **Exactly Once**: Every call resolves exactly once: reply, cancellation,
//!   timeout, or `ConnectionClosed`.
//! - **Whole Frames**: Writes are serialized per connection; frames never interleave.
//! - **Always Reply**: A server answers every call it receives, even for
//!   unknown methods and panicking handlers.

pub mod builder;
pub mod connection;
pub mod error;
pub mod handler;
pub mod peer;
pub mod registry;
pub mod server;
pub mod transport;

#[cfg(test)]
mod mock_transport;

pub use builder::Config;
pub use builder::PeerBuilder;
pub use builder::ServerBuilder;
pub use connection::CloseReason;
pub use connection::Connection;
pub use connection::State;
pub use error::Error;
pub use error::ErrorKind;
pub use error::Result;
pub use handler::CallContext;
pub use handler::FnHandler;
pub use handler::Handler;
pub use handler::HandlerResult;
pub use peer::Event;
pub use peer::Events;
pub use peer::Peer;
pub use registry::Registry;
pub use server::ConnectionId;
pub use server::Server;
pub use transport::Transport;

pub use jsonwire;
pub use jsonwire::ErrorObject;
pub use jsonwire::Id;
pub use tokio_util::sync::CancellationToken;
