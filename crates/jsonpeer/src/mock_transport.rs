//! Scripted remote end for tests.
//!
//! Talks to the peer under test at the message level (or raw bytes), so
//! tests can reorder replies, send garbage, or hang up at will.

use jsonwire::FrameReader;
use jsonwire::FrameWriter;
use jsonwire::Message;

use crate::transport::BoxReader;
use crate::transport::BoxWriter;
use crate::transport::Transport;

pub struct RawPeer {
    reader: FrameReader<BoxReader>,
    writer: FrameWriter<BoxWriter>,
}

impl RawPeer {
    /// Returns the transport for the peer under test and its scripted remote.
    pub fn pair() -> (Transport, Self) {
        let (local, remote) = Transport::memory_pair();
        Self::wrap(local, remote)
    }

    /// Like [`RawPeer::pair`], with a small pipe so writes can block.
    pub fn pair_with_capacity(capacity: usize) -> (Transport, Self) {
        let (local, remote) = Transport::memory_pair_with_capacity(capacity);
        Self::wrap(local, remote)
    }

    fn wrap(local: Transport, remote: Transport) -> (Transport, Self) {
        let (reader, writer) = remote.into_split();

        let raw = Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
        };
        (local, raw)
    }

    pub async fn recv(&mut self) -> Message {
        self.reader.read_message().await.expect("remote expected a message")
    }

    pub async fn try_recv(&mut self) -> jsonwire::Result<Message> {
        self.reader.read_message().await
    }

    pub async fn send(&mut self, message: &Message) {
        self.writer.write_message(message).await.expect("remote failed to send");
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_frame(bytes).await.expect("remote failed to send raw bytes");
    }

    /// Closes the remote's output, so the peer under test sees EOF.
    pub async fn hang_up(&mut self) {
        self.writer.shutdown().await.expect("remote failed to shut down");
    }
}
