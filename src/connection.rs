//! Shared write access to one leg of a session.
//!
//! Each session splits its two sockets into read and write halves. The write
//! halves are wrapped in [`ConnectionHandle`]s shared between the directional
//! pipelines and the handlers running inside them, so a handler can inject
//! out-of-band traffic towards either peer. Writes are serialised by an async
//! mutex; a frame is always written and flushed as one unit.

use std::{io, net::SocketAddr, sync::Arc};

use bytes::BytesMut;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};

use crate::{codec::encode_packet, packet::Packet};

type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Handle for writing to one peer of a session.
#[derive(Clone)]
pub struct ConnectionHandle {
    peer: SocketAddr,
    writer: SharedWriter,
}

impl ConnectionHandle {
    /// Wrap a write half together with the peer's remote address.
    pub fn new(peer: SocketAddr, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            peer,
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Remote address of the peer behind this handle.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr { self.peer }

    /// Write raw bytes to the peer and flush.
    ///
    /// The bytes are sent verbatim; callers are responsible for framing.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if the write or flush fails.
    pub async fn send_raw(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await
    }

    /// Encode `packet` as a wire frame and send it to the peer.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if the write or flush fails.
    pub async fn send_packet(&self, packet: &Packet) -> io::Result<()> {
        let mut frame = BytesMut::new();
        encode_packet(packet, &mut frame);
        self.send_raw(&frame).await
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}
