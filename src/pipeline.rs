//! Per-direction relay loop.
//!
//! One [`Pipeline`] owns one socket read half and drives it as a framed
//! stream of packets: pull one packet, run the direction's handler chain to
//! completion, then either re-encode and forward the packet or drop it if a
//! handler failed. Only then is the next packet pulled. That single
//! packet-in-flight discipline is the backpressure mechanism: a slow handler
//! stops consumption from the socket, which backs up the OS buffer and
//! throttles the sender. It also makes per-direction ordering absolute.
//!
//! Cancellation is checked between packets only: a chain already mid-flight
//! when the session tears down runs to completion or fails naturally. A write
//! against a closed peer surfaces as an ordinary I/O error.

use bytes::BytesMut;
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::{codec::FramedRead, sync::CancellationToken};

use crate::{
    codec::{CodecError, PacketCodec, encode_packet},
    connection::ConnectionHandle,
    handler::HandlerChain,
    metrics,
};

/// Direction of packet flow within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Packets sent by the client, bound for the upstream server.
    ClientToServer,
    /// Packets sent by the upstream server, bound for the client.
    ServerToClient,
}

impl Direction {
    /// Short label used in traces and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::ClientToServer => "client",
            Direction::ServerToClient => "server",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relay loop for one direction of a session.
pub(crate) struct Pipeline {
    direction: Direction,
    chain: HandlerChain,
    inbound: ConnectionHandle,
    outbound: ConnectionHandle,
    shutdown: CancellationToken,
}

impl Pipeline {
    pub(crate) fn new(
        direction: Direction,
        chain: HandlerChain,
        inbound: ConnectionHandle,
        outbound: ConnectionHandle,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            direction,
            chain,
            inbound,
            outbound,
            shutdown,
        }
    }

    /// Relay packets from `reader` until EOF, error, or cancellation.
    ///
    /// Returns `Ok(())` on a clean close or cancellation; socket and codec
    /// failures surface as errors and trigger session teardown in the caller.
    pub(crate) async fn run(
        &self,
        reader: impl AsyncRead + Unpin,
        codec: PacketCodec,
    ) -> Result<(), CodecError> {
        let mut frames = FramedRead::new(reader, codec);
        loop {
            // The next packet is pulled only once the previous chain pass has
            // fully resolved, so ordering and backpressure hold by construction.
            let next = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                next = frames.next() => next,
            };
            let mut packet = match next {
                Some(Ok(packet)) => packet,
                Some(Err(error)) => return Err(error),
                None => break,
            };

            match self
                .chain
                .dispatch(&mut packet, &self.inbound, &self.outbound)
                .await
            {
                Ok(()) => {
                    let mut frame = BytesMut::new();
                    encode_packet(&packet, &mut frame);
                    self.outbound.send_raw(&frame).await?;
                    metrics::inc_forwarded(self.direction);
                }
                Err(error) => {
                    tracing::debug!(
                        direction = %self.direction,
                        opcode = packet.opcode,
                        %error,
                        "handler failed; packet dropped"
                    );
                    metrics::inc_dropped(self.direction);
                }
            }
        }
        Ok(())
    }
}
