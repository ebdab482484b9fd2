//! Paired-connection session lifecycle.
//!
//! A [`Session`] owns one admitted client connection and its upstream
//! counterpart. The upstream connection is opened first; only once that
//! succeeds are the two directional pipelines wired. Teardown is latched by a
//! [`CancellationToken`]: the first close-or-error on either leg cancels it,
//! which stops both pipelines at their next packet boundary and releases both
//! sockets. Cancelling an already-cancelled token is a no-op, so teardown is
//! idempotent and runs exactly once per session.
//!
//! Live sessions are tracked in a [`SessionRegistry`] so embedding code can
//! enumerate or cancel them.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::{
    codec::PacketCodec,
    config::ProxyConfig,
    connection::ConnectionHandle,
    handler::HandlerChain,
    metrics,
    pipeline::{Direction, Pipeline},
};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier assigned to a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self { Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

/// Concurrent registry of live sessions keyed by [`SessionId`].
///
/// Each entry holds the session's teardown token; cancelling it closes both
/// legs of that session. Entries are removed when the session ends.
#[derive(Default)]
pub struct SessionRegistry(DashMap<SessionId, CancellationToken>);

impl SessionRegistry {
    fn insert(&self, id: SessionId, latch: &CancellationToken) {
        self.0.insert(id, latch.clone());
    }

    fn remove(&self, id: &SessionId) { self.0.remove(id); }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Whether no sessions are live.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// IDs of all live sessions.
    #[must_use]
    pub fn active_ids(&self) -> Vec<SessionId> {
        self.0.iter().map(|entry| *entry.key()).collect()
    }

    /// Tear down the session with the given id, if it is still live.
    ///
    /// Returns whether a live session was found.
    pub fn shutdown(&self, id: &SessionId) -> bool {
        self.0.get(id).is_some_and(|entry| {
            entry.value().cancel();
            true
        })
    }
}

/// One admitted client connection paired with its upstream connection.
pub(crate) struct Session {
    id: SessionId,
    config: Arc<ProxyConfig>,
    client_chain: HandlerChain,
    server_chain: HandlerChain,
    registry: Arc<SessionRegistry>,
    latch: CancellationToken,
}

impl Session {
    /// Prepare a session for an admitted client connection.
    ///
    /// `shutdown` is the listener's token; the session derives its teardown
    /// latch from it so a listener shutdown also tears down live sessions.
    pub(crate) fn new(
        config: Arc<ProxyConfig>,
        client_chain: HandlerChain,
        server_chain: HandlerChain,
        registry: Arc<SessionRegistry>,
        shutdown: &CancellationToken,
    ) -> Self {
        Self {
            id: SessionId::next(),
            config,
            client_chain,
            server_chain,
            registry,
            latch: shutdown.child_token(),
        }
    }

    /// Run the session to completion.
    ///
    /// Connects upstream, relays both directions, and tears down both legs
    /// when either closes or fails. Errors end the session rather than
    /// propagate; the listener is unaffected.
    pub(crate) async fn run(self, client: TcpStream, peer: SocketAddr) {
        let upstream = match TcpStream::connect(self.config.upstream_addr).await {
            Ok(upstream) => upstream,
            Err(error) => {
                tracing::warn!(
                    session = %self.id,
                    upstream = %self.config.upstream_addr,
                    %error,
                    "upstream connect failed"
                );
                // Dropping `client` closes it; no leg is left unpaired.
                return;
            }
        };
        // If the client vanished while the connect was in flight, the first
        // read below returns EOF immediately and teardown releases the
        // freshly opened upstream connection rather than leaking it.

        if let Err(error) = client.set_nodelay(self.config.no_delay) {
            tracing::warn!(session = %self.id, %error, "failed to set nodelay on client leg");
        }
        if let Err(error) = upstream.set_nodelay(self.config.no_delay) {
            tracing::warn!(session = %self.id, %error, "failed to set nodelay on upstream leg");
        }

        if self.config.log_connections {
            tracing::info!(session = %self.id, client = %peer, "client connected");
        }
        self.registry.insert(self.id, &self.latch);
        metrics::inc_sessions();

        let (client_read, client_write) = client.into_split();
        let (upstream_read, upstream_write) = upstream.into_split();
        let client_handle = ConnectionHandle::new(peer, client_write);
        let upstream_handle = ConnectionHandle::new(self.config.upstream_addr, upstream_write);

        let codec = PacketCodec::from_config(&self.config);
        let client_origin = Pipeline::new(
            Direction::ClientToServer,
            self.client_chain.clone(),
            client_handle.clone(),
            upstream_handle.clone(),
            self.latch.clone(),
        );
        let server_origin = Pipeline::new(
            Direction::ServerToClient,
            self.server_chain.clone(),
            upstream_handle,
            client_handle,
            self.latch.clone(),
        );

        // The first leg to finish, whether clean EOF, socket error, or codec
        // error, cancels the latch; the other pipeline stops at its next
        // packet boundary. Both sockets close when the handles drop below.
        let client_leg = async {
            let result = client_origin.run(client_read, codec.clone()).await;
            self.latch.cancel();
            result
        };
        let server_leg = async {
            let result = server_origin.run(upstream_read, codec.clone()).await;
            self.latch.cancel();
            result
        };
        let (client_result, server_result) = tokio::join!(client_leg, server_leg);

        for (direction, result) in [
            (Direction::ClientToServer, client_result),
            (Direction::ServerToClient, server_result),
        ] {
            if let Err(error) = result {
                tracing::debug!(session = %self.id, %direction, %error, "relay leg ended");
            }
        }

        self.registry.remove(&self.id);
        metrics::dec_sessions();
        if self.config.log_connections {
            tracing::info!(session = %self.id, client = %peer, "client disconnected");
        }
    }
}
