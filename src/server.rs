//! Tokio-based proxy listener.
//!
//! [`ProxyServer`] binds one TCP listener, accepts connections concurrently,
//! applies the configured access rule, and spawns an independent [`Session`]
//! per admitted connection. Accept failures are retried with exponential
//! backoff and never crash the host process; bind failures are reported to
//! the embedding caller together with the offending configuration. Shutdown
//! cancels the listener token, which cascades into every live session, then
//! waits for the session tasks to drain.

use std::{io, net::SocketAddr, sync::Arc};

use log::warn;
use thiserror::Error;
use tokio::{
    net::TcpListener,
    signal,
    time::{Duration, sleep},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    config::ProxyConfig,
    handler::{HandlerChain, Handlers},
    metrics,
    session::{Session, SessionRegistry},
};

const ACCEPT_BACKOFF_INITIAL: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Errors that may occur while setting up or running the proxy.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Binding the listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that could not be bound.
        addr: SocketAddr,
        /// The underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The server was run before being bound to a listener.
    #[error("proxy is not bound to a listener")]
    NotBound,
}

/// Intercepting proxy instance: one listener, one upstream.
pub struct ProxyServer {
    config: Arc<ProxyConfig>,
    client_chain: HandlerChain,
    server_chain: HandlerChain,
    registry: Arc<SessionRegistry>,
    listener: Option<TcpListener>,
}

impl ProxyServer {
    /// Create a proxy from its immutable configuration.
    #[must_use]
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config: Arc::new(config),
            client_chain: HandlerChain::default(),
            server_chain: HandlerChain::default(),
            registry: Arc::new(SessionRegistry::default()),
            listener: None,
        }
    }

    /// Install the handler chain applied to client-origin packets.
    ///
    /// Accepts arbitrarily nested registrations; they are flattened
    /// depth-first into one ordered chain at this point.
    #[must_use]
    pub fn client_handlers(mut self, handlers: impl Into<Handlers>) -> Self {
        self.client_chain = HandlerChain::new(handlers);
        self
    }

    /// Install the handler chain applied to server-origin packets.
    #[must_use]
    pub fn server_handlers(mut self, handlers: impl Into<Handlers>) -> Self {
        self.server_chain = HandlerChain::new(handlers);
        self
    }

    /// Registry of live sessions, for diagnostics or targeted teardown.
    #[must_use]
    pub fn registry(&self) -> Arc<SessionRegistry> { Arc::clone(&self.registry) }

    /// Bind the listener to the configured address.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Bind`] if binding fails. The failure is also
    /// logged together with the configuration that produced it.
    pub async fn bind(mut self) -> Result<Self, ProxyError> {
        let addr = self.config.listen_addr;
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                tracing::info!(listen = %addr, upstream = %self.config.upstream_addr, "proxy started");
                self.listener = Some(listener);
                Ok(self)
            }
            Err(source) => {
                tracing::error!(config = ?self.config, %source, "proxy failed to bind");
                Err(ProxyError::Bind { addr, source })
            }
        }
    }

    /// Address the listener is actually bound to.
    ///
    /// Useful when binding to port 0.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// Run the proxy until Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::NotBound`] if [`bind`](Self::bind) was not
    /// called first.
    pub async fn run(self) -> Result<(), ProxyError> {
        self.run_with_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    /// Run the proxy until the `shutdown` future resolves.
    ///
    /// Shutdown stops accepting, tears down live sessions, and waits for
    /// their tasks to finish.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::NotBound`] if [`bind`](Self::bind) was not
    /// called first.
    pub async fn run_with_shutdown(
        self,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<(), ProxyError> {
        let listener = self.listener.ok_or(ProxyError::NotBound)?;
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();

        tokio::pin!(shutdown);
        let mut delay = ACCEPT_BACKOFF_INITIAL;
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        delay = ACCEPT_BACKOFF_INITIAL;
                        if self.config.access.admits(peer) {
                            let session = Session::new(
                                Arc::clone(&self.config),
                                self.client_chain.clone(),
                                self.server_chain.clone(),
                                Arc::clone(&self.registry),
                                &token,
                            );
                            tracker.spawn(session.run(stream, peer));
                        } else {
                            // Silent close: no upstream connect, no handlers.
                            tracing::debug!(client = %peer, "connection rejected by access rule");
                            metrics::inc_rejected();
                        }
                    }
                    Err(error) => {
                        warn!("accept failed for {:?}: {error}", self.config);
                        sleep(delay).await;
                        delay = (delay * 2).min(ACCEPT_BACKOFF_MAX);
                    }
                },
            }
        }

        // Stop the listener, latch teardown for every live session, then
        // wait for their tasks to drain.
        drop(listener);
        token.cancel();
        tracker.close();
        tracker.wait().await;
        Ok(())
    }
}
