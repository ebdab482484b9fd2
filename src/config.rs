//! Proxy configuration.
//!
//! [`ProxyConfig`] is built once at startup and shared read-only across every
//! session; nothing mutates it after construction.

use std::net::SocketAddr;

use crate::access::AccessRule;

/// Default cap on retained unparsed bytes per direction (10 MiB).
pub const DEFAULT_BUFFER_SIZE: usize = 10 * 1024 * 1024;

/// Default threshold of consumed front-of-buffer bytes before the codec
/// reclaims space (1 MiB).
pub const DEFAULT_BUFFER_FREE_SPACE_GC: usize = 1024 * 1024;

/// Immutable configuration for one proxy instance.
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    /// Address the listener binds to.
    pub listen_addr: SocketAddr,
    /// Address of the single upstream server.
    pub upstream_addr: SocketAddr,
    /// Admission rule applied to each accepted connection.
    pub access: AccessRule,
    /// Maximum unparsed bytes retained by the framing codec per direction.
    pub buffer_size: usize,
    /// Consumed-space threshold at which the codec compacts its buffer.
    pub buffer_free_space_gc: usize,
    /// Whether `TCP_NODELAY` is set on both legs of every session.
    pub no_delay: bool,
    /// Whether connect/disconnect traces are emitted at info level.
    pub log_connections: bool,
}

impl ProxyConfig {
    /// Build a configuration with the default buffer sizes, `TCP_NODELAY`
    /// enabled, connection logging off, and every client admitted.
    #[must_use]
    pub fn new(listen_addr: SocketAddr, upstream_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            upstream_addr,
            access: AccessRule::Any,
            buffer_size: DEFAULT_BUFFER_SIZE,
            buffer_free_space_gc: DEFAULT_BUFFER_FREE_SPACE_GC,
            no_delay: true,
            log_connections: false,
        }
    }

    /// Replace the admission rule.
    #[must_use]
    pub fn access(mut self, rule: impl Into<AccessRule>) -> Self {
        self.access = rule.into();
        self
    }

    /// Override the codec buffer limits.
    #[must_use]
    pub fn buffers(mut self, buffer_size: usize, buffer_free_space_gc: usize) -> Self {
        self.buffer_size = buffer_size;
        self.buffer_free_space_gc = buffer_free_space_gc;
        self
    }

    /// Toggle `TCP_NODELAY` on proxied connections.
    #[must_use]
    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = enabled;
        self
    }

    /// Toggle the human-readable connect/disconnect traces.
    #[must_use]
    pub fn log_connections(mut self, enabled: bool) -> Self {
        self.log_connections = enabled;
        self
    }
}
