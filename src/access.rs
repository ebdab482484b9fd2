//! Admission control for newly accepted connections.
//!
//! The rule is evaluated against the remote address before the upstream
//! connection is opened. Rejection closes the client socket silently; it is a
//! normal outcome, not an error, and no handler ever runs for a rejected
//! connection.

use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

/// Predicate form of an [`AccessRule`].
pub type AccessPredicate = Arc<dyn Fn(SocketAddr) -> bool + Send + Sync>;

/// Rule deciding whether an accepted connection is admitted.
#[derive(Clone, Default)]
pub enum AccessRule {
    /// Admit every connection.
    #[default]
    Any,
    /// Admit only this exact remote address.
    Addr(IpAddr),
    /// Admit any member of this list.
    List(Vec<IpAddr>),
    /// Admit when the predicate returns `true` for the remote address.
    Predicate(AccessPredicate),
}

impl AccessRule {
    /// Build a predicate rule from a closure.
    pub fn predicate(f: impl Fn(SocketAddr) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Arc::new(f))
    }

    /// Whether a connection from `peer` is admitted.
    #[must_use]
    pub fn admits(&self, peer: SocketAddr) -> bool {
        match self {
            Self::Any => true,
            Self::Addr(addr) => peer.ip() == *addr,
            Self::List(addrs) => addrs.contains(&peer.ip()),
            Self::Predicate(check) => check(peer),
        }
    }
}

impl fmt::Debug for AccessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("Any"),
            Self::Addr(addr) => f.debug_tuple("Addr").field(addr).finish(),
            Self::List(addrs) => f.debug_tuple("List").field(addrs).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl From<IpAddr> for AccessRule {
    fn from(addr: IpAddr) -> Self { Self::Addr(addr) }
}

impl From<Vec<IpAddr>> for AccessRule {
    fn from(addrs: Vec<IpAddr>) -> Self {
        match addrs.len() {
            0 => Self::Any,
            1 => Self::Addr(addrs[0]),
            _ => Self::List(addrs),
        }
    }
}
