//! Pluggable packet inspection and mutation.
//!
//! A [`Handler`] is invoked with one decoded [`Packet`] plus handles to both
//! legs of the session: `inbound` is the socket the packet arrived on,
//! `outbound` the socket it is bound for. Completion is the async return;
//! returning an error drops the current packet without affecting later ones.
//!
//! Handlers are registered per direction as a [`Handlers`] tree (a single
//! spec or an arbitrarily nested group) and flattened depth-first into an
//! immutable [`HandlerChain`] at configuration time. Each [`HandlerSpec`] may
//! restrict itself to a set of opcodes (`only`) or exclude some (`except`);
//! a filtered-out handler completes immediately without running.

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::{connection::ConnectionHandle, packet::Packet};

/// Failure value signalled by a handler; local to one packet.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Asynchronous packet inspection or mutation logic.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Inspect or mutate `packet`.
    ///
    /// The handler may resize or rewrite `packet.payload` and change
    /// `packet.opcode`; the frame is re-encoded from the current values after
    /// the chain completes. The connection handles allow out-of-band sends at
    /// the handler's own responsibility.
    ///
    /// # Errors
    ///
    /// Returning an error stops the chain and drops this packet. Subsequent
    /// packets are processed normally.
    async fn handle(
        &self,
        packet: &mut Packet,
        inbound: &ConnectionHandle,
        outbound: &ConnectionHandle,
    ) -> Result<(), HandlerError>;
}

/// Adapter letting a closure returning a boxed future act as a [`Handler`].
pub struct FnHandler<F>(F);

impl<F> FnHandler<F>
where
    F: for<'a> Fn(
            &'a mut Packet,
            &'a ConnectionHandle,
            &'a ConnectionHandle,
        ) -> BoxFuture<'a, Result<(), HandlerError>>
        + Send
        + Sync,
{
    /// Wrap `f` as a handler.
    pub fn new(f: F) -> Self { Self(f) }
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(
            &'a mut Packet,
            &'a ConnectionHandle,
            &'a ConnectionHandle,
        ) -> BoxFuture<'a, Result<(), HandlerError>>
        + Send
        + Sync,
{
    async fn handle(
        &self,
        packet: &mut Packet,
        inbound: &ConnectionHandle,
        outbound: &ConnectionHandle,
    ) -> Result<(), HandlerError> {
        (self.0)(packet, inbound, outbound).await
    }
}

/// One handler together with its opcode filter.
#[derive(Clone)]
pub struct HandlerSpec {
    handler: Arc<dyn Handler>,
    only: Option<HashSet<u32>>,
    except: Option<HashSet<u32>>,
}

impl HandlerSpec {
    /// Wrap `handler` with no opcode filter.
    pub fn new(handler: impl Handler + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
            only: None,
            except: None,
        }
    }

    /// Run only for the given opcodes.
    #[must_use]
    pub fn only(mut self, opcodes: impl IntoIterator<Item = u32>) -> Self {
        self.only = Some(opcodes.into_iter().collect());
        self
    }

    /// Skip the given opcodes.
    #[must_use]
    pub fn except(mut self, opcodes: impl IntoIterator<Item = u32>) -> Self {
        self.except = Some(opcodes.into_iter().collect());
        self
    }

    /// Whether this handler runs for `opcode`.
    #[must_use]
    pub fn applies_to(&self, opcode: u32) -> bool {
        if let Some(only) = &self.only
            && !only.contains(&opcode)
        {
            return false;
        }
        if let Some(except) = &self.except
            && except.contains(&opcode)
        {
            return false;
        }
        true
    }
}

impl std::fmt::Debug for HandlerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerSpec")
            .field("only", &self.only)
            .field("except", &self.except)
            .finish_non_exhaustive()
    }
}

/// Possibly nested handler registration input.
#[derive(Clone, Debug)]
pub enum Handlers {
    /// A single handler spec.
    One(HandlerSpec),
    /// An ordered group of nested registrations.
    Group(Vec<Handlers>),
}

impl From<HandlerSpec> for Handlers {
    fn from(spec: HandlerSpec) -> Self { Self::One(spec) }
}

impl From<Vec<Handlers>> for Handlers {
    fn from(group: Vec<Handlers>) -> Self { Self::Group(group) }
}

impl From<Vec<HandlerSpec>> for Handlers {
    fn from(specs: Vec<HandlerSpec>) -> Self {
        Self::Group(specs.into_iter().map(Handlers::One).collect())
    }
}

/// Flatten a registration tree depth-first, preserving order.
#[must_use]
pub fn flatten(handlers: Handlers) -> Vec<HandlerSpec> {
    match handlers {
        Handlers::One(spec) => vec![spec],
        Handlers::Group(group) => group.into_iter().flat_map(flatten).collect(),
    }
}

/// Immutable, ordered chain of handlers for one direction.
#[derive(Clone, Debug)]
pub struct HandlerChain {
    specs: Arc<[HandlerSpec]>,
}

impl HandlerChain {
    /// Build a chain by flattening `handlers` depth-first.
    #[must_use]
    pub fn new(handlers: impl Into<Handlers>) -> Self {
        Self {
            specs: flatten(handlers.into()).into(),
        }
    }

    /// Number of handlers in the chain.
    #[must_use]
    pub fn len(&self) -> usize { self.specs.len() }

    /// Whether the chain holds no handlers.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.specs.is_empty() }

    /// Run every applicable handler against `packet`, strictly in order.
    ///
    /// Handler `i + 1` starts only after handler `i` has resolved. A
    /// filtered-out handler is skipped without side effects.
    ///
    /// # Errors
    ///
    /// Propagates the first handler failure; no further handlers run for this
    /// packet.
    pub async fn dispatch(
        &self,
        packet: &mut Packet,
        inbound: &ConnectionHandle,
        outbound: &ConnectionHandle,
    ) -> Result<(), HandlerError> {
        for spec in self.specs.iter() {
            if !spec.applies_to(packet.opcode) {
                continue;
            }
            spec.handler.handle(packet, inbound, outbound).await?;
        }
        Ok(())
    }
}

impl Default for HandlerChain {
    fn default() -> Self {
        Self {
            specs: Arc::from(Vec::new()),
        }
    }
}

/// Handler that traces every packet it sees.
///
/// Logs the configured title, the opcode, the parsed length, and the payload
/// bytes at info level. Combine with [`HandlerSpec::only`] or
/// [`HandlerSpec::except`] to narrow it to interesting opcodes.
pub struct LoggingHandler {
    title: String,
}

impl LoggingHandler {
    /// Create a logging handler labelled with `title`.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }

    /// Convenience: a [`HandlerSpec`] wrapping a new logging handler.
    #[must_use]
    pub fn spec(title: impl Into<String>) -> HandlerSpec {
        HandlerSpec::new(Self::new(title))
    }
}

#[async_trait]
impl Handler for LoggingHandler {
    async fn handle(
        &self,
        packet: &mut Packet,
        _inbound: &ConnectionHandle,
        _outbound: &ConnectionHandle,
    ) -> Result<(), HandlerError> {
        tracing::info!(
            title = %self.title,
            opcode = packet.opcode,
            length = packet.parsed_len(),
            payload = ?&packet.payload[..],
            "packet"
        );
        Ok(())
    }
}
