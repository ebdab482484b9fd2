//! Transparent TCP intercepting proxy for packet-framed binary protocols.
//!
//! `tapwire` sits between a real client and a real server, relays bytes in
//! both directions, and runs an ordered, filterable chain of pluggable
//! handlers against every individual packet before forwarding it. This
//! enables logging, protocol reverse-engineering, and traffic modification
//! without touching either endpoint.
//!
//! Packets are framed as `[opcode][length][payload]` with compact
//! variable-length integer headers. Each admitted connection becomes an
//! independent session with two directional pipelines; within a direction,
//! handler chains run strictly sequentially per packet, which preserves
//! ordering and provides natural backpressure.
//!
//! ```no_run
//! use tapwire::{HandlerSpec, LoggingHandler, ProxyConfig, ProxyServer};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), tapwire::ProxyError> {
//! let config = ProxyConfig::new(
//!     "127.0.0.1:29000".parse().expect("listen addr"),
//!     "10.0.0.2:29000".parse().expect("upstream addr"),
//! );
//! ProxyServer::new(config)
//!     .client_handlers(LoggingHandler::spec("client"))
//!     .server_handlers(LoggingHandler::spec("server"))
//!     .bind()
//!     .await?
//!     .run()
//!     .await
//! # }
//! ```

pub mod access;
pub mod codec;
pub mod config;
pub mod connection;
pub mod handler;
pub mod metrics;
pub mod packet;
mod pipeline;
pub mod server;
pub mod session;

pub use access::{AccessPredicate, AccessRule};
pub use codec::{CodecError, PacketCodec, encode_packet, put_cuint};
pub use config::ProxyConfig;
pub use connection::ConnectionHandle;
pub use handler::{
    FnHandler,
    Handler,
    HandlerChain,
    HandlerError,
    HandlerSpec,
    Handlers,
    LoggingHandler,
    flatten,
};
pub use packet::Packet;
pub use pipeline::Direction;
pub use server::{ProxyError, ProxyServer};
pub use session::{SessionId, SessionRegistry};
