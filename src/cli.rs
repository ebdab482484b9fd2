//! Command line interface for the `tapwire` binary.

use std::net::{IpAddr, SocketAddr};

use clap::{ArgAction, Parser};

use tapwire::config::{DEFAULT_BUFFER_FREE_SPACE_GC, DEFAULT_BUFFER_SIZE};

/// Command line arguments for the `tapwire` binary.
#[derive(Debug, Parser)]
#[command(
    name = "tapwire",
    version,
    about = "Transparent TCP intercepting proxy for packet-framed binary protocols"
)]
pub struct Cli {
    /// Address to listen on.
    #[arg(short, long)]
    pub listen: SocketAddr,

    /// Address of the upstream server.
    #[arg(short, long)]
    pub upstream: SocketAddr,

    /// Admit only these client IPs; repeat for a list. Admits everyone when
    /// absent.
    #[arg(long = "allow", value_name = "IP")]
    pub allow: Vec<IpAddr>,

    /// Maximum unparsed bytes buffered per direction.
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,

    /// Consumed-space threshold before the frame buffer is compacted.
    #[arg(long, default_value_t = DEFAULT_BUFFER_FREE_SPACE_GC)]
    pub buffer_free_space_gc: usize,

    /// Leave Nagle's algorithm enabled instead of setting TCP_NODELAY.
    #[arg(long = "nagle", action = ArgAction::SetFalse)]
    pub no_delay: bool,

    /// Emit a trace for every client connect and disconnect.
    #[arg(long)]
    pub log_connections: bool,
}
