//! Binary entry point for the `tapwire` proxy.
//!
//! Parses CLI arguments into a [`ProxyConfig`] and runs the proxy until
//! Ctrl+C. Embedding applications should use the library API directly and
//! register their own handler chains.

mod cli;

use clap::Parser;
use tapwire::{AccessRule, ProxyConfig, ProxyError, ProxyServer};

#[tokio::main]
async fn main() -> Result<(), ProxyError> {
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    let config = ProxyConfig::new(cli.listen, cli.upstream)
        .access(AccessRule::from(cli.allow))
        .buffers(cli.buffer_size, cli.buffer_free_space_gc)
        .no_delay(cli.no_delay)
        .log_connections(cli.log_connections);

    ProxyServer::new(config).bind().await?.run().await
}
