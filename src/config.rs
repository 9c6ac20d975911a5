//! Service configuration from CLI flags and environment variables.

use std::net::SocketAddr;

use clap::Parser;

/// CMDB resource-change event distribution service.
#[derive(Debug, Clone, Parser)]
#[command(name = "alder", version, about)]
pub struct Config {
    /// Address the watch API listens on.
    #[arg(long, env = "ALDER_HTTP_ADDR", default_value = "127.0.0.1:9104")]
    pub http_addr: SocketAddr,

    /// Identity of this distributor instance within the hash ring.
    #[arg(long, env = "ALDER_NODE_ID", default_value = "alder-0")]
    pub node_id: String,

    /// Comma-separated identities of all live distributor instances.
    /// Defaults to a single-instance ring owning every subscriber.
    #[arg(long, env = "ALDER_RING_NODES", value_delimiter = ',', default_value = "alder-0")]
    pub ring_nodes: Vec<String>,

    /// Log filter (tracing EnvFilter syntax).
    #[arg(long, env = "ALDER_LOG", default_value = "info")]
    pub log_level: String,
}
