use clap::Parser;
use clap_derive::Parser;
use lrcp::config::LrcpConfig;
use lrcp::server::LrcpServer;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, Level};

/// Line reversal server, speaking LRCP over UDP
#[derive(Parser)]
struct Args {
    /// address to listen on, e.g. 0.0.0.0:10008
    listen_address: Option<String>,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,

    /// close a session when a chunk was re-sent too often instead of just giving up on the chunk
    #[clap(long, default_value_t = false)]
    close_on_resend_exhaustion: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let mut config = match args.listen_address {
        Some(s) => LrcpConfig::new(s.parse::<SocketAddr>()?),
        None => LrcpConfig::default(),
    };
    config.close_session_on_resend_exhaustion = args.close_on_resend_exhaustion;

    let server = LrcpServer::new(Arc::new(config)).await?;
    info!("LRCP server listening on {:?}", server.local_addr()?);
    server.run().await
}
