use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use respite::config::DEFAULT_ADDR;
use respite::{commands, Config, Error, Server};
use tracing::{debug, info};

#[derive(Parser, Debug)]
struct Args {
    /// TCP address to listen on, empty to disable
    #[arg(short, long, env = "RESPITE_ADDR", default_value = DEFAULT_ADDR)]
    addr: String,

    /// Unix socket path to listen on
    #[arg(short, long, env = "RESPITE_SOCKET")]
    socket: Option<PathBuf>,

    /// TCP keep-alive interval in seconds, 0 to disable
    #[arg(long, env = "RESPITE_TCP_KEEPALIVE", default_value_t = 0)]
    tcp_keepalive: u64,

    /// Close connections idle for this many seconds, 0 to disable
    #[arg(short, long, env = "RESPITE_TIMEOUT", default_value_t = 0)]
    timeout: u64,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        let mut config = Config::default()
            .with_addr(args.addr)
            .with_tcp_keepalive(Duration::from_secs(args.tcp_keepalive))
            .with_timeout(Duration::from_secs(args.timeout));
        if let Some(socket) = args.socket {
            config = config.with_socket(socket);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let args = Args::parse();

    let mut server = Server::new(Config::from(args));
    commands::register_defaults(&mut server);

    tokio::select! {
        res = server.start() => res?,
        _ = tokio::signal::ctrl_c() => info!("Interrupt received"),
    }

    server.shutdown().await
}
