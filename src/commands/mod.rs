//! Connection-level handlers that most servers want. None of them touch application data.

pub mod client;
pub mod echo;
pub mod info;
pub mod ping;
pub mod quit;

use crate::server::Server;

use client::Client;
use echo::Echo;
use info::Info;
use ping::Ping;
use quit::Quit;

/// Registers `PING`, `ECHO`, `QUIT`, `INFO` and `CLIENT` on `server`.
pub fn register_defaults(server: &mut Server) {
    let info = server.info();
    server
        .handle("ping", Ping)
        .handle("echo", Echo)
        .handle("quit", Quit)
        .handle("info", Info::new(info.clone()))
        .handle("client", Client::new(info));
}
