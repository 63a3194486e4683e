pub mod codec;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod handler;
pub mod registry;
pub mod request;
pub mod responder;
pub mod server;
pub mod session;
pub mod stats;

pub use config::Config;
pub use error::{ClientError, ServerError};
pub use handler::Handler;
pub use request::Request;
pub use responder::Responder;
pub use server::Server;
pub use session::Session;
pub use stats::{ClientInfo, ServerInfo, StatsSnapshot};

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;
