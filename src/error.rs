use std::path::PathBuf;
use thiserror::Error as ThisError;

use crate::Error;

/// An application-level failure of a single command.
///
/// Returning a `ClientError` (boxed into [`crate::Error`]) from a handler ends that command with
/// an error reply but keeps the connection open, so pipelined commands behind it are still
/// served. Any other error type returned by a handler closes the connection after the reply.
#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum ClientError {
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongNumberOfArguments(String),
    #[error("ERR invalid argument '{argument}' for '{command}' command")]
    InvalidArgument { command: String, argument: String },
    #[error("{0}")]
    Custom(String),
}

impl ClientError {
    /// Builds a custom error reply. The message is sent verbatim, so by convention it starts
    /// with an upper case error code such as `ERR` or `WRONGTYPE`.
    pub fn custom(message: impl Into<String>) -> Self {
        ClientError::Custom(message.into())
    }
}

#[derive(Debug, ThisError)]
pub enum ServerError {
    #[error("server closed")]
    Closed,
    #[error("server already started")]
    AlreadyStarted,
    #[error("no listener configured, set an address or a socket path")]
    NoListeners,
    #[error("socket path {0} is occupied by a file that is not a socket")]
    SocketPathOccupied(PathBuf),
    #[error("idle timeout elapsed")]
    IdleTimeout,
}

/// Reports whether an error keeps the connection open.
pub fn is_recoverable(err: &Error) -> bool {
    err.is::<ClientError>()
}

pub(crate) fn is_idle_timeout(err: &Error) -> bool {
    matches!(err.downcast_ref::<ServerError>(), Some(ServerError::IdleTimeout))
}

pub(crate) fn is_closed(err: &Error) -> bool {
    matches!(err.downcast_ref::<ServerError>(), Some(ServerError::Closed))
}

/// Renders an error as the message of a RESP error reply.
pub fn reply_message(err: &Error) -> String {
    match err.downcast_ref::<ClientError>() {
        Some(err) => err.to_string(),
        None => format!("ERR {}", err),
    }
}
