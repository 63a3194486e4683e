use std::path::PathBuf;
use std::time::Duration;

use crate::codec::DEFAULT_MAX_REQUEST_SIZE;

pub const DEFAULT_ADDR: &str = "127.0.0.1:6379";

/// Server configuration. `None` disables a listener, a zero duration disables the feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// TCP address to listen on.
    pub addr: Option<String>,
    /// Unix socket path to listen on. A stale socket file at this path is removed first.
    pub socket: Option<PathBuf>,
    /// TCP keep-alive interval for accepted TCP connections.
    pub tcp_keepalive: Duration,
    /// Idle deadline for every read and write on a connection.
    pub timeout: Duration,
    /// Largest request the codec buffers before rejecting it.
    pub max_request_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: Some(DEFAULT_ADDR.to_string()),
            socket: None,
            tcp_keepalive: Duration::ZERO,
            timeout: Duration::ZERO,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
        }
    }
}

impl Config {
    /// Sets the TCP address. An empty string disables TCP.
    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        let addr = addr.into();
        self.addr = (!addr.is_empty()).then_some(addr);
        self
    }

    pub fn without_addr(mut self) -> Self {
        self.addr = None;
        self
    }

    /// Sets the Unix socket path. An empty path disables the Unix listener.
    pub fn with_socket(mut self, socket: impl Into<PathBuf>) -> Self {
        let socket = socket.into();
        self.socket = (!socket.as_os_str().is_empty()).then_some(socket);
        self
    }

    pub fn with_tcp_keepalive(mut self, interval: Duration) -> Self {
        self.tcp_keepalive = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_request_size(mut self, size: usize) -> Self {
        self.max_request_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_listens_on_tcp_only() {
        let config = Config::default();
        assert_eq!(config.addr.as_deref(), Some(DEFAULT_ADDR));
        assert!(config.socket.is_none());
        assert!(config.timeout.is_zero());
        assert!(config.tcp_keepalive.is_zero());
    }

    #[test]
    fn empty_values_disable_listeners() {
        let config = Config::default().with_addr("").with_socket("");
        assert!(config.addr.is_none());
        assert!(config.socket.is_none());

        let config = Config::default()
            .with_addr("0.0.0.0:7000")
            .with_socket("/tmp/respite.sock");
        assert_eq!(config.addr.as_deref(), Some("0.0.0.0:7000"));
        assert_eq!(config.socket, Some(PathBuf::from("/tmp/respite.sock")));
    }
}
