use std::io;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;
use uuid::Uuid;

use crate::stats::ClientInfo;

/// A handle onto a session's socket, used to tear the connection down from outside the task that
/// serves it. It is a duplicate of the descriptor the serve loop reads from, so shutting it down
/// closes the connection for both sides immediately.
#[derive(Debug)]
pub(crate) enum Transport {
    Tcp(std::net::TcpStream),
    Unix(UnixStream),
}

impl Transport {
    fn shutdown(&self) -> io::Result<()> {
        let res = match self {
            Transport::Tcp(stream) => stream.shutdown(Shutdown::Both),
            Transport::Unix(stream) => stream.shutdown(Shutdown::Both),
        };

        // The peer may already be gone.
        match res {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            res => res,
        }
    }
}

/// Server-side state of one accepted connection, from accept to close.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    addr: String,
    created: Instant,
    transport: Option<Transport>,
    closed: CancellationToken,
    quit: AtomicBool,
    commands: AtomicU64,
    activity: Mutex<Activity>,
}

#[derive(Debug)]
struct Activity {
    last_command: Option<String>,
    last_active: Instant,
}

impl Session {
    pub(crate) fn new(addr: String, transport: Option<Transport>) -> Session {
        let now = Instant::now();
        Session {
            id: Uuid::new_v4(),
            addr,
            created: now,
            transport,
            closed: CancellationToken::new(),
            quit: AtomicBool::new(false),
            commands: AtomicU64::new(0),
            activity: Mutex::new(Activity {
                last_command: None,
                last_active: now,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The peer address, or the socket path for Unix connections.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Asks the server to close the connection once the current reply has been written.
    pub fn set_quit(&self) {
        self.quit.store(true, Ordering::Release);
    }

    pub fn is_quit(&self) -> bool {
        self.quit.load(Ordering::Acquire)
    }

    pub fn commands_processed(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }

    pub fn last_command(&self) -> Option<String> {
        self.activity().last_command.clone()
    }

    pub(crate) fn track_command(&self, name: &str) {
        self.commands.fetch_add(1, Ordering::Relaxed);

        let mut activity = self.activity();
        activity.last_active = Instant::now();
        match &mut activity.last_command {
            Some(last) if last == name => {}
            last => *last = Some(name.to_string()),
        }
    }

    /// Shuts the transport down and wakes the serve loop. Calling it more than once is harmless.
    pub fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }

        if let Some(transport) = &self.transport {
            if let Err(e) = transport.shutdown() {
                debug!("Failed to shut down connection {}: {}", self.id, e);
            }
        }
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Completes once [`Session::close`] has been called.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    pub fn info(&self) -> ClientInfo {
        let activity = self.activity();
        ClientInfo {
            id: self.id,
            addr: self.addr.clone(),
            age: self.created.elapsed(),
            idle: activity.last_active.elapsed(),
            commands: self.commands_processed(),
            last_command: activity.last_command.clone(),
        }
    }

    fn activity(&self) -> MutexGuard<'_, Activity> {
        self.activity.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_command_updates_counters() {
        let session = Session::new("127.0.0.1:1234".to_string(), None);
        assert_eq!(session.commands_processed(), 0);
        assert_eq!(session.last_command(), None);

        session.track_command("ping");
        session.track_command("echo");

        assert_eq!(session.commands_processed(), 2);
        assert_eq!(session.last_command(), Some("echo".to_string()));

        let info = session.info();
        assert_eq!(info.id, session.id());
        assert_eq!(info.commands, 2);
        assert_eq!(info.addr, "127.0.0.1:1234");
    }

    #[test]
    fn quit_flag() {
        let session = Session::new("test".to_string(), None);
        assert!(!session.is_quit());
        session.set_quit();
        assert!(session.is_quit());
    }

    #[test]
    fn close_shuts_down_the_transport() {
        let (local, mut remote) = UnixStream::pair().unwrap();
        let session = Session::new("pair".to_string(), Some(Transport::Unix(local)));

        session.close();
        session.close();
        assert!(session.is_closed());

        // The peer observes end of stream.
        let mut buf = [0u8; 1];
        let n = io::Read::read(&mut remote, &mut buf).unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn closed_future_resolves_after_close() {
        let session = std::sync::Arc::new(Session::new("test".to_string(), None));

        let waiter = tokio::spawn({
            let session = session.clone();
            async move { session.closed().await }
        });

        session.close();
        waiter.await.unwrap();
    }
}
