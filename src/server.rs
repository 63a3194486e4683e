use std::io;
use std::net::SocketAddr;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::codec::RespCodec;
use crate::config::Config;
use crate::connection::Connection;
use crate::error::{self, ClientError, ServerError};
use crate::handler::{CommandTable, Handler};
use crate::registry::SessionRegistry;
use crate::request::Request;
use crate::responder::Responder;
use crate::session::{Session, Transport};
use crate::stats::{ServerInfo, Stats, StatsSnapshot};
use crate::Error;

mod stream;

use stream::AnyStream;

/// Serves the Redis wire protocol with application supplied handlers.
///
/// Register handlers with [`Server::handle`], then share the server (usually behind an
/// [`Arc`]) and run [`Server::start`]. Registration needs `&mut self`, so it cannot race with
/// serving; each start serves from a snapshot of the table taken when it begins.
pub struct Server {
    commands: Arc<CommandTable>,
    shared: Arc<Shared>,
}

/// State shared between the server handle, accept loops and serve loops.
struct Shared {
    config: Config,
    sessions: SessionRegistry,
    stats: Arc<Stats>,
    info: ServerInfo,
    shutdown: CancellationToken,
    closing: AtomicBool,
    started: AtomicBool,
    unix_bound: AtomicBool,
    accept_loops: Mutex<Vec<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl Server {
    pub fn new(config: Config) -> Server {
        let sessions = SessionRegistry::new();
        let stats = Arc::new(Stats::new());
        let info = ServerInfo::new(
            stats.clone(),
            sessions.clone(),
            config.addr.clone(),
            config
                .socket
                .as_ref()
                .map(|path| path.display().to_string()),
        );

        Server {
            commands: Arc::new(CommandTable::default()),
            shared: Arc::new(Shared {
                config,
                sessions,
                stats,
                info,
                shutdown: CancellationToken::new(),
                closing: AtomicBool::new(false),
                started: AtomicBool::new(false),
                unix_bound: AtomicBool::new(false),
                accept_loops: Mutex::new(Vec::new()),
                local_addr: Mutex::new(None),
            }),
        }
    }

    /// Registers `handler` under `name`, compared case-insensitively. Registering the same name
    /// again replaces the previous handler.
    pub fn handle(&mut self, name: &str, handler: impl Handler) -> &mut Self {
        Arc::make_mut(&mut self.commands).insert(name, Arc::new(handler));
        self
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn info(&self) -> ServerInfo {
        self.shared.info.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.info.snapshot()
    }

    /// The bound TCP address, once [`Server::start`] is listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.shared.local_addr)
    }

    /// Resolves `req` to its handler and runs it. Performs no I/O, so it can be used without a
    /// connection.
    pub fn dispatch(&self, req: &Request) -> Result<Responder, Error> {
        dispatch(&self.commands, &self.shared.stats, req)
    }

    /// Opens the configured listeners and serves connections until one of the accept loops
    /// fails. Returns `Ok(())` once the server has been shut down.
    pub async fn start(&self) -> Result<(), Error> {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted.into());
        }
        if self.shared.closing.load(Ordering::SeqCst) {
            return Ok(());
        }

        let listeners = match self.bind().await {
            Ok(listeners) => listeners,
            Err(e) => {
                self.shared.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        // A shutdown that ran while binding found no socket file to remove.
        if self.shared.closing.load(Ordering::SeqCst) {
            drop(listeners);
            self.shared.remove_socket_file()?;
            return Ok(());
        }

        let commands = self.commands.clone();
        info!("Serving {} commands", commands.len());

        let (errs_tx, mut errs_rx) = mpsc::channel(listeners.len());
        {
            let mut accept_loops = lock(&self.shared.accept_loops);
            for listener in listeners {
                accept_loops.push(tokio::spawn(accept_loop(
                    self.shared.clone(),
                    commands.clone(),
                    listener,
                    errs_tx.clone(),
                )));
            }
        }
        drop(errs_tx);

        match errs_rx.recv().await {
            Some(err) if error::is_closed(&err) => Ok(()),
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn bind(&self) -> Result<Vec<Listener>, Error> {
        let config = &self.shared.config;
        let mut listeners = Vec::new();

        if let Some(addr) = &config.addr {
            let listener = TcpListener::bind(addr).await?;
            let local_addr = listener.local_addr()?;
            *lock(&self.shared.local_addr) = Some(local_addr);
            info!("Listening on {}", local_addr);
            listeners.push(Listener::Tcp(listener));
        }

        if let Some(path) = &config.socket {
            let listener = listen_unix(path)?;
            self.shared.unix_bound.store(true, Ordering::SeqCst);
            info!("Listening on unix socket {}", path.display());
            listeners.push(Listener::Unix(listener));
        }

        if listeners.is_empty() {
            return Err(ServerError::NoListeners.into());
        }
        Ok(listeners)
    }

    /// Stops accepting, then closes and forgets every live session. Only the first call does
    /// anything. Returns the first error hit while closing the listeners.
    pub async fn shutdown(&self) -> Result<(), Error> {
        if self.shared.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Shutting down");

        self.shared.shutdown.cancel();

        let accept_loops = std::mem::take(&mut *lock(&self.shared.accept_loops));
        for handle in accept_loops {
            if let Err(e) = handle.await {
                error!("Accept loop panicked: {}", e);
            }
        }

        let result = self.shared.remove_socket_file().map_err(Error::from);

        self.shared.sessions.close_all();
        info!("All client connections closed");

        result
    }
}

impl Shared {
    /// Removes the Unix socket file, but only if this server created it and it is still there.
    fn remove_socket_file(&self) -> io::Result<()> {
        match &self.config.socket {
            Some(path) if self.unix_bound.swap(false, Ordering::SeqCst) => remove_socket_file(path),
            _ => Ok(()),
        }
    }
}

fn dispatch(commands: &CommandTable, stats: &Stats, req: &Request) -> Result<Responder, Error> {
    // Counts attempts, including names that are not registered.
    stats.on_command();

    let handler = commands
        .get(req.name())
        .ok_or_else(|| ClientError::UnknownCommand(req.name().to_string()))?;

    if let Some(session) = req.session() {
        session.track_command(req.name());
    }

    let mut res = Responder::new();
    handler.serve(&mut res, req)?;
    Ok(res)
}

async fn accept_loop(
    shared: Arc<Shared>,
    commands: Arc<CommandTable>,
    listener: Listener,
    errs: mpsc::Sender<Error>,
) {
    let err: Error = loop {
        let accepted = tokio::select! {
            _ = shared.shutdown.cancelled() => break ServerError::Closed.into(),
            accepted = listener.accept() => accepted,
        };

        let (stream, addr) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                break e.into();
            }
        };

        let (stream, transport) = match prepare(stream, &shared.config) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!("Failed to set up connection from {}: {}", addr, e);
                continue;
            }
        };

        debug!("Accepted connection from {}", addr);
        let session = Arc::new(Session::new(addr, Some(transport)));
        shared.stats.on_connect();
        shared.sessions.insert(session.clone());

        // A shutdown that swept the registry before the insert above would miss this session.
        if shared.closing.load(Ordering::SeqCst) {
            shared.sessions.remove(&session.id());
            break ServerError::Closed.into();
        }

        tokio::spawn(serve(shared.clone(), commands.clone(), session, stream));
    };

    // The listener is dropped, and so closed, when this returns.
    let _ = errs.try_send(err);
}

/// Applies socket options and splits off the handle used to force-close the connection.
fn prepare(stream: AnyStream, config: &Config) -> io::Result<(AnyStream, Transport)> {
    match stream {
        AnyStream::Tcp(stream) => {
            if !config.tcp_keepalive.is_zero() {
                let keepalive = TcpKeepalive::new()
                    .with_time(config.tcp_keepalive)
                    .with_interval(config.tcp_keepalive);
                SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;
            }

            let stream = stream.into_std()?;
            let transport = Transport::Tcp(stream.try_clone()?);
            Ok((AnyStream::Tcp(TcpStream::from_std(stream)?), transport))
        }
        AnyStream::Unix(stream) => {
            let stream = stream.into_std()?;
            let transport = Transport::Unix(stream.try_clone()?);
            Ok((AnyStream::Unix(UnixStream::from_std(stream)?), transport))
        }
    }
}

#[instrument(
    name = "connection",
    skip_all,
    fields(connection_id = %session.id(), client_address = %session.addr())
)]
async fn serve(
    shared: Arc<Shared>,
    commands: Arc<CommandTable>,
    session: Arc<Session>,
    stream: AnyStream,
) {
    let codec = RespCodec::new(shared.config.max_request_size);
    let mut conn = Connection::new(stream, codec, shared.config.timeout);

    tokio::select! {
        _ = session.closed() => debug!("Connection closed by server"),
        _ = serve_requests(&mut conn, &commands, &shared.stats, &session) => {}
    }

    shared.sessions.remove(&session.id());
    debug!("Connection closed");
}

async fn serve_requests(
    conn: &mut Connection<AnyStream>,
    commands: &CommandTable,
    stats: &Stats,
    session: &Arc<Session>,
) {
    loop {
        let mut req = match conn.read_request().await {
            Ok(Some(req)) => req,
            Ok(None) => {
                debug!("Client closed connection");
                return;
            }
            Err(e) if error::is_idle_timeout(&e) => {
                debug!("Idle timeout elapsed");
                return;
            }
            Err(e) => {
                // Framing cannot be trusted after a parse failure.
                warn!("Failed to read request: {}", e);
                write_error(conn, &e).await;
                return;
            }
        };

        debug!("Received {} with {} arguments", req.name(), req.args().len());
        req.attach(session);

        let res = match dispatch(commands, stats, &req) {
            Ok(res) => res,
            Err(e) => {
                write_error(conn, &e).await;
                // Don't disconnect on command errors, pipelined requests behind it still need
                // their replies.
                if error::is_recoverable(&e) {
                    continue;
                }
                warn!("Command {} failed: {}", req.name(), e);
                return;
            }
        };

        match conn.write_response(&res).await {
            Ok(written) => debug!("Sent {} bytes", written),
            Err(e) => {
                debug!("Failed to write response: {}", e);
                return;
            }
        }

        if session.is_quit() {
            debug!("Client quit");
            return;
        }
    }
}

async fn write_error(conn: &mut Connection<AnyStream>, err: &Error) {
    let mut res = Responder::new();
    res.write_error(err);
    if let Err(e) = conn.write_response(&res).await {
        debug!("Failed to write error response: {}", e);
    }
}

impl Listener {
    async fn accept(&self) -> io::Result<(AnyStream, String)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                Ok((AnyStream::Tcp(stream), addr.to_string()))
            }
            Listener::Unix(listener) => {
                let (stream, addr) = listener.accept().await?;
                let addr = addr
                    .as_pathname()
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "unix".to_string());
                Ok((AnyStream::Unix(stream), addr))
            }
        }
    }
}

/// Binds a Unix listener at `path`, removing a stale socket file left behind by a previous run.
fn listen_unix(path: &Path) -> Result<UnixListener, Error> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => std::fs::remove_file(path)?,
        Ok(_) => return Err(ServerError::SocketPathOccupied(path.to_path_buf()).into()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    Ok(UnixListener::bind(path)?)
}

fn remove_socket_file(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn server() -> Server {
        let mut server = Server::new(Config::default());
        server
            .handle("PING", |res: &mut Responder, _: &Request| -> Result<(), Error> {
                res.write_simple("PONG");
                Ok(())
            })
            .handle("fail", |_: &mut Responder, _: &Request| -> Result<(), Error> {
                Err(ClientError::custom("ERR nope").into())
            })
            .handle("crash", |_: &mut Responder, _: &Request| -> Result<(), Error> {
                Err("kaboom".into())
            });
        server
    }

    #[test]
    fn dispatch_is_case_insensitive() {
        let server = server();

        for name in ["ping", "PING", "PiNg"] {
            let res = server.dispatch(&Request::new(name, vec![])).unwrap();
            assert_eq!(res.to_frame(), crate::frame::Frame::Simple("PONG".to_string()));
        }
    }

    #[test]
    fn dispatch_unknown_command_is_recoverable() {
        let server = server();

        let err = server.dispatch(&Request::new("nope", vec![])).unwrap_err();
        assert!(error::is_recoverable(&err));
        assert_eq!(
            err.downcast_ref::<ClientError>(),
            Some(&ClientError::UnknownCommand("nope".to_string()))
        );
    }

    #[test]
    fn dispatch_classifies_handler_errors() {
        let server = server();

        let err = server.dispatch(&Request::new("fail", vec![])).unwrap_err();
        assert!(error::is_recoverable(&err));

        let err = server.dispatch(&Request::new("crash", vec![])).unwrap_err();
        assert!(!error::is_recoverable(&err));
    }

    #[test]
    fn dispatch_counts_every_attempt() {
        let server = server();

        server.dispatch(&Request::new("ping", vec![])).unwrap();
        let _ = server.dispatch(&Request::new("unknown", vec![]));

        assert_eq!(server.stats().total_commands, 2);
    }

    #[test]
    fn dispatch_tracks_session_counters() {
        let server = server();
        let session = Arc::new(Session::new("test".to_string(), None));

        let mut req = Request::new("PING", vec![Bytes::from("x")]);
        req.attach(&session);
        server.dispatch(&req).unwrap();

        assert_eq!(session.commands_processed(), 1);
        assert_eq!(session.last_command(), Some("ping".to_string()));
    }

    #[test]
    fn registration_after_snapshot_does_not_touch_snapshot() {
        let mut server = server();
        let snapshot = server.commands.clone();

        server.handle("late", |_: &mut Responder, _: &Request| -> Result<(), Error> { Ok(()) });

        assert!(snapshot.get("late").is_none());
        assert!(server.commands.get("late").is_some());
    }

    #[test]
    fn listen_unix_rejects_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("occupied");
        std::fs::write(&path, b"data").unwrap();

        let err = listen_unix(&path).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ServerError>(),
            Some(ServerError::SocketPathOccupied(_))
        ));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn listen_unix_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");

        // Leave a socket file behind without anyone listening on it.
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let listener = listen_unix(&path).unwrap();
        drop(listener);
    }

    #[tokio::test]
    async fn start_without_listeners_fails() {
        let server = Server::new(Config::default().without_addr());
        let err = server.start().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ServerError>(),
            Some(ServerError::NoListeners)
        ));

        // A failed start can be retried.
        let err = server.start().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ServerError>(),
            Some(ServerError::NoListeners)
        ));
    }

    #[tokio::test]
    async fn shutdown_before_start() {
        let server = server();
        server.shutdown().await.unwrap();
        server.shutdown().await.unwrap();
        server.start().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_while_binding_removes_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("racy.sock");

        // Resolving a host name yields, so shutdown runs while start is still binding.
        let server = Server::new(Config::default().with_addr("localhost:0").with_socket(&path));
        let (started, stopped) = tokio::join!(server.start(), server.shutdown());

        started.unwrap();
        stopped.unwrap();
        assert!(!path.exists());
    }
}
