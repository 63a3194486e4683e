use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::registry::SessionRegistry;

/// Cumulative counters. They only ever go up.
#[derive(Debug)]
pub(crate) struct Stats {
    started_at: Instant,
    total_connections: AtomicU64,
    total_commands: AtomicU64,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_connections: AtomicU64::new(0),
            total_commands: AtomicU64::new(0),
        }
    }

    pub(crate) fn on_connect(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_command(&self) {
        self.total_commands.fetch_add(1, Ordering::Relaxed);
    }
}

/// A point-in-time copy of the server counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connected_clients: usize,
    pub total_connections: u64,
    pub total_commands: u64,
    pub uptime: Duration,
}

/// Describes one live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: Uuid,
    pub addr: String,
    pub age: Duration,
    pub idle: Duration,
    pub commands: u64,
    pub last_command: Option<String>,
}

impl fmt::Display for ClientInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id={} addr={} age={} idle={} cmd={}",
            self.id,
            self.addr,
            self.age.as_secs(),
            self.idle.as_secs(),
            self.last_command.as_deref().unwrap_or("NULL"),
        )
    }
}

/// Read-only view of the server's counters and live sessions. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    stats: Arc<Stats>,
    sessions: SessionRegistry,
    addr: Option<String>,
    socket: Option<String>,
}

impl ServerInfo {
    pub(crate) fn new(
        stats: Arc<Stats>,
        sessions: SessionRegistry,
        addr: Option<String>,
        socket: Option<String>,
    ) -> Self {
        Self {
            stats,
            sessions,
            addr,
            socket,
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connected_clients: self.sessions.len(),
            total_connections: self.stats.total_connections.load(Ordering::Relaxed),
            total_commands: self.stats.total_commands.load(Ordering::Relaxed),
            uptime: self.stats.started_at.elapsed(),
        }
    }

    pub fn clients(&self) -> Vec<ClientInfo> {
        let mut clients: Vec<ClientInfo> = self
            .sessions
            .sessions()
            .iter()
            .map(|session| session.info())
            .collect();
        // Oldest first.
        clients.sort_by(|a, b| b.age.cmp(&a.age));
        clients
    }
}

/// Renders the INFO text: `# Section` headers followed by `key:value` lines.
impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();

        writeln!(f, "# Server")?;
        writeln!(f, "process_id:{}", std::process::id())?;
        if let Some(addr) = &self.addr {
            writeln!(f, "tcp_addr:{}", addr)?;
        }
        if let Some(socket) = &self.socket {
            writeln!(f, "unix_socket:{}", socket)?;
        }
        writeln!(f, "uptime_in_seconds:{}", snapshot.uptime.as_secs())?;
        writeln!(f, "uptime_in_days:{}", snapshot.uptime.as_secs() / 86400)?;
        writeln!(f)?;
        writeln!(f, "# Clients")?;
        writeln!(f, "connected_clients:{}", snapshot.connected_clients)?;
        writeln!(f)?;
        writeln!(f, "# Stats")?;
        writeln!(f, "total_connections_received:{}", snapshot.total_connections)?;
        writeln!(f, "total_commands_processed:{}", snapshot.total_commands)
    }
}
