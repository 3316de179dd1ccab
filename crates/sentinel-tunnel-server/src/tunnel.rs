//! Bidirectional relay between a client connection and its backend
//!
//! Each direction runs as its own task. When a direction's source reaches end
//! of stream, the task shuts down the write side of its destination so the far
//! peer sees the half-close, then exits. When a direction fails, the other one
//! is stopped as well and the whole pair is torn down. The relay finishes once
//! both directions have finished, and both connections are closed by then.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Read buffer size for each direction (16KB)
pub const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// Handle to a running tunnel, resolves to the relay statistics
pub type TunnelHandle = JoinHandle<RelayStats>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    AToB,
    BToA,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::AToB => write!(f, "a->b"),
            Direction::BToA => write!(f, "b->a"),
        }
    }
}

/// Outcome of one copy direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectionStats {
    /// Bytes written to the destination
    pub bytes: u64,
    /// The direction ended on an I/O error rather than end of stream
    pub errored: bool,
    /// The direction was stopped because the other one failed
    pub stopped: bool,
}

/// Outcome of a full relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub a_to_b: DirectionStats,
    pub b_to_a: DirectionStats,
}

impl RelayStats {
    pub fn total_bytes(&self) -> u64 {
        self.a_to_b.bytes + self.b_to_a.bytes
    }
}

/// Relay bytes between `a` and `b` in both directions until both are exhausted
///
/// Never returns an error. A failure in either direction stops both, and is
/// reported through [`DirectionStats::errored`].
pub async fn relay<A, B>(a: A, b: B) -> RelayStats
where
    A: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);

    let a_failed = Arc::new(Notify::new());
    let b_failed = Arc::new(Notify::new());

    let a_to_b = tokio::spawn(copy_then_shutdown(
        a_read,
        b_write,
        Direction::AToB,
        a_failed.clone(),
        b_failed.clone(),
    ));
    let b_to_a = tokio::spawn(copy_then_shutdown(
        b_read,
        a_write,
        Direction::BToA,
        b_failed,
        a_failed,
    ));

    let (a_to_b, b_to_a) = tokio::join!(a_to_b, b_to_a);

    RelayStats {
        a_to_b: a_to_b.unwrap_or_else(|e| {
            warn!("Relay task {} failed: {}", Direction::AToB, e);
            DirectionStats {
                errored: true,
                ..DirectionStats::default()
            }
        }),
        b_to_a: b_to_a.unwrap_or_else(|e| {
            warn!("Relay task {} failed: {}", Direction::BToA, e);
            DirectionStats {
                errored: true,
                ..DirectionStats::default()
            }
        }),
    }
}

async fn copy_then_shutdown<R, W>(
    mut src: R,
    mut dst: W,
    direction: Direction,
    failed: Arc<Notify>,
    peer_failed: Arc<Notify>,
) -> DirectionStats
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut stats = DirectionStats::default();

    let stopped = tokio::select! {
        _ = copy(&mut src, &mut dst, direction, &mut stats) => false,
        _ = peer_failed.notified() => true,
    };
    stats.stopped = stopped;
    if stats.stopped {
        debug!("{} stopped after {} bytes, other direction failed", direction, stats.bytes);
    }

    if stats.errored {
        // Stores a permit, so the other direction stops even if it is busy writing
        failed.notify_one();
    }

    // Half-close: the destination's peer sees end of stream
    if let Err(e) = dst.shutdown().await {
        trace!("{} shutdown failed: {}", direction, e);
    }

    stats
}

async fn copy<R, W>(src: &mut R, dst: &mut W, direction: Direction, stats: &mut DirectionStats)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; RELAY_BUFFER_SIZE];

    loop {
        match src.read(&mut buffer).await {
            Ok(0) => {
                trace!("{} reached end of stream", direction);
                return;
            }
            Ok(n) => {
                if let Err(e) = dst.write_all(&buffer[..n]).await {
                    debug!("{} write failed after {} bytes: {}", direction, stats.bytes, e);
                    stats.errored = true;
                    return;
                }
                stats.bytes += n as u64;
            }
            Err(e) => {
                debug!("{} read failed after {} bytes: {}", direction, stats.bytes, e);
                stats.errored = true;
                return;
            }
        }
    }
}

/// An established client <-> backend pair
pub struct Tunnel {
    connection_id: u64,
    service_name: Arc<str>,
    client: TcpStream,
    backend: TcpStream,
}

impl Tunnel {
    pub fn new(
        connection_id: u64,
        service_name: Arc<str>,
        client: TcpStream,
        backend: TcpStream,
    ) -> Self {
        for stream in [&client, &backend] {
            if let Err(e) = stream.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY: {}", e);
            }
        }

        Self {
            connection_id,
            service_name,
            client,
            backend,
        }
    }

    /// Start relaying on a new task
    pub fn spawn(self) -> TunnelHandle {
        tokio::spawn(self.run())
    }

    /// Relay until both directions finish
    pub async fn run(self) -> RelayStats {
        let Tunnel {
            connection_id,
            service_name,
            client,
            backend,
        } = self;

        let started = Instant::now();
        let stats = relay(client, backend).await;

        info!(
            connection_id,
            service = %service_name,
            client_to_backend = stats.a_to_b.bytes,
            backend_to_client = stats.b_to_a.bytes,
            duration_ms = started.elapsed().as_millis() as u64,
            "Tunnel closed"
        );

        stats
    }
}
