//! Connection handling
//!
//! A [`ConnectionHandler`] owns one accepted client socket for its whole life:
//!
//! ```text
//! Connecting ──(upstream dial ok)──▶ Forwarding ──(either side ends / cancel)──▶ Closing ──▶ Closed
//!     │                                                                                       ▲
//!     └────────────────────────────(dial failed or timed out)─────────────────────────────────┘
//! ```
//!
//! Errors stay inside the handler; nothing here can affect the accept loop or
//! any other connection.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use errors::{MitmError, MitmResult};

use crate::config::ProxyConfig;
use crate::forwarder::{Direction, ForwardEnd, Forwarder, RequestRecorder, ResponseSpoofer};
use crate::policy::SpoofPolicy;
use crate::tracker::TransactionTracker;

/// Lifecycle phase of a proxied connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Connecting,
    Forwarding,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionPhase::Connecting => "connecting",
            ConnectionPhase::Forwarding => "forwarding",
            ConnectionPhase::Closing => "closing",
            ConnectionPhase::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Counters shared by the two forwarders of one connection
#[derive(Debug, Default)]
pub struct ConnectionStats {
    frames_to_upstream: AtomicU64,
    frames_to_client: AtomicU64,
    requests_recorded: AtomicU64,
    responses_spoofed: AtomicU64,
    registers_spoofed: AtomicU64,
    responses_passthrough: AtomicU64,
    discarded_bytes: AtomicU64,
}

impl ConnectionStats {
    pub fn record_frame(&self, direction: Direction) {
        let counter = match direction {
            Direction::ClientToUpstream => &self.frames_to_upstream,
            Direction::UpstreamToClient => &self.frames_to_client,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request(&self) {
        self.requests_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_spoofed(&self, registers: usize) {
        self.responses_spoofed.fetch_add(1, Ordering::Relaxed);
        self.registers_spoofed
            .fetch_add(registers as u64, Ordering::Relaxed);
    }

    pub fn record_passthrough(&self) {
        self.responses_passthrough.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self, bytes: u64) {
        self.discarded_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_to_upstream: self.frames_to_upstream.load(Ordering::Relaxed),
            frames_to_client: self.frames_to_client.load(Ordering::Relaxed),
            requests_recorded: self.requests_recorded.load(Ordering::Relaxed),
            responses_spoofed: self.responses_spoofed.load(Ordering::Relaxed),
            registers_spoofed: self.registers_spoofed.load(Ordering::Relaxed),
            responses_passthrough: self.responses_passthrough.load(Ordering::Relaxed),
            discarded_bytes: self.discarded_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ConnectionStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_to_upstream: u64,
    pub frames_to_client: u64,
    pub requests_recorded: u64,
    pub responses_spoofed: u64,
    pub registers_spoofed: u64,
    pub responses_passthrough: u64,
    pub discarded_bytes: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "up={} down={} reads={} spoofed={}/{} regs passthrough={} discarded={}B",
            self.frames_to_upstream,
            self.frames_to_client,
            self.requests_recorded,
            self.responses_spoofed,
            self.registers_spoofed,
            self.responses_passthrough,
            self.discarded_bytes
        )
    }
}

fn advance_phase(phase: &mut ConnectionPhase, peer: SocketAddr, next: ConnectionPhase) {
    debug!(%peer, from = %*phase, to = %next, "Connection phase");
    *phase = next;
}

/// One client ↔ upstream socket pair
pub struct ConnectionHandler {
    client: TcpStream,
    peer: SocketAddr,
    config: Arc<ProxyConfig>,
    policy: Arc<SpoofPolicy>,
    token: CancellationToken,
    phase: ConnectionPhase,
}

impl ConnectionHandler {
    /// `token` should be a child of the server token: cancelling it closes
    /// only this connection.
    pub fn new(
        client: TcpStream,
        peer: SocketAddr,
        config: Arc<ProxyConfig>,
        policy: Arc<SpoofPolicy>,
        token: CancellationToken,
    ) -> Self {
        Self {
            client,
            peer,
            config,
            policy,
            token,
            phase: ConnectionPhase::Connecting,
        }
    }

    fn transition(&mut self, next: ConnectionPhase) {
        advance_phase(&mut self.phase, self.peer, next);
    }

    /// Drive the connection to `Closed`, returning its final counters.
    ///
    /// An upstream dial failure is returned as an error after the client
    /// socket has been closed.
    pub async fn run(mut self) -> MitmResult<StatsSnapshot> {
        let upstream = match self.connect_upstream().await {
            Ok(stream) => stream,
            Err(e) => {
                self.transition(ConnectionPhase::Closed);
                drop(self);
                return Err(e);
            },
        };

        self.transition(ConnectionPhase::Forwarding);
        let stats = self.forward(upstream).await;

        self.transition(ConnectionPhase::Closed);
        info!(peer = %self.peer, "Connection closed: {}", stats);
        Ok(stats)
    }

    async fn connect_upstream(&self) -> MitmResult<TcpStream> {
        let endpoint = self.config.upstream.as_str();
        let connect = tokio::time::timeout(
            self.config.connect_timeout(),
            TcpStream::connect(endpoint),
        );

        let stream = tokio::select! {
            () = self.token.cancelled() => {
                return Err(MitmError::ConnectionFailed {
                    endpoint: endpoint.to_string(),
                    reason: "cancelled while connecting".to_string(),
                });
            }
            res = connect => match res {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    return Err(MitmError::ConnectionFailed {
                        endpoint: endpoint.to_string(),
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    return Err(MitmError::Timeout(format!(
                        "connecting to {} after {:?}",
                        endpoint,
                        self.config.connect_timeout()
                    )));
                }
            },
        };

        stream.set_nodelay(true).ok();
        self.client.set_nodelay(true).ok();
        info!(peer = %self.peer, upstream = %endpoint, "Upstream connected");
        Ok(stream)
    }

    async fn forward(&mut self, upstream: TcpStream) -> StatsSnapshot {
        let tracker = Arc::new(TransactionTracker::new());
        let stats = Arc::new(ConnectionStats::default());
        let read_timeout = self.config.read_timeout();

        let (client_rd, client_wr) = self.client.split();
        let (upstream_rd, upstream_wr) = upstream.into_split();

        let requests = Forwarder::new(
            client_rd,
            upstream_wr,
            RequestRecorder::new(tracker.clone(), stats.clone()),
            read_timeout,
            self.token.clone(),
            stats.clone(),
        );
        let responses = Forwarder::new(
            upstream_rd,
            client_wr,
            ResponseSpoofer::new(tracker, self.policy.clone(), stats.clone()),
            read_timeout,
            self.token.clone(),
            stats.clone(),
        );

        let token = &self.token;
        let peer = self.peer;
        let mut up = std::pin::pin!(requests.run());
        let mut down = std::pin::pin!(responses.run());

        // Closing starts with whichever comes first: a forwarder exits or the
        // token fires. The other forwarder then drains on the cancelled token.
        let (up, down) = tokio::select! {
            res = &mut up => {
                token.cancel();
                advance_phase(&mut self.phase, peer, ConnectionPhase::Closing);
                (res, down.await)
            }
            res = &mut down => {
                token.cancel();
                advance_phase(&mut self.phase, peer, ConnectionPhase::Closing);
                (up.await, res)
            }
            () = token.cancelled() => {
                advance_phase(&mut self.phase, peer, ConnectionPhase::Closing);
                (up.await, down.await)
            }
        };

        for (direction, res) in [
            (Direction::ClientToUpstream, up),
            (Direction::UpstreamToClient, down),
        ] {
            match res {
                Ok(ForwardEnd::PeerClosed) => debug!(%peer, %direction, "Peer closed"),
                Ok(ForwardEnd::Cancelled) => {},
                Err(e) if e.is_connection_closed() => {
                    debug!(%peer, %direction, "Connection dropped: {}", e)
                },
                Err(e) => warn!(%peer, %direction, "Forwarding failed: {}", e),
            }
        }

        stats.snapshot()
    }
}
