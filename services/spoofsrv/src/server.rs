//! Proxy server
//!
//! Binds the listen socket, accepts clients and spawns one
//! [`ConnectionHandler`] per accepted socket. Shutdown is driven by a single
//! [`CancellationToken`]; every connection runs under a child of it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use errors::{MitmError, MitmResult};

use crate::config::ProxyConfig;
use crate::connection::ConnectionHandler;
use crate::policy::SpoofPolicy;

/// Pause after a failed `accept` before trying again
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

pub struct ProxyServer;

impl ProxyServer {
    /// Bind and start accepting with a fresh cancellation token.
    ///
    /// Returns only once the listener is bound, so the handle doubles as the
    /// readiness signal.
    pub async fn start(config: ProxyConfig) -> MitmResult<ProxyHandle> {
        Self::start_with_token(config, CancellationToken::new()).await
    }

    pub async fn start_with_token(
        config: ProxyConfig,
        token: CancellationToken,
    ) -> MitmResult<ProxyHandle> {
        config.validate()?;

        let listener = TcpListener::bind(&config.listen)
            .await
            .map_err(|source| MitmError::Bind {
                addr: config.listen.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        info!(
            listen = %local_addr,
            upstream = %config.upstream,
            ranges = ?config.spoof.ranges,
            transform = ?config.spoof.transform,
            enabled = config.spoof.enabled,
            "Spoofing proxy listening"
        );

        let policy = Arc::new(config.spoof.clone());
        let config = Arc::new(config);
        let connections = TaskTracker::new();

        let accept_task = tokio::spawn(accept_loop(
            listener,
            config,
            policy,
            token.clone(),
            connections.clone(),
        ));

        Ok(ProxyHandle {
            local_addr,
            token,
            accept_task,
            connections,
        })
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: Arc<ProxyConfig>,
    policy: Arc<SpoofPolicy>,
    token: CancellationToken,
    connections: TaskTracker,
) {
    let accept_timeout = config.accept_timeout();

    loop {
        let accepted = tokio::select! {
            () = token.cancelled() => break,
            res = tokio::time::timeout(accept_timeout, listener.accept()) => res,
        };

        match accepted {
            Err(_elapsed) => continue,
            Ok(Ok((stream, peer))) => {
                info!(%peer, "Client connected");
                let handler = ConnectionHandler::new(
                    stream,
                    peer,
                    config.clone(),
                    policy.clone(),
                    token.child_token(),
                );
                connections.spawn(async move {
                    if let Err(e) = handler.run().await {
                        warn!(%peer, "Connection aborted: {}", e);
                    }
                });
            },
            Ok(Err(e)) => {
                error!("Accept failed: {}", e);
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {},
                }
            },
        }
    }

    // listener drops here, releasing the port
    debug!("Accept loop stopped");
}

/// Handle to a running proxy
#[derive(Debug)]
pub struct ProxyHandle {
    local_addr: SocketAddr,
    token: CancellationToken,
    accept_task: JoinHandle<()>,
    connections: TaskTracker,
}

impl ProxyHandle {
    /// Actual bound address (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Connections whose handler has not finished yet
    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    /// Request shutdown and wait for the listener and every connection to close
    pub async fn stop(self) {
        info!("Stopping proxy");
        self.token.cancel();
        self.wait().await;
    }

    /// Wait for the proxy to stop after its token has been cancelled
    pub async fn wait(self) {
        if let Err(e) = self.accept_task.await {
            error!("Accept task failed: {}", e);
        }
        self.connections.close();
        self.connections.wait().await;
        info!("Proxy stopped");
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_resolves_ephemeral_port() {
        let handle = ProxyServer::start(ProxyConfig::new("127.0.0.1:0", "127.0.0.1:1"))
            .await
            .unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        assert_eq!(handle.active_connections(), 0);
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let err = ProxyServer::start(ProxyConfig::new(addr, "127.0.0.1:1"))
            .await
            .unwrap_err();
        assert!(matches!(err, MitmError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_bind() {
        let config = ProxyConfig {
            connect_timeout_ms: 0,
            ..ProxyConfig::new("127.0.0.1:0", "127.0.0.1:1")
        };
        assert!(ProxyServer::start(config).await.is_err());
    }

    #[tokio::test]
    async fn test_external_token_stops_server() {
        let token = CancellationToken::new();
        let handle = ProxyServer::start_with_token(
            ProxyConfig::new("127.0.0.1:0", "127.0.0.1:1"),
            token.clone(),
        )
        .await
        .unwrap();

        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle.wait())
            .await
            .unwrap();
    }
}
