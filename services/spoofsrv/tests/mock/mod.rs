//! Test support: an in-process Modbus device and a minimal client

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures::{SinkExt, StreamExt};
use mitm_protocols::modbus::pdu::{build_exception, build_read_response, parse_register_values};
use mitm_protocols::modbus::ReadRegistersRequest;
use mitm_protocols::{Frame, MbapCodec};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::{CancellationToken, DropGuard};

use spoofsrv::{ProxyConfig, ProxyHandle, ProxyServer};

pub const ILLEGAL_FUNCTION: u8 = 0x01;
pub const ILLEGAL_DATA_ADDRESS: u8 = 0x02;
pub const ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Register table served by [`MockDevice`]
#[derive(Debug, Clone, Default)]
pub struct DeviceTable {
    pub holding: Vec<u16>,
    /// Reads touching any of these addresses get ILLEGAL_DATA_ADDRESS
    pub faulty: HashSet<u16>,
}

impl DeviceTable {
    /// `count` registers where register `i` holds `base + i`
    pub fn sequential(base: u16, count: u16) -> Self {
        Self {
            holding: (0..count).map(|i| base + i).collect(),
            faulty: HashSet::new(),
        }
    }

    pub fn with_faulty(mut self, addr: u16) -> Self {
        self.faulty.insert(addr);
        self
    }

    fn respond(&self, request: &Frame) -> Frame {
        let pdu = match ReadRegistersRequest::parse_holding(&request.pdu) {
            Ok(read) => {
                let start = usize::from(read.start_address);
                let end = start + usize::from(read.quantity);
                let touches_fault = self
                    .faulty
                    .iter()
                    .any(|&addr| (start..end).contains(&usize::from(addr)));
                if end > self.holding.len() || touches_fault {
                    build_exception(read.function_code, ILLEGAL_DATA_ADDRESS)
                } else {
                    build_read_response(read.function_code, &self.holding[start..end])
                        .unwrap_or_else(|_| build_exception(read.function_code, ILLEGAL_DATA_VALUE))
                }
            },
            Err(_) => build_exception(request.function_code().unwrap_or(0), ILLEGAL_FUNCTION),
        };
        request.with_pdu(pdu)
    }
}

/// Modbus/TCP device on an ephemeral localhost port, stopped on drop
pub struct MockDevice {
    addr: SocketAddr,
    _guard: DropGuard,
}

impl MockDevice {
    pub async fn start(table: DeviceTable) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let token = CancellationToken::new();
        let table = Arc::new(table);

        let accept_token = token.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = tokio::select! {
                    () = accept_token.cancelled() => break,
                    res = listener.accept() => match res {
                        Ok(accepted) => accepted,
                        Err(_) => break,
                    },
                };
                let table = table.clone();
                let conn_token = accept_token.clone();
                tokio::spawn(async move {
                    let mut framed = Framed::new(stream, MbapCodec::new());
                    loop {
                        let request = tokio::select! {
                            () = conn_token.cancelled() => break,
                            next = framed.next() => match next {
                                Some(Ok(frame)) => frame,
                                _ => break,
                            },
                        };
                        if framed.send(table.respond(&request)).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        Ok(Self {
            addr,
            _guard: token.drop_guard(),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Proxy config on an ephemeral port with timeouts short enough for tests
pub fn test_config(upstream: SocketAddr) -> ProxyConfig {
    ProxyConfig {
        connect_timeout_ms: 500,
        read_timeout_ms: 100,
        accept_timeout_ms: 100,
        ..ProxyConfig::new("127.0.0.1:0", upstream.to_string())
    }
}

pub async fn start_proxy(upstream: SocketAddr) -> Result<ProxyHandle> {
    Ok(ProxyServer::start(test_config(upstream)).await?)
}

/// Address nothing is listening on
pub async fn unused_addr() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}

/// Minimal Modbus/TCP client
pub struct TestClient {
    framed: Framed<TcpStream, MbapCodec>,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            framed: Framed::new(stream, MbapCodec::new()),
        })
    }

    pub async fn send(&mut self, frame: Frame) -> Result<()> {
        self.framed.send(frame).await?;
        Ok(())
    }

    /// Next frame, `None` once the proxy closed the socket
    pub async fn recv(&mut self) -> Result<Option<Frame>> {
        match tokio::time::timeout(Duration::from_secs(3), self.framed.next()).await {
            Err(_) => Err(anyhow!("timed out waiting for a response")),
            Ok(None) => Ok(None),
            Ok(Some(Ok(frame))) => Ok(Some(frame)),
            // a reset counts as closed
            Ok(Some(Err(e))) if e.is_connection_closed() => Ok(None),
            Ok(Some(Err(e))) => Err(e.into()),
        }
    }

    pub async fn request(&mut self, frame: Frame) -> Result<Frame> {
        self.send(frame).await?;
        self.recv()
            .await?
            .ok_or_else(|| anyhow!("connection closed before a response"))
    }

    pub async fn read_holding(&mut self, tid: u16, start: u16, quantity: u16) -> Result<Frame> {
        let pdu = ReadRegistersRequest::holding(start, quantity).to_pdu();
        self.request(Frame::new(tid, 1, pdu)).await
    }
}

pub fn registers(frame: &Frame) -> Vec<u16> {
    parse_register_values(&frame.pdu).unwrap()
}
