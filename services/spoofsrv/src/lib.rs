//! Modbus/TCP spoofing proxy
//!
//! Sits between a Modbus client and a device, forwards every frame in both
//! directions, and falsifies selected holding register values in read
//! (function code 0x03) responses.
//!
//! ```text
//! client ──▶ [ proxy : listen ] ──▶ upstream device
//!        ◀── (FC03 values spoofed) ◀──
//! ```

pub mod bootstrap;
pub mod config;
pub mod connection;
pub mod forwarder;
pub mod policy;
pub mod server;
pub mod tracker;

pub use config::ProxyConfig;
pub use connection::{ConnectionHandler, ConnectionPhase, ConnectionStats, StatsSnapshot};
pub use forwarder::{Direction, FrameProcessor};
pub use policy::{AddressRange, SpoofPolicy, ValueTransform};
pub use server::{ProxyHandle, ProxyServer};
pub use tracker::{PendingRequest, TransactionTracker, PENDING_REQUEST_MAX_AGE};
