//! CDP wire protocol: a multiplexed WebSocket link to the browser
//! endpoint, a shared routing table for replies and events, and session
//! attachment with per-target locking.

mod client;
mod error;
mod transport;
mod types;

pub use client::{Connector, ConnectorConfig, Session};
pub use error::CdpError;
pub use transport::Reconnect;
pub use types::CdpEvent;
