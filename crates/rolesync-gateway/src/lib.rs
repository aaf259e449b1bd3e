//! Streaming connection lifecycle for rolesync.
//!
//! [`ConnectionManager`] owns the single authenticated connection, the
//! coarse "ready" gate, and the live [`RosterCache`]. The connection itself
//! sits behind [`GatewayTransport`] so tests can script it;
//! [`ws::WsGateway`] is the websocket implementation.

pub mod cache;
pub mod error;
pub mod event;
pub mod loader;
pub mod manager;
pub mod state;
pub mod transport;
pub mod ws;

pub use cache::{GroupSnapshot, RosterCache};
pub use error::ConnectionError;
pub use event::{GatewayEvent, SessionToken};
pub use loader::{RestRosterLoader, RosterLoader};
pub use manager::{ConnectionManager, HealthSnapshot, LifecycleConfig, LifecycleHook, ReadyGate};
pub use state::ConnectionState;
pub use transport::{GatewaySession, GatewayTransport};
