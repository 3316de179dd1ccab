//! TCP tunnelling core
//!
//! One [`ServiceListener`] per logical service. Every accepted connection is
//! handed to a [`ConnectionHandler`], which resolves the service's current
//! backend, dials it, and starts a [`Tunnel`] that relays bytes both ways.

pub mod handler;
pub mod listener;
pub mod tunnel;

pub use handler::{ConnectionHandler, ConnectionIdGenerator, HandlerError};
pub use listener::{ServiceListener, ServiceListenerConfig, ServiceListenerError};
pub use tunnel::{relay, DirectionStats, RelayStats, Tunnel, TunnelHandle, RELAY_BUFFER_SIZE};
