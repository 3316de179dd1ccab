//! Sentinel Tunnel Library - Public API for Rust applications
//!
//! Exposes each logical Redis service on a local port. Every connection made
//! to that port is forwarded to the service's current master, as reported by
//! Redis Sentinel at the moment the connection was accepted.
//!
//! # Quick Start
//!
//! ```ignore
//! use sentinel_tunnel_lib::{SentinelResolver, TunnelConfig, TunnelManager};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TunnelConfig::load("sentinel_tunnel.json")?;
//!
//!     let resolver = SentinelResolver::connect(
//!         config.sentinels_addresses_list.clone(),
//!         config.sentinel_timeout(),
//!     )
//!     .await?;
//!
//!     let mut tunnels = TunnelManager::new(&config, Arc::new(resolver)).start().await?;
//!     for (service, addr) in tunnels.local_addrs() {
//!         println!("{} -> {}", addr, service);
//!     }
//!
//!     tunnels.wait().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Custom Resolvers
//!
//! Anything implementing [`AddressResolver`] can stand in for Sentinel:
//!
//! ```ignore
//! use sentinel_tunnel_lib::{async_trait, AddressResolver, ResolveError};
//!
//! struct Consul { /* ... */ }
//!
//! #[async_trait]
//! impl AddressResolver for Consul {
//!     async fn resolve(&self, service_name: &str) -> Result<String, ResolveError> {
//!         // look the service up, return "host:port"
//!         # unimplemented!()
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! - **`sentinel-tunnel-config`**: JSON configuration and validation
//! - **`sentinel-tunnel-resolver`**: Resolver trait, Sentinel client, RESP codec
//! - **`sentinel-tunnel-server`**: Listeners, connection handling, byte relay
//!
//! All public types from these crates are re-exported here for convenience.

pub mod manager;

pub use manager::{RunningTunnels, TunnelManager, TunnelManagerError};

// Re-export configuration types
pub use sentinel_tunnel_config::{
    validate_address, ConfigError, DatabaseRoute, ListenerFailurePolicy, LogicalServiceRoute,
    PortValue, TunnelConfig, DEFAULT_LISTEN_HOST, DEFAULT_SENTINEL_TIMEOUT_MS,
};

// Re-export resolver types
pub use sentinel_tunnel_resolver::{
    AddressResolver, CodecError, ResolveError, RespCodec, RespValue, SentinelResolver,
    StaticResolver,
};

// Re-export tunnelling core
pub use sentinel_tunnel_server::{
    relay, ConnectionHandler, ConnectionIdGenerator, DirectionStats, HandlerError, RelayStats,
    ServiceListener, ServiceListenerConfig, ServiceListenerError, Tunnel, TunnelHandle,
};

pub use async_trait::async_trait;
