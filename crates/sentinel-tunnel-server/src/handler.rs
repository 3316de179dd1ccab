//! Per-connection handling: resolve, dial, then hand off to a tunnel

use crate::tunnel::{Tunnel, TunnelHandle};
use sentinel_tunnel_resolver::{AddressResolver, ResolveError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Cannot get master address for {service}: {source}")]
    Resolve {
        service: String,
        #[source]
        source: ResolveError,
    },

    #[error("Cannot connect to {service} at {address}: {source}")]
    Dial {
        service: String,
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out connecting to {service} at {address} after {timeout:?}")]
    DialTimeout {
        service: String,
        address: String,
        timeout: Duration,
    },
}

/// Connection ID generator for logging
#[derive(Clone)]
pub struct ConnectionIdGenerator {
    next_connection_id: Arc<AtomicU64>,
}

impl ConnectionIdGenerator {
    pub fn new() -> Self {
        Self {
            next_connection_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn generate(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for ConnectionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Handles accepted connections for one logical service
///
/// Cheap to clone; every accepted connection gets its own clone.
#[derive(Clone)]
pub struct ConnectionHandler {
    service_name: Arc<str>,
    resolver: Arc<dyn AddressResolver>,
    dial_timeout: Option<Duration>,
}

impl ConnectionHandler {
    pub fn new(service_name: impl Into<Arc<str>>, resolver: Arc<dyn AddressResolver>) -> Self {
        Self {
            service_name: service_name.into(),
            resolver,
            dial_timeout: None,
        }
    }

    /// Bound the backend connect; `None` leaves it to the OS
    pub fn with_dial_timeout(mut self, dial_timeout: Option<Duration>) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Resolve the backend once, dial it once, and start relaying
    ///
    /// Returns as soon as the tunnel is running. On failure the client
    /// connection is closed without any bytes being sent to it.
    pub async fn handle(
        &self,
        client: TcpStream,
        peer_addr: SocketAddr,
        connection_id: u64,
    ) -> Result<TunnelHandle, HandlerError> {
        let service = self.service_name();

        info!(connection_id, %peer_addr, "Getting master address for {}", service);
        let address = match self.resolver.resolve(service).await {
            Ok(address) => address,
            Err(source) => {
                drop(client);
                return Err(HandlerError::Resolve {
                    service: service.to_string(),
                    source,
                });
            }
        };

        info!(connection_id, "Connecting to {} at {}", service, address);
        let backend = match self.dial(&address).await {
            Ok(backend) => backend,
            Err(e) => {
                drop(client);
                return Err(e);
            }
        };

        info!(
            connection_id,
            %peer_addr,
            backend = %address,
            "Tunnelling client to {}",
            service
        );
        Ok(Tunnel::new(connection_id, self.service_name.clone(), client, backend).spawn())
    }

    async fn dial(&self, address: &str) -> Result<TcpStream, HandlerError> {
        let connect = TcpStream::connect(address);

        let result = match self.dial_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, connect).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(HandlerError::DialTimeout {
                        service: self.service_name.to_string(),
                        address: address.to_string(),
                        timeout,
                    })
                }
            },
            None => connect.await,
        };

        result.map_err(|source| {
            debug!("Connect to {} failed: {}", address, source);
            HandlerError::Dial {
                service: self.service_name.to_string(),
                address: address.to_string(),
                source,
            }
        })
    }
}
