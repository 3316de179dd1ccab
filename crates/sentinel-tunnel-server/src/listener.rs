//! Per-service TCP listener
//!
//! Binds the service's local port and spawns a handler task for every accepted
//! connection. The accept loop never waits on resolution, dialing, or relaying.

use crate::handler::{ConnectionHandler, ConnectionIdGenerator};
use sentinel_tunnel_resolver::AddressResolver;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum ServiceListenerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try using a different Local_port for this database")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },

    #[error("Failed to accept connection on port {port}: {source}")]
    AcceptError {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct ServiceListenerConfig {
    pub bind_addr: SocketAddr,
    pub service_name: String,
    pub dial_timeout: Option<Duration>,
}

impl ServiceListenerConfig {
    pub fn new(service_name: impl Into<String>, bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            service_name: service_name.into(),
            dial_timeout: None,
        }
    }

    pub fn with_dial_timeout(mut self, dial_timeout: Option<Duration>) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }
}

/// A bound listener for one logical service
pub struct ServiceListener {
    config: ServiceListenerConfig,
    listener: TcpListener,
    handler: ConnectionHandler,
    connection_ids: ConnectionIdGenerator,
}

impl ServiceListener {
    /// Bind the configured address; fails if the port cannot be bound
    pub async fn bind(
        config: ServiceListenerConfig,
        resolver: Arc<dyn AddressResolver>,
    ) -> Result<Self, ServiceListenerError> {
        let listener = TcpListener::bind(config.bind_addr).await.map_err(|e| {
            ServiceListenerError::BindError {
                address: config.bind_addr.ip().to_string(),
                port: config.bind_addr.port(),
                reason: e.to_string(),
            }
        })?;

        let handler = ConnectionHandler::new(config.service_name.as_str(), resolver)
            .with_dial_timeout(config.dial_timeout);

        Ok(Self {
            config,
            listener,
            handler,
            connection_ids: ConnectionIdGenerator::new(),
        })
    }

    /// Share a connection id sequence with other listeners
    pub fn with_connection_ids(mut self, connection_ids: ConnectionIdGenerator) -> Self {
        self.connection_ids = connection_ids;
        self
    }

    /// Actual bound address (useful when binding port 0)
    pub fn local_addr(&self) -> Result<SocketAddr, ServiceListenerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    /// Accept connections until accepting fails
    ///
    /// Only returns on an accept error; tunnels already running are unaffected.
    pub async fn run(self) -> Result<(), ServiceListenerError> {
        let addr = self.local_addr()?;
        let port = addr.port();

        info!(
            "Listening on {} for connections to database: {}",
            addr, self.config.service_name
        );

        loop {
            let (socket, peer_addr) = self
                .listener
                .accept()
                .await
                .map_err(|source| ServiceListenerError::AcceptError { port, source })?;

            let connection_id = self.connection_ids.generate();
            debug!(
                connection_id,
                "Accepted connection from {} on port {}", peer_addr, port
            );

            let handler = self.handler.clone();
            tokio::spawn(async move {
                if let Err(e) = handler.handle(socket, peer_addr, connection_id).await {
                    error!(connection_id, "{}", e);
                }
            });
        }
    }
}
