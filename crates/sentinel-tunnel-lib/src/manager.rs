//! Starts one listener per configured database and supervises them

use sentinel_tunnel_config::{ConfigError, ListenerFailurePolicy, TunnelConfig};
use sentinel_tunnel_resolver::AddressResolver;
use sentinel_tunnel_server::{
    ConnectionIdGenerator, ServiceListener, ServiceListenerConfig, ServiceListenerError,
};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum TunnelManagerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cannot start listener for {service}: {source}")]
    Bind {
        service: String,
        #[source]
        source: ServiceListenerError,
    },

    #[error("Listener for {service} failed: {source}")]
    ListenerFailed {
        service: String,
        #[source]
        source: ServiceListenerError,
    },

    #[error("Listener task failed: {0}")]
    TaskFailed(String),

    #[error("Listener error: {0}")]
    Listener(#[from] ServiceListenerError),
}

type ListenerOutcome = (String, Result<(), ServiceListenerError>);

/// Builds the listeners for a [`TunnelConfig`]
pub struct TunnelManager {
    config: TunnelConfig,
    resolver: Arc<dyn AddressResolver>,
}

impl TunnelManager {
    pub fn new(config: &TunnelConfig, resolver: Arc<dyn AddressResolver>) -> Self {
        Self {
            config: config.clone(),
            resolver,
        }
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Bind every listener, then start accepting on all of them
    ///
    /// Nothing accepts connections unless every port could be bound.
    pub async fn start(self) -> Result<RunningTunnels, TunnelManagerError> {
        self.config.validate()?;

        let connection_ids = ConnectionIdGenerator::new();
        let dial_timeout = self.config.dial_timeout();
        let routes = self.config.routes()?;

        let mut listeners = Vec::with_capacity(routes.len());
        for route in routes {
            let bind_addr = self.config.listen_addr(route.port)?;
            let listener_config = ServiceListenerConfig::new(route.name.clone(), bind_addr)
                .with_dial_timeout(dial_timeout);

            let listener = ServiceListener::bind(listener_config, self.resolver.clone())
                .await
                .map_err(|source| TunnelManagerError::Bind {
                    service: route.name.clone(),
                    source,
                })?;

            debug!(service = %route.name, port = route.port, "Bound listener");
            listeners.push(listener.with_connection_ids(connection_ids.clone()));
        }

        let mut local_addrs = Vec::with_capacity(listeners.len());
        let mut tasks = JoinSet::new();

        for listener in listeners {
            let service = listener.service_name().to_string();
            local_addrs.push((service.clone(), listener.local_addr()?));

            tasks.spawn(async move {
                let result = listener.run().await;
                (service, result)
            });
        }

        info!(
            listeners = local_addrs.len(),
            policy = %self.config.listener_failure,
            "Done initializing tunnelling"
        );

        Ok(RunningTunnels {
            policy: self.config.listener_failure,
            local_addrs,
            tasks,
        })
    }
}

/// Listeners started by [`TunnelManager::start`]
pub struct RunningTunnels {
    policy: ListenerFailurePolicy,
    local_addrs: Vec<(String, SocketAddr)>,
    tasks: JoinSet<ListenerOutcome>,
}

impl RunningTunnels {
    /// `(service, bound address)` for every listener, in config order
    pub fn local_addrs(&self) -> &[(String, SocketAddr)] {
        &self.local_addrs
    }

    pub fn local_addr(&self, service: &str) -> Option<SocketAddr> {
        self.local_addrs
            .iter()
            .find(|(name, _)| name == service)
            .map(|(_, addr)| *addr)
    }

    pub fn policy(&self) -> ListenerFailurePolicy {
        self.policy
    }

    /// Listeners still accepting connections
    pub fn active_listeners(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for listeners to stop
    ///
    /// With [`ListenerFailurePolicy::Exit`] the first failure is returned.
    /// With [`ListenerFailurePolicy::Isolate`] failures are logged and this
    /// only returns once no listener is left. Cancel safe.
    pub async fn wait(&mut self) -> Result<(), TunnelManagerError> {
        while let Some(joined) = self.tasks.join_next().await {
            let (service, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => {
                    error!("Listener task failed: {}", e);
                    if self.policy == ListenerFailurePolicy::Exit {
                        return Err(TunnelManagerError::TaskFailed(e.to_string()));
                    }
                    continue;
                }
            };

            let source = match result {
                Ok(()) => {
                    info!(service = %service, "Listener stopped");
                    continue;
                }
                Err(source) => source,
            };

            match self.policy {
                ListenerFailurePolicy::Exit => {
                    error!(service = %service, "{}", source);
                    return Err(TunnelManagerError::ListenerFailed { service, source });
                }
                ListenerFailurePolicy::Isolate => {
                    warn!(
                        service = %service,
                        remaining = self.tasks.len(),
                        "Listener stopped, other databases keep running: {}",
                        source
                    );
                }
            }
        }

        Ok(())
    }

    /// Stop accepting on every listener
    ///
    /// Tunnels that are already open are not tracked and keep running.
    pub async fn shutdown(mut self) {
        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
        info!("All listeners stopped");
    }
}
