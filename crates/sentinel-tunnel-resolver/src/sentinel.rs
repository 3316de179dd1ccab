//! Redis Sentinel resolver
//!
//! Looks up the current master of a logical service with
//! `SENTINEL get-master-addr-by-name <name>`. Each lookup opens a short-lived
//! connection to one sentinel at a time, starting with the sentinel that
//! answered most recently, and falls through to the next one on failure.
//! Answers are never cached: every call asks a sentinel again, so a failover
//! is picked up by the very next connection.

use crate::codec::{RespCodec, RespValue};
use crate::resolver::{AddressResolver, ResolveError};
use async_trait::async_trait;
use bytes::BytesMut;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Resolver backed by a set of Redis Sentinel endpoints
pub struct SentinelResolver {
    addresses: Vec<String>,
    timeout: Duration,
    /// Index of the sentinel that answered last
    preferred: AtomicUsize,
}

impl SentinelResolver {
    /// Default per-sentinel connect + reply timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a resolver without contacting any sentinel
    pub fn new(addresses: Vec<String>) -> Result<Self, ResolveError> {
        if addresses.is_empty() {
            return Err(ResolveError::NoSentinels);
        }

        Ok(Self {
            addresses,
            timeout: Self::DEFAULT_TIMEOUT,
            preferred: AtomicUsize::new(0),
        })
    }

    /// Set the per-sentinel timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Create a resolver and make sure at least one sentinel is reachable
    pub async fn connect(addresses: Vec<String>, timeout: Duration) -> Result<Self, ResolveError> {
        let resolver = Self::new(addresses)?.with_timeout(timeout);
        let sentinel = resolver.ping().await?;
        info!("Connected to sentinel {}", sentinel);
        Ok(resolver)
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// PING sentinels in order until one answers; returns its address
    pub async fn ping(&self) -> Result<String, ResolveError> {
        let mut last_error = None;

        for (index, sentinel) in self.rotation() {
            match self.query(sentinel, &["PING"]).await {
                Ok(RespValue::Simple(reply)) if reply.eq_ignore_ascii_case("PONG") => {
                    self.prefer(index);
                    return Ok(sentinel.to_string());
                }
                Ok(other) => {
                    warn!("Unexpected PING reply from sentinel {}: {:?}", sentinel, other);
                    last_error = Some(ResolveError::Protocol(format!(
                        "unexpected PING reply: {:?}",
                        other
                    )));
                }
                Err(e) => {
                    warn!("Sentinel {} is not reachable: {}", sentinel, e);
                    last_error = Some(e);
                }
            }
        }

        Err(ResolveError::AllSentinelsFailed {
            service: "PING".to_string(),
            last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    /// Sentinels starting from the preferred one, wrapping around
    fn rotation(&self) -> impl Iterator<Item = (usize, &str)> + '_ {
        let len = self.addresses.len();
        let start = self.preferred.load(Ordering::Relaxed) % len;
        (0..len).map(move |offset| {
            let index = (start + offset) % len;
            (index, self.addresses[index].as_str())
        })
    }

    fn prefer(&self, index: usize) {
        let previous = self.preferred.swap(index, Ordering::Relaxed);
        if previous != index {
            debug!(
                "Preferring sentinel {} over {}",
                self.addresses[index], self.addresses[previous % self.addresses.len()]
            );
        }
    }

    /// Send one command to one sentinel and read one reply, bounded by the timeout
    async fn query(&self, sentinel: &str, args: &[&str]) -> Result<RespValue, ResolveError> {
        tokio::time::timeout(self.timeout, exchange(sentinel, args))
            .await
            .map_err(|_| ResolveError::Timeout)?
    }
}

async fn exchange(sentinel: &str, args: &[&str]) -> Result<RespValue, ResolveError> {
    let mut stream = TcpStream::connect(sentinel).await?;
    stream.write_all(&RespCodec::encode_command(args)).await?;

    let mut buf = BytesMut::with_capacity(256);
    loop {
        if let Some(reply) = RespCodec::decode(&mut buf)? {
            return Ok(reply);
        }

        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(ResolveError::Protocol(
                "sentinel closed the connection before replying".to_string(),
            ));
        }
    }
}

/// Turn a `get-master-addr-by-name` reply into `host:port`
fn parse_master_reply(service_name: &str, reply: RespValue) -> Result<String, ResolveError> {
    if reply.is_nil() {
        return Err(ResolveError::UnknownService(service_name.to_string()));
    }

    let items = match reply {
        RespValue::Array(Some(items)) if items.len() == 2 => items,
        RespValue::Error(message) => return Err(ResolveError::Sentinel(message)),
        other => {
            return Err(ResolveError::Protocol(format!(
                "unexpected master address reply: {:?}",
                other
            )))
        }
    };

    let host = items[0]
        .as_text()
        .ok_or_else(|| ResolveError::Protocol("master host is not a string".to_string()))?;
    let port = items[1]
        .as_text()
        .ok_or_else(|| ResolveError::Protocol("master port is not a string".to_string()))?;
    let port: u16 = port
        .parse()
        .map_err(|_| ResolveError::Protocol(format!("invalid master port '{}'", port)))?;

    if host.contains(':') {
        Ok(format!("[{}]:{}", host, port))
    } else {
        Ok(format!("{}:{}", host, port))
    }
}

#[async_trait]
impl AddressResolver for SentinelResolver {
    async fn resolve(&self, service_name: &str) -> Result<String, ResolveError> {
        let mut last_error = None;

        for (index, sentinel) in self.rotation() {
            debug!("Asking sentinel {} for master of {}", sentinel, service_name);

            let reply = match self
                .query(sentinel, &["SENTINEL", "get-master-addr-by-name", service_name])
                .await
            {
                Ok(RespValue::Error(message)) => {
                    warn!("Sentinel {} returned error: {}", sentinel, message);
                    last_error = Some(ResolveError::Sentinel(message));
                    continue;
                }
                Ok(reply) => reply,
                Err(e) => {
                    warn!("Sentinel {} failed: {}", sentinel, e);
                    last_error = Some(e);
                    continue;
                }
            };

            self.prefer(index);
            return parse_master_reply(service_name, reply);
        }

        Err(ResolveError::AllSentinelsFailed {
            service: service_name.to_string(),
            last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}
