//! Resolver trait for logical service lookups

use crate::codec::CodecError;
use async_trait::async_trait;
use thiserror::Error;

/// Resolution errors
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("No sentinel addresses configured")]
    NoSentinels,

    #[error("All sentinels failed while resolving '{service}': {last_error}")]
    AllSentinelsFailed { service: String, last_error: String },

    #[error("Sentinel replied with error: {0}")]
    Sentinel(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Timeout")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolves a logical service name to the `host:port` of its current backend
///
/// Implementations are shared by every connection-handling task, so `resolve`
/// may be called concurrently from any number of tasks. Two calls for the same
/// name may legitimately return different addresses (failover).
#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve(&self, service_name: &str) -> Result<String, ResolveError>;
}
