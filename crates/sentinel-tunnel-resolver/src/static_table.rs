//! In-memory resolver backed by a concurrent name -> address table

use crate::resolver::{AddressResolver, ResolveError};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, trace};

/// Resolver with a fixed (but mutable) table of addresses
///
/// Updating an entry while connections are open only affects connections
/// accepted afterwards, the same way a Sentinel failover does.
#[derive(Default)]
pub struct StaticResolver {
    entries: DashMap<String, String>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Build from `(service, address)` pairs
    pub fn from_entries<I, N, A>(entries: I) -> Self
    where
        I: IntoIterator<Item = (N, A)>,
        N: Into<String>,
        A: Into<String>,
    {
        let resolver = Self::new();
        for (name, address) in entries {
            resolver.insert(name, address);
        }
        resolver
    }

    /// Point `service_name` at `address`, returning the previous address
    pub fn insert(&self, service_name: impl Into<String>, address: impl Into<String>) -> Option<String> {
        let service_name = service_name.into();
        let address = address.into();
        debug!("Static route {} -> {}", service_name, address);
        self.entries.insert(service_name, address)
    }

    pub fn remove(&self, service_name: &str) -> Option<String> {
        self.entries.remove(service_name).map(|(_, address)| address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl AddressResolver for StaticResolver {
    async fn resolve(&self, service_name: &str) -> Result<String, ResolveError> {
        trace!("Static lookup for {}", service_name);

        self.entries
            .get(service_name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ResolveError::UnknownService(service_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_lookup() {
        let resolver = StaticResolver::from_entries([("cache", "127.0.0.1:9000")]);

        assert_eq!(resolver.resolve("cache").await.unwrap(), "127.0.0.1:9000");
        assert!(matches!(
            resolver.resolve("sessions").await,
            Err(ResolveError::UnknownService(_))
        ));
    }

    #[tokio::test]
    async fn test_failover_swaps_address() {
        let resolver = StaticResolver::new();
        assert!(resolver.is_empty());

        assert_eq!(resolver.insert("cache", "10.0.0.1:6379"), None);
        assert_eq!(resolver.resolve("cache").await.unwrap(), "10.0.0.1:6379");

        assert_eq!(
            resolver.insert("cache", "10.0.0.2:6379"),
            Some("10.0.0.1:6379".to_string())
        );
        assert_eq!(resolver.resolve("cache").await.unwrap(), "10.0.0.2:6379");

        assert_eq!(resolver.remove("cache"), Some("10.0.0.2:6379".to_string()));
        assert_eq!(resolver.len(), 0);
        assert!(resolver.resolve("cache").await.is_err());
    }
}
