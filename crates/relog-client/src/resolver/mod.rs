//! Name resolution extension point
//!
//! A [`ResolverBuilder`] is registered per target scheme in a
//! [`ResolverRegistry`]. Building a target yields a [`Resolver`] that pushes
//! complete [`State`] snapshots into the [`ClientConn`] it was built for.

mod log_resolver;
mod state;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub use log_resolver::{LogResolver, LogResolverBuilder};
pub use state::{Address, ServiceConfig, State};

use crate::error::{ClientError, Result};

/// A parsed dial target such as `relog://127.0.0.1:8400`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub scheme: String,
    /// Address of the bootstrap member
    pub endpoint: String,
}

impl Target {
    pub fn new(scheme: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Parse `scheme://endpoint` or `scheme://authority/endpoint`.
    pub fn parse(target: &str) -> Result<Self> {
        let (scheme, rest) = target
            .split_once("://")
            .ok_or_else(|| ClientError::InvalidTarget(target.to_string()))?;
        let endpoint = match rest.split_once('/') {
            Some((_, endpoint)) => endpoint,
            None => rest,
        };
        if scheme.is_empty() || endpoint.is_empty() {
            return Err(ClientError::InvalidTarget(target.to_string()));
        }
        Ok(Self::new(scheme, endpoint))
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.scheme, self.endpoint)
    }
}

/// Options handed to a builder
#[derive(Clone, Debug)]
pub struct BuildOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Periodic re-resolution started by registry builds; `None` disables it.
    pub refresh_interval: Option<Duration>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(3),
            refresh_interval: Some(Duration::from_secs(5)),
        }
    }
}

/// Receiver of resolved state, implemented by the client connection
pub trait ClientConn: Send + Sync {
    /// Replace the whole resolved state.
    fn update_state(&self, state: State) -> Result<()>;
}

/// A live resolver for one target
#[async_trait::async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve again. Failures keep the previous state in place.
    async fn resolve_now(&self);

    /// Release the resources held by the resolver.
    async fn close(&self);
}

/// Factory for resolvers of one scheme
#[async_trait::async_trait]
pub trait ResolverBuilder: Send + Sync {
    fn scheme(&self) -> &str;

    async fn build(
        &self,
        target: Target,
        cc: Arc<dyn ClientConn>,
        options: BuildOptions,
    ) -> Result<Arc<dyn Resolver>>;
}

/// Resolver builders keyed by scheme.
///
/// Populated explicitly at startup and passed around as a value.
#[derive(Clone, Default)]
pub struct ResolverRegistry {
    builders: HashMap<String, Arc<dyn ResolverBuilder>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `builder` under its scheme, replacing any previous one.
    pub fn register(&mut self, builder: Arc<dyn ResolverBuilder>) {
        self.builders.insert(builder.scheme().to_string(), builder);
    }

    pub fn get(&self, scheme: &str) -> Option<Arc<dyn ResolverBuilder>> {
        self.builders.get(scheme).cloned()
    }

    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.builders.keys().cloned().collect();
        schemes.sort();
        schemes
    }

    /// Parse `target` and build a resolver with the builder for its scheme.
    pub async fn build(
        &self,
        target: &str,
        cc: Arc<dyn ClientConn>,
        options: BuildOptions,
    ) -> Result<Arc<dyn Resolver>> {
        let target = Target::parse(target)?;
        let builder = self
            .get(&target.scheme)
            .ok_or_else(|| ClientError::UnknownScheme(target.scheme.clone()))?;
        builder.build(target, cc, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        let target = Target::parse("relog://127.0.0.1:8400").unwrap();
        assert_eq!(target, Target::new("relog", "127.0.0.1:8400"));

        let target = Target::parse("relog:///127.0.0.1:8400").unwrap();
        assert_eq!(target.endpoint, "127.0.0.1:8400");
        assert_eq!(target.to_string(), "relog://127.0.0.1:8400");
    }

    #[test]
    fn test_parse_invalid_target() {
        assert!(matches!(
            Target::parse("127.0.0.1:8400"),
            Err(ClientError::InvalidTarget(_))
        ));
        assert!(matches!(
            Target::parse("relog://"),
            Err(ClientError::InvalidTarget(_))
        ));
        assert!(matches!(
            Target::parse("://host:1"),
            Err(ClientError::InvalidTarget(_))
        ));
    }

    #[tokio::test]
    async fn test_registry_unknown_scheme() {
        let mut registry = ResolverRegistry::new();
        registry.register(Arc::new(LogResolverBuilder));
        assert_eq!(registry.schemes(), vec!["relog".to_string()]);
        assert!(registry.get("relog").is_some());

        let cc = Arc::new(crate::routing::RoutingTable::new());
        let err = registry
            .build("dns://example.com:53", cc, BuildOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::UnknownScheme(scheme) if scheme == "dns"));
    }
}
