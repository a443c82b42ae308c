//! Reverse DNS for trace headers.
//!
//! Lookups only enrich `Received`; a failure never fails a delivery.

use std::{fmt::Debug, net::IpAddr, time::Duration};

use ahash::AHashMap;
use async_trait::async_trait;
use hickory_resolver::{
    TokioResolver, config::ResolverOpts, name_server::TokioConnectionProvider,
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("No PTR records for {0}")]
    NotFound(IpAddr),

    #[error("DNS lookup failed: {0}")]
    LookupFailed(#[from] hickory_resolver::ResolveError),
}

#[async_trait]
pub trait Resolver: Send + Sync + Debug {
    /// Names registered for `ip`, as returned by the resolver.
    async fn lookup_addr(&self, ip: IpAddr) -> Result<Vec<String>, ResolveError>;
}

/// First name for `ip` with any trailing root dot removed, or `None` if the
/// lookup failed or returned nothing usable.
pub async fn lookup_name(resolver: &dyn Resolver, ip: IpAddr) -> Option<String> {
    match resolver.lookup_addr(ip).await {
        Ok(names) => names
            .into_iter()
            .map(|name| name.trim_end_matches('.').to_string())
            .find(|name| !name.is_empty()),
        Err(err) => {
            debug!("Reverse lookup of {ip} failed: {err}");
            None
        }
    }
}

/// System resolver backed by hickory.
#[derive(Debug)]
pub struct HickoryResolver {
    resolver: TokioResolver,
}

impl HickoryResolver {
    /// Build from the system resolver configuration.
    ///
    /// # Errors
    /// If the system configuration cannot be read
    pub fn new(timeout: Duration) -> Result<Self, ResolveError> {
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;

        let resolver = TokioResolver::builder(TokioConnectionProvider::default())?
            .with_options(opts)
            .build();

        Ok(Self { resolver })
    }
}

#[async_trait]
impl Resolver for HickoryResolver {
    async fn lookup_addr(&self, ip: IpAddr) -> Result<Vec<String>, ResolveError> {
        let lookup = self.resolver.reverse_lookup(ip).await?;
        let names = lookup.iter().map(ToString::to_string).collect::<Vec<_>>();

        if names.is_empty() {
            return Err(ResolveError::NotFound(ip));
        }

        Ok(names)
    }
}

/// Fixed answers, for tests and offline setups.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    names: AHashMap<IpAddr, Vec<String>>,
}

impl StaticResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, ip: IpAddr, name: impl Into<String>) -> Self {
        self.names.entry(ip).or_default().push(name.into());
        self
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn lookup_addr(&self, ip: IpAddr) -> Result<Vec<String>, ResolveError> {
        self.names
            .get(&ip)
            .cloned()
            .ok_or(ResolveError::NotFound(ip))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[tokio::test]
    async fn test_lookup_name_trims_root() {
        let ip = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));
        let resolver = StaticResolver::new().with(ip, "mail.example.net.");

        assert_eq!(
            lookup_name(&resolver, ip).await.as_deref(),
            Some("mail.example.net")
        );
    }

    #[tokio::test]
    async fn test_lookup_name_degrades() {
        let known = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));
        let resolver = StaticResolver::new().with(known, ".");

        assert_eq!(lookup_name(&resolver, known).await, None);
        assert_eq!(
            lookup_name(&resolver, IpAddr::V4(Ipv4Addr::LOCALHOST)).await,
            None
        );
    }
}
