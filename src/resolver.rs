//! Backend name resolution.
//!
//! A logical backend name is turned into the ordered list of addresses the
//! name service currently returns for it. Nothing is cached: every call is a
//! fresh lookup.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    /// The name service reported an error; surfaced unchanged.
    #[error(transparent)]
    Lookup(#[from] std::io::Error),

    #[error("lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// Resolves a logical name to address strings.
///
/// An empty `Ok` list means the name exists but has no addresses; failures
/// are reported as errors and never retried here.
pub trait Resolve: Send + Sync + 'static {
    fn resolve(&self, name: &str) -> impl Future<Output = Result<Vec<String>, ResolveError>> + Send;
}

/// Resolver backed by the system name service (`getaddrinfo`).
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolver;

impl DnsResolver {
    pub fn new() -> Self {
        Self
    }
}

impl Resolve for DnsResolver {
    async fn resolve(&self, name: &str) -> Result<Vec<String>, ResolveError> {
        let addrs = tokio::net::lookup_host((name, 0)).await?;

        // getaddrinfo yields one entry per socket type; keep each IP once
        let mut ips: Vec<String> = Vec::new();
        for addr in addrs {
            let ip = addr.ip().to_string();
            if !ips.contains(&ip) {
                ips.push(ip);
            }
        }

        tracing::trace!(name, count = ips.len(), "Lookup complete");
        Ok(ips)
    }
}
