//! Where writes go.
//!
//! Reads are served by the pooled endpoint in [`DbConfig::host`]; writes must
//! reach the single writable node. A [`PrimaryResolver`] turns the shared
//! configuration into that node's [`Endpoint`], so a discovery-backed
//! strategy can replace the static one without touching the router.

use std::fmt;

use crate::config::DbConfig;
use crate::endpoint::Endpoint;
use crate::error::{Result, RouterError};

/// Resolves where the writable node is.
///
/// Called once per write, right before the dedicated connection is opened.
pub trait PrimaryResolver: Send + Sync + fmt::Debug {
    fn resolve(&self, config: &DbConfig) -> Result<Endpoint>;
}

/// Same credentials as the pool, with the host swapped for a fixed primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticPrimary {
    host: String,
}

impl StaticPrimary {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    /// Use the configured `primary_host`
    pub fn from_config(config: &DbConfig) -> Self {
        Self::new(config.primary_host.clone())
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

impl PrimaryResolver for StaticPrimary {
    fn resolve(&self, config: &DbConfig) -> Result<Endpoint> {
        if self.host.trim().is_empty() {
            return Err(RouterError::config("primary host must not be empty"));
        }
        Endpoint::for_host(config, &self.host)
    }
}

/// A complete connection URL handed in from outside (service discovery, tests).
///
/// The URL is parsed on every write, so its scheme may name a different
/// driver than the pool's.
#[derive(Clone, PartialEq, Eq)]
pub struct FixedUrl(String);

impl FixedUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }
}

// URLs may carry credentials
impl fmt::Debug for FixedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = self.0.split("://").next().unwrap_or_default();
        write!(f, "FixedUrl({scheme}://…)")
    }
}

impl PrimaryResolver for FixedUrl {
    fn resolve(&self, _config: &DbConfig) -> Result<Endpoint> {
        Endpoint::parse(&self.0)
    }
}
