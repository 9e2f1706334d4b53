//! dbroute-core: route read queries to a shared pool and write queries to
//! the primary node.
//!
//! ```ignore
//! let config = DbConfig::load()?;
//! let router = QueryRouter::connect(config).await?;
//!
//! let users = router.read("SELECT id, name FROM users").await?;
//! let summary = router.write("UPDATE users SET active = 1 WHERE id = 7").await?;
//! ```

pub mod config;
pub mod endpoint;
pub mod error;
pub mod record;
pub mod router;
mod stats;
pub mod topology;

pub use config::{load_dotenv, DbConfig, Driver, ExhaustionPolicy, PoolConfig};
pub use endpoint::Endpoint;
pub use error::{Result, RouterError};
pub use record::{Record, WriteSummary};
pub use router::QueryRouter;
pub use stats::RouterStats;
pub use topology::{FixedUrl, PrimaryResolver, StaticPrimary};
