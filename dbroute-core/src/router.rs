//! Read/write query routing.
//!
//! ```text
//!              ┌─────────────┐
//!              │ QueryRouter │
//!              └──────┬──────┘
//!            read     │     write
//!        ┌────────────┴────────────┐
//!        ↓                         ↓
//! ┌─────────────┐        ┌───────────────────┐
//! │ shared pool │        │ primary (1 conn   │
//! │ (host)      │        │  per write call)  │
//! └─────────────┘        └───────────────────┘
//! ```
//!
//! Reads borrow a connection from the pool; the pool takes it back when the
//! borrow ends. A semaphore with one permit per pooled connection tracks
//! reads in flight, which is what the `reject` exhaustion policy checks. Writes open a fresh connection to the node named by the
//! [`PrimaryResolver`], run the query and close the connection before
//! returning, whether the query succeeded or not.
//!
//! Errors from the driver come back untouched inside [`RouterError`]. Nothing
//! is retried.

use std::sync::Arc;

use sqlx::mysql::{MySqlConnection, MySqlPool};
use sqlx::pool::PoolOptions;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use sqlx::{Connection, Database, Executor};
use tokio::sync::{Semaphore, SemaphorePermit, TryAcquireError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{DbConfig, ExhaustionPolicy, PoolConfig};
use crate::endpoint::Endpoint;
use crate::error::{Result, RouterError};
use crate::record::{self, Record, WriteSummary};
use crate::stats::{Counters, PrimaryGuard, RouterStats};
use crate::topology::{PrimaryResolver, StaticPrimary};

/// Routes reads to the shared pool and writes to the primary.
///
/// Cheap to clone; clones share the pool, the resolver and the counters.
#[derive(Clone)]
pub struct QueryRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    config: DbConfig,
    pool: ReadPool,
    read_slots: Semaphore,
    resolver: Box<dyn PrimaryResolver>,
    counters: Counters,
}

/// The shared read pool, typed by driver
enum ReadPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl ReadPool {
    fn connect_lazy(endpoint: Endpoint, settings: &PoolConfig) -> Self {
        match endpoint {
            Endpoint::MySql(options) => Self::MySql(pool_options(settings).connect_lazy_with(options)),
            Endpoint::Postgres(options) => {
                Self::Postgres(pool_options(settings).connect_lazy_with(options))
            }
            Endpoint::Sqlite(options) => Self::Sqlite(pool_options(settings).connect_lazy_with(options)),
        }
    }

    fn size(&self) -> u32 {
        match self {
            Self::MySql(pool) => pool.size(),
            Self::Postgres(pool) => pool.size(),
            Self::Sqlite(pool) => pool.size(),
        }
    }

    fn num_idle(&self) -> usize {
        match self {
            Self::MySql(pool) => pool.num_idle(),
            Self::Postgres(pool) => pool.num_idle(),
            Self::Sqlite(pool) => pool.num_idle(),
        }
    }

    async fn close(&self) {
        match self {
            Self::MySql(pool) => pool.close().await,
            Self::Postgres(pool) => pool.close().await,
            Self::Sqlite(pool) => pool.close().await,
        }
    }

    fn is_closed(&self) -> bool {
        match self {
            Self::MySql(pool) => pool.is_closed(),
            Self::Postgres(pool) => pool.is_closed(),
            Self::Sqlite(pool) => pool.is_closed(),
        }
    }

    async fn fetch_records(&self, query: &str) -> Result<Vec<Record>> {
        match self {
            Self::MySql(pool) => {
                let mut pooled = pool.acquire().await.map_err(RouterError::Acquire)?;
                let conn: &mut MySqlConnection = &mut pooled;
                let rows = conn
                    .fetch_all(sqlx::raw_sql(query))
                    .await
                    .map_err(RouterError::Query)?;
                rows.iter().map(record::mysql_record).collect()
            }
            Self::Postgres(pool) => {
                let mut pooled = pool.acquire().await.map_err(RouterError::Acquire)?;
                let conn: &mut PgConnection = &mut pooled;
                let rows = conn
                    .fetch_all(sqlx::raw_sql(query))
                    .await
                    .map_err(RouterError::Query)?;
                rows.iter().map(record::postgres_record).collect()
            }
            Self::Sqlite(pool) => {
                let mut pooled = pool.acquire().await.map_err(RouterError::Acquire)?;
                let conn: &mut SqliteConnection = &mut pooled;
                let rows = conn
                    .fetch_all(sqlx::raw_sql(query))
                    .await
                    .map_err(RouterError::Query)?;
                rows.iter().map(record::sqlite_record).collect()
            }
        }
    }
}

fn pool_options<DB: Database>(settings: &PoolConfig) -> PoolOptions<DB> {
    PoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.acquire_timeout())
}

impl std::fmt::Debug for QueryRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRouter")
            .field("driver", &self.inner.config.driver)
            .field("host", &self.inner.config.host)
            .field("resolver", &self.inner.resolver)
            .field("pool_size", &self.inner.pool.size())
            .finish()
    }
}

impl QueryRouter {
    /// Build a router that writes to the configured `primary_host`.
    ///
    /// The pool connects lazily, so this succeeds even when no database is
    /// reachable yet; the first read reports any connectivity problem.
    pub async fn connect(config: DbConfig) -> Result<Self> {
        let resolver = StaticPrimary::from_config(&config);
        Self::with_resolver(config, resolver).await
    }

    pub async fn with_resolver<R>(config: DbConfig, resolver: R) -> Result<Self>
    where
        R: PrimaryResolver + 'static,
    {
        config.validate()?;

        let pool = ReadPool::connect_lazy(config.read_endpoint()?, &config.pool);
        let read_slots = Semaphore::new(config.pool.max_connections as usize);

        info!(
            driver = %config.driver,
            host = %config.host,
            max_connections = config.pool.max_connections,
            exhaustion = ?config.pool.exhaustion,
            resolver = ?resolver,
            "query router ready"
        );

        Ok(Self {
            inner: Arc::new(RouterInner {
                config,
                pool,
                read_slots,
                resolver: Box::new(resolver),
                counters: Counters::default(),
            }),
        })
    }

    pub fn config(&self) -> &DbConfig {
        &self.inner.config
    }

    /// Run `query` on a pooled connection to the read endpoint.
    pub async fn read(&self, query: &str) -> Result<Vec<Record>> {
        let counters = &self.inner.counters;
        counters.read_started();

        let result = self.run_read(query).await;
        if result.is_err() {
            counters.read_failed();
        }
        result
    }

    /// Run `query` on a dedicated connection to the primary.
    pub async fn write(&self, query: &str) -> Result<WriteSummary> {
        let counters = &self.inner.counters;
        counters.write_started();

        let result = self.run_write(query).await;
        if result.is_err() {
            counters.write_failed();
        }
        result
    }

    /// Callback form of [`read`](Self::read).
    ///
    /// The query runs on a spawned task and `callback` is invoked exactly once
    /// with its outcome. Await the handle to know the callback has returned.
    pub fn perform_read_query<F>(&self, query: impl Into<String>, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<Vec<Record>>) + Send + 'static,
    {
        let router = self.clone();
        let query = query.into();
        tokio::spawn(async move {
            let result = router.read(&query).await;
            callback(result);
        })
    }

    /// Callback form of [`write`](Self::write). Same contract as
    /// [`perform_read_query`](Self::perform_read_query).
    pub fn perform_write_query<F>(&self, query: impl Into<String>, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<WriteSummary>) + Send + 'static,
    {
        let router = self.clone();
        let query = query.into();
        tokio::spawn(async move {
            let result = router.write(&query).await;
            callback(result);
        })
    }

    pub fn stats(&self) -> RouterStats {
        self.inner.counters.snapshot()
    }

    /// Connections currently held by the read pool (idle and in use)
    pub fn pool_size(&self) -> u32 {
        self.inner.pool.size()
    }

    pub fn idle_connections(&self) -> usize {
        self.inner.pool.num_idle()
    }

    /// Reads currently holding (or waiting on) a pooled connection
    pub fn reads_in_flight(&self) -> usize {
        let max = self.inner.config.pool.max_connections as usize;
        max.saturating_sub(self.inner.read_slots.available_permits())
    }

    /// Close the read pool. Later reads fail with [`RouterError::Acquire`].
    pub async fn close(&self) {
        self.inner.read_slots.close();
        self.inner.pool.close().await;
        debug!("read pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.pool.is_closed()
    }

    async fn run_read(&self, query: &str) -> Result<Vec<Record>> {
        let _slot = self.read_slot().await?;
        debug!(host = %self.inner.config.host, "routing read to pool");

        self.inner.pool.fetch_records(query).await
    }

    /// One permit per pooled connection, held for the whole read.
    async fn read_slot(&self) -> Result<SemaphorePermit<'_>> {
        let settings = &self.inner.config.pool;
        let slots = &self.inner.read_slots;

        match settings.exhaustion {
            ExhaustionPolicy::Reject => slots.try_acquire().map_err(|err| match err {
                TryAcquireError::NoPermits => RouterError::PoolExhausted {
                    max_connections: settings.max_connections,
                },
                TryAcquireError::Closed => RouterError::Acquire(sqlx::Error::PoolClosed),
            }),
            ExhaustionPolicy::Queue => {
                match tokio::time::timeout(settings.acquire_timeout(), slots.acquire()).await {
                    Ok(Ok(permit)) => Ok(permit),
                    Ok(Err(_)) => Err(RouterError::Acquire(sqlx::Error::PoolClosed)),
                    Err(_) => Err(RouterError::Acquire(sqlx::Error::PoolTimedOut)),
                }
            }
        }
    }

    async fn run_write(&self, query: &str) -> Result<WriteSummary> {
        let endpoint = self.inner.resolver.resolve(&self.inner.config)?;
        debug!(resolver = ?self.inner.resolver, primary = ?endpoint, "routing write to primary");

        let counters = &self.inner.counters;
        match endpoint {
            Endpoint::MySql(options) => {
                let mut conn = MySqlConnection::connect_with(&options)
                    .await
                    .map_err(RouterError::Connect)?;
                let guard = PrimaryGuard::opened(counters);
                let result = {
                    let primary: &mut MySqlConnection = &mut conn;
                    primary.execute(sqlx::raw_sql(query)).await
                };
                close_primary(conn, guard).await;
                result.map(WriteSummary::from).map_err(RouterError::Query)
            }
            Endpoint::Postgres(options) => {
                let mut conn = PgConnection::connect_with(&options)
                    .await
                    .map_err(RouterError::Connect)?;
                let guard = PrimaryGuard::opened(counters);
                let result = {
                    let primary: &mut PgConnection = &mut conn;
                    primary.execute(sqlx::raw_sql(query)).await
                };
                close_primary(conn, guard).await;
                result.map(WriteSummary::from).map_err(RouterError::Query)
            }
            Endpoint::Sqlite(options) => {
                let mut conn = SqliteConnection::connect_with(&options)
                    .await
                    .map_err(RouterError::Connect)?;
                let guard = PrimaryGuard::opened(counters);
                let result = {
                    let primary: &mut SqliteConnection = &mut conn;
                    primary.execute(sqlx::raw_sql(query)).await
                };
                close_primary(conn, guard).await;
                result.map(WriteSummary::from).map_err(RouterError::Query)
            }
        }
    }
}

/// Close a primary connection; the guard is released even if closing fails.
async fn close_primary<C: Connection>(conn: C, guard: PrimaryGuard<'_>) {
    if let Err(err) = conn.close().await {
        warn!(error = %err, "failed to close primary connection cleanly");
    }
    drop(guard);
}
