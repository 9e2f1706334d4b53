//! Typed connect options for one database node.
//!
//! Each driver gets its own sqlx options type so pools and connections are
//! the concrete `MySqlPool`/`PgPool`/`SqlitePool` and rows decode with the
//! backend's full type set.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use sqlx::mysql::MySqlConnectOptions;
use sqlx::postgres::PgConnectOptions;
use sqlx::sqlite::SqliteConnectOptions;

use crate::config::{DbConfig, Driver};
use crate::error::{Result, RouterError};

/// Where and how to connect to a single node.
#[derive(Clone)]
pub enum Endpoint {
    MySql(MySqlConnectOptions),
    Postgres(PgConnectOptions),
    Sqlite(SqliteConnectOptions),
}

impl Endpoint {
    /// Options for `host` using the driver and credentials in `config`.
    ///
    /// For sqlite `host` is a directory and the database file is created
    /// inside it on first use.
    pub fn for_host(config: &DbConfig, host: &str) -> Result<Self> {
        if host.trim().is_empty() {
            return Err(RouterError::config("host must not be empty"));
        }

        let endpoint = match config.driver {
            Driver::Mysql => {
                let mut options = MySqlConnectOptions::new()
                    .host(host)
                    .username(&config.user)
                    .database(&config.database);
                if !config.password.is_empty() {
                    options = options.password(&config.password);
                }
                if let Some(port) = config.port {
                    options = options.port(port);
                }
                Endpoint::MySql(options)
            }
            Driver::Postgres => {
                let mut options = PgConnectOptions::new()
                    .host(host)
                    .username(&config.user)
                    .database(&config.database);
                if !config.password.is_empty() {
                    options = options.password(&config.password);
                }
                if let Some(port) = config.port {
                    options = options.port(port);
                }
                Endpoint::Postgres(options)
            }
            Driver::Sqlite => Endpoint::Sqlite(
                SqliteConnectOptions::new()
                    .filename(Path::new(host).join(&config.database))
                    .create_if_missing(true),
            ),
        };
        Ok(endpoint)
    }

    /// Parse a full connection URL; the scheme picks the driver.
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, _) = url
            .split_once("://")
            .ok_or_else(|| RouterError::config("connection url has no scheme"))?;
        let invalid = |e: sqlx::Error| RouterError::config(format!("invalid connection url: {e}"));

        let endpoint = match scheme.parse::<Driver>()? {
            Driver::Mysql => Endpoint::MySql(MySqlConnectOptions::from_str(url).map_err(invalid)?),
            Driver::Postgres => Endpoint::Postgres(PgConnectOptions::from_str(url).map_err(invalid)?),
            Driver::Sqlite => Endpoint::Sqlite(SqliteConnectOptions::from_str(url).map_err(invalid)?),
        };
        Ok(endpoint)
    }

    pub fn driver(&self) -> Driver {
        match self {
            Endpoint::MySql(_) => Driver::Mysql,
            Endpoint::Postgres(_) => Driver::Postgres,
            Endpoint::Sqlite(_) => Driver::Sqlite,
        }
    }
}

// The sqlx options types print passwords in their Debug output
impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::MySql(options) => f
                .debug_struct("MySql")
                .field("host", &options.get_host())
                .field("port", &options.get_port())
                .field("database", &options.get_database())
                .finish(),
            Endpoint::Postgres(options) => f
                .debug_struct("Postgres")
                .field("host", &options.get_host())
                .field("port", &options.get_port())
                .field("database", &options.get_database())
                .finish(),
            Endpoint::Sqlite(options) => f
                .debug_struct("Sqlite")
                .field("filename", &options.get_filename())
                .finish(),
        }
    }
}
