use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::endpoint::Endpoint;
use crate::error::{Result, RouterError};

/// Name of the project-local config file, looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "dbroute.toml";

const REDACTED: &str = "********";

/// Load environment variables from .env files in multiple locations
///
/// Priority order (highest to lowest):
/// 1. Environment variables already set
/// 2. Current directory .env
/// 3. ~/.dbroute/.env
///
/// dotenvy never overwrites a variable that is already set, so loading the
/// local file first gives it precedence over the global one.
pub fn load_dotenv() {
    let mut loaded_from = Vec::new();

    if let Ok(path) = dotenvy::dotenv() {
        debug!("Loaded .env from current directory: {}", path.display());
        loaded_from.push(path);
    }

    if let Some(env_file) = config_dir().map(|dir| dir.join(".env")) {
        if env_file.exists() {
            match dotenvy::from_path(&env_file) {
                Ok(()) => {
                    debug!("Loaded .env from ~/.dbroute: {}", env_file.display());
                    loaded_from.push(env_file);
                }
                Err(e) => debug!("Failed to load {}: {}", env_file.display(), e),
            }
        }
    }

    if loaded_from.is_empty() {
        debug!("No .env files found (current dir or ~/.dbroute)");
    } else {
        info!(
            "Loaded environment from: {}",
            loaded_from
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
}

/// Get the dbroute config directory path (~/.dbroute)
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".dbroute"))
}

/// Get the global config file path (~/.dbroute/config.toml)
pub fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Database flavour spoken by both the read pool and the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    #[default]
    Mysql,
    Postgres,
    Sqlite,
}

impl Driver {
    pub fn scheme(self) -> &'static str {
        match self {
            Driver::Mysql => "mysql",
            Driver::Postgres => "postgres",
            Driver::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

impl FromStr for Driver {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Driver::Mysql),
            "postgres" | "postgresql" => Ok(Driver::Postgres),
            "sqlite" => Ok(Driver::Sqlite),
            other => Err(RouterError::config(format!("unknown driver '{other}'"))),
        }
    }
}

/// What the read pool does when every connection is checked out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExhaustionPolicy {
    /// Wait for a connection, up to `acquire_timeout_secs`
    #[default]
    Queue,
    /// Fail the read immediately
    Reject,
}

impl FromStr for ExhaustionPolicy {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queue" | "wait" => Ok(ExhaustionPolicy::Queue),
            "reject" | "fail" => Ok(ExhaustionPolicy::Reject),
            other => Err(RouterError::config(format!(
                "unknown pool exhaustion policy '{other}' (expected queue or reject)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub exhaustion: ExhaustionPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout_secs: 10,
            exhaustion: ExhaustionPolicy::Queue,
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// Connection configuration shared by the read pool and the primary.
///
/// Loaded once at startup and never mutated afterwards; writes use the same
/// credentials with `primary_host` substituted for `host`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub driver: Driver,
    /// Read endpoint (a replica-aware service address). For sqlite, a directory.
    pub host: String,
    /// Port for both endpoints; the driver default when unset
    pub port: Option<u16>,
    pub user: String,
    pub password: String,
    pub database: String,
    /// The single writable node
    pub primary_host: String,
    pub pool: PoolConfig,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            driver: Driver::Mysql,
            host: "mysql-db".to_string(),
            port: None,
            user: "your-database-user".to_string(),
            password: "your-database-password".to_string(),
            database: "your-database-name".to_string(),
            primary_host: "mysql-0.mysql-db".to_string(),
            pool: PoolConfig::default(),
        }
    }
}

impl DbConfig {
    /// Load config from TOML files, then apply `DBROUTE_*` environment overrides
    ///
    /// Priority order (highest to lowest):
    /// 1. Environment variables
    /// 2. ./dbroute.toml (project-specific)
    /// 3. ~/.dbroute/config.toml (user defaults)
    /// 4. Built-in defaults
    pub fn load() -> Result<Self> {
        let mut sources = Vec::new();

        if let Some(global) = global_config_path() {
            if global.exists() {
                sources.push(global);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            sources.push(local);
        }

        let mut config = Self::from_files(&sources)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load an explicit config file (no search), then apply environment overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_files(&[path.as_ref().to_path_buf()])?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Merge the given TOML files in order (later files override earlier ones)
    /// over the built-in defaults.
    pub fn from_files(paths: &[PathBuf]) -> Result<Self> {
        let mut merged = toml::Table::new();

        for path in paths {
            let contents =
                std::fs::read_to_string(path).map_err(|e| RouterError::io(path, e))?;
            let table: toml::Table =
                toml::from_str(&contents).map_err(|e| RouterError::toml(path, e))?;
            debug!("Loaded config from {}", path.display());
            merge_tables(&mut merged, table);
        }

        let path = paths.last().cloned().unwrap_or_default();
        toml::Value::Table(merged)
            .try_into::<DbConfig>()
            .map_err(|e| RouterError::toml(path, e))
    }

    pub fn from_toml_str(contents: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_env_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply `DBROUTE_*` overrides using `lookup` to read variables
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(driver) = lookup("DBROUTE_DRIVER") {
            self.driver = driver.parse()?;
        }
        if let Some(host) = lookup("DBROUTE_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("DBROUTE_PORT") {
            self.port = Some(parse_env("DBROUTE_PORT", &port)?);
        }
        if let Some(user) = lookup("DBROUTE_USER") {
            self.user = user;
        }
        if let Some(password) = lookup("DBROUTE_PASSWORD") {
            self.password = password;
        }
        if let Some(database) = lookup("DBROUTE_DATABASE") {
            self.database = database;
        }
        if let Some(primary_host) = lookup("DBROUTE_PRIMARY_HOST") {
            self.primary_host = primary_host;
        }
        if let Some(max) = lookup("DBROUTE_POOL_MAX_CONNECTIONS") {
            self.pool.max_connections = parse_env("DBROUTE_POOL_MAX_CONNECTIONS", &max)?;
        }
        if let Some(secs) = lookup("DBROUTE_POOL_ACQUIRE_TIMEOUT_SECS") {
            self.pool.acquire_timeout_secs = parse_env("DBROUTE_POOL_ACQUIRE_TIMEOUT_SECS", &secs)?;
        }
        if let Some(policy) = lookup("DBROUTE_POOL_EXHAUSTION") {
            self.pool.exhaustion = policy.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("host", &self.host),
            ("database", &self.database),
            ("primary_host", &self.primary_host),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(RouterError::config(format!("{field} must not be empty")));
            }
        }

        // sqlite has no authentication
        if self.driver != Driver::Sqlite && self.user.trim().is_empty() {
            return Err(RouterError::config("user must not be empty"));
        }

        if self.pool.max_connections == 0 {
            return Err(RouterError::config("pool.max_connections must be at least 1"));
        }
        if self.pool.min_connections > self.pool.max_connections {
            return Err(RouterError::config(format!(
                "pool.min_connections ({}) exceeds pool.max_connections ({})",
                self.pool.min_connections, self.pool.max_connections
            )));
        }

        Ok(())
    }

    /// Connect options for the read endpoint
    pub fn read_endpoint(&self) -> Result<Endpoint> {
        Endpoint::for_host(self, &self.host)
    }

    /// URL of the read endpoint
    pub fn read_url(&self) -> Result<String> {
        self.connection_url(&self.host)
    }

    /// Connection URL for `host` using this config's driver and credentials.
    ///
    /// Only for display and for handing to URL-based tools; the router
    /// connects through [`Endpoint::for_host`].
    pub fn connection_url(&self, host: &str) -> Result<String> {
        if self.driver == Driver::Sqlite {
            let path = Path::new(host).join(&self.database);
            return Ok(format!("sqlite://{}?mode=rwc", path.display()));
        }

        let mut url = Url::parse(&format!("{}://localhost", self.driver.scheme()))
            .map_err(|e| RouterError::config(format!("invalid url scheme: {e}")))?;
        url.set_host(Some(host))
            .map_err(|e| RouterError::config(format!("invalid host '{host}': {e}")))?;
        url.set_port(self.port)
            .map_err(|_| RouterError::config(format!("cannot set port on '{host}'")))?;
        if !self.user.is_empty() {
            url.set_username(&self.user)
                .map_err(|_| RouterError::config("cannot set user on connection url"))?;
        }
        if !self.password.is_empty() {
            url.set_password(Some(&self.password))
                .map_err(|_| RouterError::config("cannot set password on connection url"))?;
        }
        url.set_path(&format!("/{}", self.database));

        Ok(url.to_string())
    }

    /// A copy safe to print: the password is masked
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.password.is_empty() {
            copy.password = REDACTED.to_string();
        }
        copy
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| RouterError::config(format!("{key}={value}: {e}")))
}

/// Recursively overlay `overlay` onto `base` (nested tables merge, scalars replace)
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
