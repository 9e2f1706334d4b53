//! Routing behaviour against sqlite files.
//!
//! The read endpoint and the primary are separate database files, so a
//! write that lands in the wrong place is visible from the other side.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dbroute_core::{
    DbConfig, Driver, ExhaustionPolicy, FixedUrl, QueryRouter, RouterError,
};
use futures::future::join_all;
use serde_json::json;
use tempfile::{tempdir, TempDir};
use tokio::sync::oneshot;

struct Cluster {
    _dir: TempDir,
    root: PathBuf,
    config: DbConfig,
}

impl Cluster {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let replica = root.join("replica");
        let primary = root.join("primary");
        std::fs::create_dir_all(&replica).unwrap();
        std::fs::create_dir_all(&primary).unwrap();

        let config = DbConfig {
            driver: Driver::Sqlite,
            host: replica.display().to_string(),
            primary_host: primary.display().to_string(),
            user: String::new(),
            password: String::new(),
            database: "app.db".to_string(),
            ..DbConfig::default()
        };

        Self {
            _dir: dir,
            root,
            config,
        }
    }

    async fn router(&self) -> QueryRouter {
        QueryRouter::connect(self.config.clone()).await.unwrap()
    }

    /// A router whose read pool points at the primary's file
    async fn primary_reader(&self) -> QueryRouter {
        let config = DbConfig {
            host: self.config.primary_host.clone(),
            ..self.config.clone()
        };
        QueryRouter::connect(config).await.unwrap()
    }
}

#[tokio::test]
async fn test_select_one_reads_from_pool() {
    let cluster = Cluster::new();
    let router = cluster.router().await;

    let records = router.read("SELECT 1").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("1"), Some(&json!(1)));

    let stats = router.stats();
    assert_eq!(stats.reads, 1);
    assert_eq!(stats.failed_reads, 0);
    // reads never open a dedicated connection
    assert_eq!(stats.primary_opened, 0);
    assert!(router.pool_size() >= 1);
}

#[tokio::test]
async fn test_read_error_is_passed_through() {
    let cluster = Cluster::new();
    let router = cluster.router().await;

    let err = router.read("SELEC nonsense").await.unwrap_err();
    assert!(matches!(err, RouterError::Query(_)));
    assert!(err.database_error().is_some());

    let err = router.read("SELECT * FROM missing_table").await.unwrap_err();
    assert!(matches!(err, RouterError::Query(_)));

    assert_eq!(router.stats().failed_reads, 2);
}

#[tokio::test]
async fn test_writes_land_on_primary_only() {
    let cluster = Cluster::new();
    let router = cluster.router().await;

    router
        .write("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
        .await
        .unwrap();
    let summary = router
        .write("INSERT INTO users (name) VALUES ('alice')")
        .await
        .unwrap();
    assert_eq!(summary.rows_affected, 1);
    assert_eq!(summary.last_insert_id, Some(1));

    // the read endpoint never saw the table
    let tables = router
        .read("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'users'")
        .await
        .unwrap();
    assert!(tables.is_empty());

    let primary = cluster.primary_reader().await;
    let rows = primary.read("SELECT id, name FROM users").await.unwrap();
    assert_eq!(rows.len(), 1);
    let columns: Vec<&String> = rows[0].keys().collect();
    assert_eq!(columns, ["id", "name"]);
    assert_eq!(rows[0].get("id"), Some(&json!(1)));
    assert_eq!(rows[0].get("name"), Some(&json!("alice")));
}

#[tokio::test]
async fn test_multi_statement_write() {
    let cluster = Cluster::new();
    let router = cluster.router().await;

    let summary = router
        .write(
            "CREATE TABLE t (v INTEGER); \
             INSERT INTO t VALUES (1); \
             INSERT INTO t VALUES (2);",
        )
        .await
        .unwrap();
    assert_eq!(summary.rows_affected, 2);

    let primary = cluster.primary_reader().await;
    let rows = primary.read("SELECT COUNT(*) AS n FROM t").await.unwrap();
    assert_eq!(rows[0].get("n"), Some(&json!(2)));
}

#[tokio::test]
async fn test_primary_connection_closed_on_every_path() {
    let cluster = Cluster::new();
    let router = cluster.router().await;

    router.write("CREATE TABLE t (v INTEGER)").await.unwrap();
    let err = router
        .write("INSERT INTO no_such_table VALUES (1)")
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::Query(_)));

    let stats = router.stats();
    assert_eq!(stats.writes, 2);
    assert_eq!(stats.failed_writes, 1);
    assert_eq!(stats.primary_opened, 2);
    assert_eq!(stats.primary_closed, 2);
    assert_eq!(stats.open_primary_connections(), 0);
}

#[tokio::test]
async fn test_unreachable_primary_leaves_nothing_open() {
    let cluster = Cluster::new();
    let config = DbConfig {
        primary_host: cluster
            .root
            .join("missing")
            .join("deeper")
            .display()
            .to_string(),
        ..cluster.config.clone()
    };
    let router = QueryRouter::connect(config).await.unwrap();

    let err = router
        .write("INSERT INTO t VALUES (1)")
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::Connect(_)));

    let stats = router.stats();
    assert_eq!(stats.failed_writes, 1);
    assert_eq!(stats.primary_opened, 0);
    assert_eq!(stats.open_primary_connections(), 0);
}

#[tokio::test]
async fn test_concurrent_reads_are_paired_with_their_queries() {
    let mut cluster = Cluster::new();
    cluster.config.pool.max_connections = 4;
    let router = cluster.router().await;

    let queries: Vec<String> = (0..32).map(|i| format!("SELECT {i} AS n")).collect();
    let results = join_all(queries.iter().map(|q| router.read(q))).await;

    assert_eq!(results.len(), 32);
    for (i, result) in results.into_iter().enumerate() {
        let records = result.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("n"), Some(&json!(i)));
    }
    assert!(router.pool_size() <= 4);
    assert_eq!(router.stats().reads, 32);
}

#[tokio::test]
async fn test_read_callback_invoked_once() {
    let cluster = Cluster::new();
    let router = cluster.router().await;

    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = oneshot::channel();
    let seen = Arc::clone(&calls);
    router
        .perform_read_query("SELECT 2 AS two", move |result| {
            seen.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(result);
        })
        .await
        .unwrap();

    let records = rx.await.unwrap().unwrap();
    assert_eq!(records[0].get("two"), Some(&json!(2)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_write_callback_receives_error() {
    let cluster = Cluster::new();
    let router = cluster.router().await;

    let (tx, rx) = oneshot::channel();
    router
        .perform_write_query("INSERT INTO nowhere VALUES (1)", move |result| {
            let _ = tx.send(result);
        })
        .await
        .unwrap();

    let err = rx.await.unwrap().unwrap_err();
    assert!(matches!(err, RouterError::Query(_)));
    assert_eq!(router.stats().open_primary_connections(), 0);
}

#[tokio::test]
async fn test_fixed_url_resolver() {
    let cluster = Cluster::new();
    let elsewhere = cluster.root.join("elsewhere");
    std::fs::create_dir_all(&elsewhere).unwrap();
    let url = format!("sqlite://{}?mode=rwc", elsewhere.join("app.db").display());

    let router = QueryRouter::with_resolver(cluster.config.clone(), FixedUrl::new(url))
        .await
        .unwrap();
    router.write("CREATE TABLE moved (v INTEGER)").await.unwrap();

    assert!(elsewhere.join("app.db").exists());
    assert!(!cluster.root.join("primary").join("app.db").exists());
}

#[tokio::test]
async fn test_reject_policy_allows_reads_with_spare_capacity() {
    let mut cluster = Cluster::new();
    cluster.config.pool.max_connections = 1;
    cluster.config.pool.exhaustion = ExhaustionPolicy::Reject;
    let router = cluster.router().await;

    // back to back on one connection: each read returns it before the next
    for _ in 0..20 {
        let records = router.read("SELECT 1 AS one").await.unwrap();
        assert_eq!(records[0].get("one"), Some(&json!(1)));
    }
    assert_eq!(router.stats().failed_reads, 0);
    assert_eq!(router.reads_in_flight(), 0);
}

/// Keeps the single connection busy for a noticeable time
const SLOW_READ: &str = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 3000000) \
                         SELECT COUNT(*) AS n FROM c";

async fn wait_for_reads_in_flight(router: &QueryRouter, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while router.reads_in_flight() != expected {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("read never started");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reject_policy_fails_fast_while_connection_is_busy() {
    let mut cluster = Cluster::new();
    cluster.config.pool.max_connections = 1;
    cluster.config.pool.exhaustion = ExhaustionPolicy::Reject;
    let router = cluster.router().await;

    let busy = {
        let router = router.clone();
        tokio::spawn(async move { router.read(SLOW_READ).await })
    };
    wait_for_reads_in_flight(&router, 1).await;

    let err = router.read("SELECT 1").await.unwrap_err();
    assert!(matches!(err, RouterError::PoolExhausted { max_connections: 1 }));

    let records = busy.await.unwrap().unwrap();
    assert_eq!(records[0].get("n"), Some(&json!(3_000_000)));

    // the connection is free again
    let records = router.read("SELECT 1 AS one").await.unwrap();
    assert_eq!(records[0].get("one"), Some(&json!(1)));

    let stats = router.stats();
    assert_eq!(stats.reads, 3);
    assert_eq!(stats.failed_reads, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_queue_policy_waits_for_busy_connection() {
    let mut cluster = Cluster::new();
    cluster.config.pool.max_connections = 1;
    let router = cluster.router().await;

    let busy = {
        let router = router.clone();
        tokio::spawn(async move { router.read(SLOW_READ).await })
    };
    wait_for_reads_in_flight(&router, 1).await;

    let records = router.read("SELECT 1 AS one").await.unwrap();
    assert_eq!(records[0].get("one"), Some(&json!(1)));
    busy.await.unwrap().unwrap();
    assert_eq!(router.stats().failed_reads, 0);
}

#[tokio::test]
async fn test_temporal_and_decimal_columns_are_read() {
    let cluster = Cluster::new();
    let router = cluster.router().await;

    router
        .write(
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, placed_at DATETIME, paid_on DATE, \
                                  total DECIMAL(10, 2), note TEXT, receipt BLOB); \
             INSERT INTO orders (placed_at, paid_on, total, note, receipt) \
             VALUES ('2024-05-01 12:30:00', '2024-05-02', 19.99, NULL, x'00ff');",
        )
        .await
        .unwrap();

    let primary = cluster.primary_reader().await;
    let rows = primary
        .read("SELECT id, placed_at, paid_on, total, note, receipt, CURRENT_TIMESTAMP AS now FROM orders")
        .await
        .unwrap();

    let row = &rows[0];
    assert_eq!(row.get("id"), Some(&json!(1)));
    assert_eq!(row.get("placed_at"), Some(&json!("2024-05-01 12:30:00")));
    assert_eq!(row.get("paid_on"), Some(&json!("2024-05-02")));
    assert_eq!(row.get("total"), Some(&json!(19.99)));
    assert_eq!(row.get("note"), Some(&json!(null)));
    assert_eq!(row.get("receipt"), Some(&json!([0, 255])));
    assert!(row.get("now").and_then(|v| v.as_str()).is_some());
}

#[tokio::test]
async fn test_sqlite_paths_are_not_url_decoded() {
    let dir = tempdir().unwrap();
    let replica = dir.path().join("re?plica #1 %20");
    let primary = dir.path().join("pri%6Dary?mode=ro");
    std::fs::create_dir_all(&replica).unwrap();
    std::fs::create_dir_all(&primary).unwrap();

    let config = DbConfig {
        driver: Driver::Sqlite,
        host: replica.display().to_string(),
        primary_host: primary.display().to_string(),
        user: String::new(),
        password: String::new(),
        database: "app.db".to_string(),
        ..DbConfig::default()
    };
    let router = QueryRouter::connect(config).await.unwrap();

    router.write("CREATE TABLE t (v INTEGER)").await.unwrap();
    router.read("SELECT 1").await.unwrap();

    assert!(primary.join("app.db").exists());
    assert!(replica.join("app.db").exists());
}

#[tokio::test]
async fn test_reads_fail_after_close() {
    let cluster = Cluster::new();
    let router = cluster.router().await;
    router.read("SELECT 1").await.unwrap();

    router.close().await;
    assert!(router.is_closed());

    let err = router.read("SELECT 1").await.unwrap_err();
    assert!(matches!(err, RouterError::Acquire(_)));
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let mut cluster = Cluster::new();
    cluster.config.pool.max_connections = 0;

    let err = QueryRouter::connect(cluster.config.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::Config { .. }));
}
