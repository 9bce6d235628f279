//! Query execution and result shaping.
//!
//! [`Database::run`] compiles an intent, acquires a connection, dispatches
//! the statement, and shapes the raw rows per intent. A `list` intent runs
//! its data query and the paired count query sequentially on the same
//! connection, so both observe one snapshot. Compile failures surface
//! before any connection is touched; the connection itself is released by
//! `Drop` on every exit path.

use std::sync::Arc;

use serde::Serialize;

use crate::db::config::ConnectionConfig;
use crate::db::driver::{Connection, Driver, PgDriver, Record};
use crate::error::PgError;
use crate::query::{compile, compile_as, FragmentCache, Intent, QueryIntent};

/// Items plus total count, the result of a `list` intent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Listing {
    pub items: Vec<Record>,
    pub count: i64,
}

/// The shaped result of one executed intent.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Rows(Vec<Record>),
    Row(Option<Record>),
    Count(i64),
    Bool(bool),
    /// A single aggregate/identity value; `Null` when no row matched.
    Scalar(serde_json::Value),
    Listing(Listing),
}

impl QueryOutput {
    pub fn into_rows(self) -> Vec<Record> {
        match self {
            QueryOutput::Rows(rows) => rows,
            QueryOutput::Row(Some(row)) => vec![row],
            QueryOutput::Listing(listing) => listing.items,
            _ => Vec::new(),
        }
    }

    pub fn as_count(&self) -> i64 {
        match self {
            QueryOutput::Count(n) => *n,
            QueryOutput::Listing(listing) => listing.count,
            _ => 0,
        }
    }

    pub fn as_bool(&self) -> bool {
        matches!(self, QueryOutput::Bool(true))
    }
}

type ErrorHook = Arc<dyn Fn(&PgError, &str) + Send + Sync>;

/// A database handle: driver plus shared compiled-fragment cache.
pub struct Database<D: Driver> {
    driver: D,
    cache: Arc<FragmentCache>,
    on_error: Option<ErrorHook>,
}

/// The production database handle.
pub type PgDatabase = Database<PgDriver>;

impl PgDatabase {
    /// Connect per config: pooled when `pool_size` is set, dedicated
    /// connections otherwise.
    pub fn connect(config: ConnectionConfig) -> anyhow::Result<Self> {
        Ok(Database::new(PgDriver::connect(config)?))
    }
}

impl<D: Driver> Database<D> {
    pub fn new(driver: D) -> Self {
        Database {
            driver,
            cache: Arc::new(FragmentCache::new()),
            on_error: None,
        }
    }

    /// Observe errors for telemetry without altering propagation.
    pub fn with_error_hook(mut self, hook: impl Fn(&PgError, &str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }

    pub fn cache(&self) -> &FragmentCache {
        &self.cache
    }

    /// Drop all memoized fragments. Safe at any time; callers may wire
    /// this to a periodic tick to bound memory.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Execute one intent and shape its result.
    pub async fn run(&self, intent: QueryIntent) -> Result<QueryOutput, PgError> {
        let result = self.run_inner(&intent).await;
        if let Err(err) = &result {
            if let Some(hook) = &self.on_error {
                hook(err, &intent.table);
            }
        }
        result
    }

    async fn run_inner(&self, intent: &QueryIntent) -> Result<QueryOutput, PgError> {
        let compiled = compile(intent, &self.cache)?;
        log_statement(intent, &compiled.sql);

        let conn = self.driver.acquire().await?;

        match intent.intent {
            Intent::List => {
                let items = conn.query(&compiled.sql, &compiled.params).await?;
                let counter = compile_as(intent, Intent::Count, &self.cache)?;
                log_statement(intent, &counter.sql);
                let rows = conn.query(&counter.sql, &counter.params).await?;
                Ok(QueryOutput::Listing(Listing {
                    items,
                    count: first_i64(&rows, "count"),
                }))
            }
            Intent::Find | Intent::RawQuery => {
                let rows = conn.query(&compiled.sql, &compiled.params).await?;
                Ok(shape_rows(rows, intent.first))
            }
            Intent::Count => {
                let rows = conn.query(&compiled.sql, &compiled.params).await?;
                Ok(QueryOutput::Count(first_i64(&rows, "count")))
            }
            Intent::Check => {
                let rows = conn.query(&compiled.sql, &compiled.params).await?;
                Ok(QueryOutput::Bool(!rows.is_empty()))
            }
            Intent::Scalar => {
                let rows = conn.query(&compiled.sql, &compiled.params).await?;
                let grouped = intent.scalar.as_ref().map(|s| s.kind)
                    == Some(crate::query::ScalarKind::Group);
                if grouped {
                    Ok(QueryOutput::Rows(rows))
                } else {
                    Ok(QueryOutput::Scalar(first_value(&rows, "value")))
                }
            }
            Intent::Insert => {
                if !intent.returning.is_empty() {
                    let rows = conn.query(&compiled.sql, &compiled.params).await?;
                    Ok(shape_rows(rows, intent.first))
                } else if let Some(pk) = &intent.primary_key {
                    let rows = conn.query(&compiled.sql, &compiled.params).await?;
                    Ok(QueryOutput::Scalar(first_value(&rows, pk)))
                } else {
                    let affected = conn.execute(&compiled.sql, &compiled.params).await?;
                    Ok(QueryOutput::Count(affected as i64))
                }
            }
            Intent::Update => {
                if !intent.returning.is_empty() {
                    let rows = conn.query(&compiled.sql, &compiled.params).await?;
                    Ok(shape_rows(rows, intent.first))
                } else {
                    // Compiled as a counting CTE, so this is a plain query.
                    let rows = conn.query(&compiled.sql, &compiled.params).await?;
                    Ok(QueryOutput::Count(first_i64(&rows, "count")))
                }
            }
            Intent::Remove => {
                if !intent.returning.is_empty() {
                    let rows = conn.query(&compiled.sql, &compiled.params).await?;
                    Ok(shape_rows(rows, intent.first))
                } else {
                    let affected = conn.execute(&compiled.sql, &compiled.params).await?;
                    Ok(QueryOutput::Count(affected as i64))
                }
            }
            Intent::Drop | Intent::Truncate | Intent::Command => {
                let affected = conn.execute(&compiled.sql, &compiled.params).await?;
                Ok(QueryOutput::Count(affected as i64))
            }
        }
    }
}

fn log_statement(intent: &QueryIntent, sql: &str) {
    if intent.debug {
        tracing::debug!(target: "pglayer::sql", table = %intent.table, %sql);
    } else {
        tracing::trace!(target: "pglayer::sql", table = %intent.table, %sql);
    }
}

fn shape_rows(rows: Vec<Record>, first: bool) -> QueryOutput {
    if first {
        QueryOutput::Row(rows.into_iter().next())
    } else {
        QueryOutput::Rows(rows)
    }
}

fn first_value(rows: &[Record], key: &str) -> serde_json::Value {
    rows.first()
        .and_then(|row| row.get(key))
        .cloned()
        .unwrap_or(serde_json::Value::Null)
}

fn first_i64(rows: &[Record], key: &str) -> i64 {
    first_value(rows, key).as_i64().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CompileError, DriverError};
    use crate::query::{QueryBuilder, ScalarKind, SqlValue};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted driver: pops one canned response per statement and counts
    /// acquire/release so the one-release-per-operation invariant is
    /// checkable under every failure mode.
    #[derive(Default)]
    struct FakeDriver {
        acquired: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
        statements: Arc<Mutex<Vec<String>>>,
        responses: Arc<Mutex<VecDeque<Result<Vec<Record>, DriverError>>>>,
        fail_acquire: bool,
    }

    impl FakeDriver {
        fn respond(self, rows: Vec<Record>) -> Self {
            self.responses.lock().unwrap().push_back(Ok(rows));
            self
        }

        fn respond_err(self, message: &str) -> Self {
            self.responses
                .lock()
                .unwrap()
                .push_back(Err(DriverError::message(message)));
            self
        }
    }

    struct FakeConn {
        released: Arc<AtomicUsize>,
        statements: Arc<Mutex<Vec<String>>>,
        responses: Arc<Mutex<VecDeque<Result<Vec<Record>, DriverError>>>>,
    }

    impl Drop for FakeConn {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Driver for FakeDriver {
        type Conn = FakeConn;

        async fn acquire(&self) -> Result<FakeConn, DriverError> {
            if self.fail_acquire {
                return Err(DriverError::message("no connections available"));
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(FakeConn {
                released: self.released.clone(),
                statements: self.statements.clone(),
                responses: self.responses.clone(),
            })
        }
    }

    impl Connection for FakeConn {
        async fn query(&self, sql: &str, _params: &[SqlValue]) -> Result<Vec<Record>, DriverError> {
            self.statements.lock().unwrap().push(sql.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn execute(&self, sql: &str, _params: &[SqlValue]) -> Result<u64, DriverError> {
            self.statements.lock().unwrap().push(sql.to_string());
            match self.responses.lock().unwrap().pop_front() {
                Some(Ok(rows)) => Ok(rows.len() as u64),
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }
    }

    fn record(pairs: &[(&str, serde_json::Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_find_returns_rows() {
        let driver = FakeDriver::default().respond(vec![record(&[("id", 1.into())])]);
        let db = Database::new(driver);
        let out = db.run(QueryBuilder::table("users").find()).await.unwrap();
        assert_eq!(out.into_rows().len(), 1);
    }

    #[tokio::test]
    async fn test_find_first_returns_single_row() {
        let driver = FakeDriver::default().respond(vec![
            record(&[("id", 1.into())]),
            record(&[("id", 2.into())]),
        ]);
        let db = Database::new(driver);
        let out = db
            .run(QueryBuilder::table("users").first().find())
            .await
            .unwrap();
        match out {
            QueryOutput::Row(Some(row)) => assert_eq!(row["id"], 1),
            other => panic!("expected single row, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_runs_data_then_count_on_one_connection() {
        let driver = FakeDriver::default()
            .respond(vec![record(&[("id", 1.into())])])
            .respond(vec![record(&[("count", 42.into())])]);
        let acquired = driver.acquired.clone();
        let statements = driver.statements.clone();
        let db = Database::new(driver);

        let out = db
            .run(QueryBuilder::table("users").take(10).list())
            .await
            .unwrap();

        match out {
            QueryOutput::Listing(listing) => {
                assert_eq!(listing.items.len(), 1);
                assert_eq!(listing.count, 42);
            }
            other => panic!("expected listing, got {other:?}"),
        }

        assert_eq!(acquired.load(Ordering::SeqCst), 1);
        let statements = statements.lock().unwrap();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("SELECT * FROM users"));
        assert!(statements[1].starts_with("SELECT COUNT(1)::int AS count"));
    }

    #[tokio::test]
    async fn test_release_exactly_once_on_success() {
        let driver = FakeDriver::default();
        let acquired = driver.acquired.clone();
        let released = driver.released.clone();
        let db = Database::new(driver);

        db.run(QueryBuilder::table("users").find()).await.unwrap();

        assert_eq!(acquired.load(Ordering::SeqCst), 1);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_compile_failure_never_touches_the_driver() {
        let driver = FakeDriver::default();
        let acquired = driver.acquired.clone();
        let released = driver.released.clone();
        let db = Database::new(driver);

        let err = db
            .run(QueryBuilder::table("users").insert())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PgError::Compile(CompileError::EmptyPayload)
        ));
        assert_eq!(acquired.load(Ordering::SeqCst), 0);
        assert_eq!(released.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_release_exactly_once_on_execution_failure() {
        let driver = FakeDriver::default().respond_err("boom");
        let acquired = driver.acquired.clone();
        let released = driver.released.clone();
        let db = Database::new(driver);

        let err = db.run(QueryBuilder::table("users").find()).await.unwrap_err();
        assert!(matches!(err, PgError::Driver(_)));
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_exactly_once_when_count_phase_fails() {
        let driver = FakeDriver::default()
            .respond(vec![record(&[("id", 1.into())])])
            .respond_err("count failed");
        let acquired = driver.acquired.clone();
        let released = driver.released.clone();
        let db = Database::new(driver);

        let err = db.run(QueryBuilder::table("users").list()).await.unwrap_err();
        assert!(matches!(err, PgError::Driver(_)));
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_count_shaping() {
        let driver = FakeDriver::default().respond(vec![record(&[("count", 7.into())])]);
        let db = Database::new(driver);
        let out = db.run(QueryBuilder::table("users").count()).await.unwrap();
        assert_eq!(out.as_count(), 7);
    }

    #[tokio::test]
    async fn test_check_shapes_row_presence() {
        let driver = FakeDriver::default().respond(vec![record(&[("count", 1.into())])]);
        let db = Database::new(driver);
        let out = db
            .run(QueryBuilder::table("users").where_eq("id", 1i64).check())
            .await
            .unwrap();
        assert!(out.as_bool());

        let driver = FakeDriver::default().respond(vec![]);
        let db = Database::new(driver);
        let out = db
            .run(QueryBuilder::table("users").where_eq("id", 1i64).check())
            .await
            .unwrap();
        assert!(!out.as_bool());
    }

    #[tokio::test]
    async fn test_insert_returns_primary_key_value() {
        let driver = FakeDriver::default().respond(vec![record(&[("id", 41.into())])]);
        let db = Database::new(driver);
        let out = db
            .run(
                QueryBuilder::table("users")
                    .set("name", "Ann")
                    .primary_key("id")
                    .insert(),
            )
            .await
            .unwrap();
        assert_eq!(out, QueryOutput::Scalar(41.into()));
    }

    #[tokio::test]
    async fn test_insert_without_pk_returns_affected_count() {
        let driver = FakeDriver::default().respond(vec![record(&[])]);
        let db = Database::new(driver);
        let out = db
            .run(QueryBuilder::table("users").set("name", "Ann").insert())
            .await
            .unwrap();
        assert_eq!(out, QueryOutput::Count(1));
    }

    #[tokio::test]
    async fn test_update_reads_cte_count() {
        let driver = FakeDriver::default().respond(vec![record(&[("count", 3.into())])]);
        let db = Database::new(driver);
        let out = db
            .run(
                QueryBuilder::table("users")
                    .set("active", false)
                    .update(),
            )
            .await
            .unwrap();
        assert_eq!(out, QueryOutput::Count(3));
    }

    #[tokio::test]
    async fn test_scalar_single_value() {
        let driver = FakeDriver::default().respond(vec![record(&[("value", 12.5.into())])]);
        let db = Database::new(driver);
        let out = db
            .run(QueryBuilder::table("orders").scalar(ScalarKind::Sum, "amount"))
            .await
            .unwrap();
        assert_eq!(out, QueryOutput::Scalar(12.5.into()));
    }

    #[tokio::test]
    async fn test_scalar_group_returns_rows() {
        let driver = FakeDriver::default().respond(vec![
            record(&[("region", "eu".into()), ("value", 10.into())]),
            record(&[("region", "us".into()), ("value", 20.into())]),
        ]);
        let db = Database::new(driver);
        let out = db
            .run(QueryBuilder::table("orders").scalar_group("region", None))
            .await
            .unwrap();
        assert_eq!(out.into_rows().len(), 2);
    }

    #[tokio::test]
    async fn test_acquire_failure_propagates_as_driver_error() {
        let driver = FakeDriver {
            fail_acquire: true,
            ..Default::default()
        };
        let released = driver.released.clone();
        let db = Database::new(driver);
        let err = db.run(QueryBuilder::table("users").find()).await.unwrap_err();
        assert!(matches!(err, PgError::Driver(_)));
        assert_eq!(released.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_error_hook_observes_without_altering_result() {
        let observed = Arc::new(AtomicUsize::new(0));
        let observed_in_hook = observed.clone();
        let driver = FakeDriver::default().respond_err("boom");
        let db = Database::new(driver).with_error_hook(move |_err, table| {
            assert_eq!(table, "users");
            observed_in_hook.fetch_add(1, Ordering::SeqCst);
        });

        let result = db.run(QueryBuilder::table("users").find()).await;
        assert!(result.is_err());
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }
}
