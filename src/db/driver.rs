//! The driver boundary: connection acquisition and statement dispatch.
//!
//! The executor only ever sees the [`Driver`]/[`Connection`] traits, so
//! tests can substitute a fake driver that counts acquisitions and forces
//! failures. [`PgDriver`] is the production implementation: a
//! deadpool-backed pool, or a dedicated `tokio_postgres::Client` per
//! operation when pooling is disabled. Releasing a connection is its
//! `Drop` — a pooled object returns to the pool, a dedicated client closes
//! its session — so every exit path releases exactly once.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::time::Duration;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{NoTls, Row};

use crate::db::config::{ConnectionConfig, SslMode};
use crate::error::DriverError;
use crate::query::SqlValue;

/// One result row, shaped as a JSON object keyed by column name.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// A source of connections.
pub trait Driver {
    type Conn: Connection;

    fn acquire(
        &self,
    ) -> impl std::future::Future<Output = Result<Self::Conn, DriverError>> + Send;
}

/// One acquired connection. Dropping it releases it.
pub trait Connection {
    /// Run a row-returning statement.
    fn query(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> impl std::future::Future<Output = Result<Vec<Record>, DriverError>> + Send;

    /// Run a statement for its affected-row count.
    fn execute(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> impl std::future::Future<Output = Result<u64, DriverError>> + Send;
}

/// Production driver: pooled or dedicated PostgreSQL connections.
pub enum PgDriver {
    Pooled(Pool),
    Single(ConnectionConfig),
}

impl PgDriver {
    /// Build a driver from a connection config. A `pool_size` enables
    /// pooling; `None` opens a dedicated connection per operation.
    pub fn connect(config: ConnectionConfig) -> Result<Self> {
        match config.pool_size {
            Some(size) => {
                let pg_config: tokio_postgres::Config = config
                    .connection_string()
                    .parse()
                    .context("Invalid connection configuration")?;
                let mgr_config = ManagerConfig {
                    recycling_method: RecyclingMethod::Fast,
                };
                let mgr = match config.ssl_mode {
                    SslMode::Disable => Manager::from_config(pg_config, NoTls, mgr_config),
                    _ => Manager::from_config(pg_config, config.tls_connector()?, mgr_config),
                };
                let pool = Pool::builder(mgr)
                    .max_size(size)
                    .build()
                    .context("Failed to build connection pool")?;
                Ok(PgDriver::Pooled(pool))
            }
            None => Ok(PgDriver::Single(config)),
        }
    }
}

impl Driver for PgDriver {
    type Conn = PgConn;

    async fn acquire(&self) -> Result<PgConn, DriverError> {
        match self {
            PgDriver::Pooled(pool) => {
                let object = pool
                    .get()
                    .await
                    .map_err(|e| DriverError::message(format!("pool acquire failed: {e}")))?;
                Ok(PgConn::Pooled(object))
            }
            PgDriver::Single(config) => {
                let client = create_client(config).await?;
                Ok(PgConn::Single(client))
            }
        }
    }
}

/// An acquired PostgreSQL connection.
pub enum PgConn {
    Pooled(deadpool_postgres::Object),
    Single(tokio_postgres::Client),
}

impl PgConn {
    fn client(&self) -> &tokio_postgres::Client {
        match self {
            PgConn::Pooled(object) => object,
            PgConn::Single(client) => client,
        }
    }
}

impl Connection for PgConn {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Record>, DriverError> {
        let bound: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let rows = self.client().query(sql, &bound).await?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, DriverError> {
        let bound: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        Ok(self.client().execute(sql, &bound).await?)
    }
}

/// Open a dedicated client. The connection task lives until the client is
/// dropped.
async fn create_client(config: &ConnectionConfig) -> Result<tokio_postgres::Client, DriverError> {
    let conn_string = config.connection_string();
    let timeout = Duration::from_secs(15);

    let client = match config.ssl_mode {
        SslMode::Disable => {
            let (client, connection) =
                tokio::time::timeout(timeout, tokio_postgres::connect(&conn_string, NoTls))
                    .await
                    .map_err(|_| DriverError::message("Connection timed out after 15s"))??;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::warn!("connection error: {e}");
                }
            });
            client
        }
        SslMode::Prefer | SslMode::Require => {
            let tls = config
                .tls_connector()
                .map_err(|e| DriverError::message(e.to_string()))?;
            let (client, connection) =
                tokio::time::timeout(timeout, tokio_postgres::connect(&conn_string, tls))
                    .await
                    .map_err(|_| DriverError::message("Connection timed out after 15s"))??;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::warn!("connection error: {e}");
                }
            });
            client
        }
    };

    Ok(client)
}

/// Convert a driver row into a JSON record.
pub fn row_to_record(row: &Row) -> Record {
    let mut record = Record::new();
    for (i, col) in row.columns().iter().enumerate() {
        record.insert(col.name().to_string(), extract_value(row, i, col.type_()));
    }
    record
}

fn extract_value(row: &Row, idx: usize, pg_type: &Type) -> serde_json::Value {
    use serde_json::Value;

    match *pg_type {
        Type::BOOL => row
            .try_get::<_, Option<bool>>(idx)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        Type::INT2 => int_value(row.try_get::<_, Option<i16>>(idx).ok().flatten().map(i64::from)),
        Type::INT4 => int_value(row.try_get::<_, Option<i32>>(idx).ok().flatten().map(i64::from)),
        Type::INT8 => int_value(row.try_get::<_, Option<i64>>(idx).ok().flatten()),
        Type::FLOAT4 => float_value(
            row.try_get::<_, Option<f32>>(idx)
                .ok()
                .flatten()
                .map(f64::from),
        ),
        Type::FLOAT8 => float_value(row.try_get::<_, Option<f64>>(idx).ok().flatten()),
        // NUMERIC comes back as a JSON number, not a string.
        Type::NUMERIC => float_value(
            row.try_get::<_, Option<Decimal>>(idx)
                .ok()
                .flatten()
                .and_then(|d| d.to_f64()),
        ),
        Type::TEXT | Type::VARCHAR | Type::NAME | Type::CHAR | Type::BPCHAR => row
            .try_get::<_, Option<String>>(idx)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .ok()
            .flatten()
            .map(|b| {
                let hex: String = b.iter().map(|x| format!("{x:02x}")).collect();
                Value::String(format!("\\x{hex}"))
            })
            .unwrap_or(Value::Null),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)
            .ok()
            .flatten()
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        Type::TIME => row
            .try_get::<_, Option<NaiveTime>>(idx)
            .ok()
            .flatten()
            .map(|t| Value::String(t.to_string()))
            .unwrap_or(Value::Null),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)
            .ok()
            .flatten()
            .map(|ts| Value::String(ts.format("%Y-%m-%d %H:%M:%S").to_string()))
            .unwrap_or(Value::Null),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)
            .ok()
            .flatten()
            .map(|ts| Value::String(ts.to_rfc3339()))
            .unwrap_or(Value::Null),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .ok()
            .flatten()
            .unwrap_or(serde_json::Value::Null),
        _ => row
            .try_get::<_, Option<String>>(idx)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

fn int_value(v: Option<i64>) -> serde_json::Value {
    v.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null)
}

fn float_value(v: Option<f64>) -> serde_json::Value {
    v.and_then(|f| serde_json::Number::from_f64(f).map(serde_json::Value::Number))
        .unwrap_or(serde_json::Value::Null)
}
