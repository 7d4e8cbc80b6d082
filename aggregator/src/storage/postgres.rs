//! Postgres row store
//!
//! Each `PgRowStore` wraps one `PgConnection`. sqlx prepares and caches every
//! statement per connection, so a worker prepares its statements once and
//! reuses them for the rest of its life.

use super::{RowStore, StoreConnector};
use crate::error::{AggregatorError, Result};
use async_trait::async_trait;
use loadfold_shared::types::aggregate::{AggregateKey, AggregateRow};
use sqlx::{Connection, PgConnection};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// SQL text for one aggregate table
#[derive(Debug, Clone)]
struct Statements {
    create: String,
    select: String,
    update: String,
    add: String,
    upsert: String,
    insert: String,
    seed: String,
    list: String,
}

impl Statements {
    fn for_table(table: &str) -> Self {
        Self {
            create: format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    weekday INTEGER NOT NULL,
                    time_slice INTEGER NOT NULL,
                    plug_id INTEGER NOT NULL,
                    total_load DOUBLE PRECISION NOT NULL DEFAULT 0,
                    event_count BIGINT NOT NULL DEFAULT 0,
                    PRIMARY KEY (weekday, time_slice, plug_id)
                )"
            ),
            select: format!(
                "SELECT total_load, event_count FROM {table} \
                 WHERE weekday = $1 AND time_slice = $2 AND plug_id = $3"
            ),
            update: format!(
                "UPDATE {table} SET total_load = $1, event_count = $2 \
                 WHERE weekday = $3 AND time_slice = $4 AND plug_id = $5"
            ),
            add: format!(
                "UPDATE {table} SET total_load = total_load + $1, event_count = event_count + 1 \
                 WHERE weekday = $2 AND time_slice = $3 AND plug_id = $4 \
                 RETURNING total_load, event_count"
            ),
            upsert: format!(
                "INSERT INTO {table} AS agg (weekday, time_slice, plug_id, total_load, event_count) \
                 VALUES ($1, $2, $3, $4, 1) \
                 ON CONFLICT (weekday, time_slice, plug_id) DO UPDATE SET \
                 total_load = agg.total_load + EXCLUDED.total_load, \
                 event_count = agg.event_count + 1 \
                 RETURNING total_load, event_count"
            ),
            insert: format!(
                "INSERT INTO {table} (weekday, time_slice, plug_id, total_load, event_count) \
                 VALUES ($1, $2, $3, $4, $5)"
            ),
            seed: format!(
                "INSERT INTO {table} (weekday, time_slice, plug_id, total_load, event_count) \
                 SELECT w, s, p, 0, 0 FROM UNNEST($1::INTEGER[], $2::INTEGER[], $3::INTEGER[]) AS k(w, s, p) \
                 ON CONFLICT (weekday, time_slice, plug_id) DO NOTHING"
            ),
            list: format!(
                "SELECT weekday, time_slice, plug_id, total_load, event_count FROM {table} \
                 WHERE ($1::INTEGER IS NULL OR plug_id = $1) \
                 AND ($2::INTEGER IS NULL OR weekday = $2) \
                 ORDER BY weekday, time_slice, plug_id"
            ),
        }
    }
}

fn query_failure(e: sqlx::Error) -> AggregatorError {
    AggregatorError::QueryFailure(e.to_string())
}

/// Optional filters for `PgConnector::list_rows`
#[derive(Debug, Clone, Copy, Default)]
pub struct RowFilter {
    pub plug_id: Option<i32>,
    pub weekday: Option<i32>,
}

/// Opens Postgres connections to one aggregate table.
#[derive(Debug, Clone)]
pub struct PgConnector {
    url: String,
    table: String,
    connect_timeout: Duration,
    sql: Arc<Statements>,
}

impl PgConnector {
    pub fn new(url: impl Into<String>, table: impl Into<String>) -> Self {
        let table = table.into();
        Self {
            url: url.into(),
            sql: Arc::new(Statements::for_table(&table)),
            table,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    async fn open(&self) -> Result<PgConnection> {
        match tokio::time::timeout(self.connect_timeout, PgConnection::connect(&self.url)).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(AggregatorError::ConnectionFailure(e.to_string())),
            Err(_) => Err(AggregatorError::ConnectionFailure(format!(
                "connect timed out after {:?}",
                self.connect_timeout
            ))),
        }
    }

    /// Create the aggregate table if it does not exist.
    pub async fn ensure_table(&self) -> Result<()> {
        let mut conn = self.open().await?;
        let result = sqlx::query(&self.sql.create)
            .execute(&mut conn)
            .await
            .map_err(query_failure);
        let _ = conn.close().await;
        result.map(|_| ())
    }

    /// Insert zero rows for `keys`, leaving existing buckets untouched.
    /// Returns the number of rows created.
    pub async fn seed(&self, keys: &[AggregateKey]) -> Result<u64> {
        let weekdays: Vec<i32> = keys.iter().map(|k| k.weekday).collect();
        let slices: Vec<i32> = keys.iter().map(|k| k.time_slice).collect();
        let plugs: Vec<i32> = keys.iter().map(|k| k.plug_id).collect();

        let mut conn = self.open().await?;
        let result = sqlx::query(&self.sql.seed)
            .bind(weekdays)
            .bind(slices)
            .bind(plugs)
            .execute(&mut conn)
            .await
            .map_err(query_failure);
        let _ = conn.close().await;
        Ok(result?.rows_affected())
    }

    /// Read buckets ordered by key.
    pub async fn list_rows(&self, filter: RowFilter) -> Result<Vec<(AggregateKey, AggregateRow)>> {
        let mut conn = self.open().await?;
        let result = sqlx::query_as::<_, (i32, i32, i32, f64, i64)>(&self.sql.list)
            .bind(filter.plug_id)
            .bind(filter.weekday)
            .fetch_all(&mut conn)
            .await
            .map_err(query_failure);
        let _ = conn.close().await;
        Ok(result?
            .into_iter()
            .map(|(weekday, time_slice, plug_id, total, count)| {
                (
                    AggregateKey::new(weekday, time_slice, plug_id),
                    AggregateRow::new(total, count),
                )
            })
            .collect())
    }
}

#[async_trait]
impl StoreConnector for PgConnector {
    async fn connect(&self) -> Result<Box<dyn RowStore>> {
        let conn = self.open().await?;
        Ok(Box::new(PgRowStore {
            conn: Some(conn),
            sql: self.sql.clone(),
        }))
    }

    fn describe(&self) -> String {
        format!("postgres table {}", self.table)
    }
}

/// One worker's Postgres connection
pub struct PgRowStore {
    conn: Option<PgConnection>,
    sql: Arc<Statements>,
}

impl PgRowStore {
    fn parts(&mut self) -> Result<(&mut PgConnection, &Statements)> {
        let conn = self.conn.as_mut().ok_or_else(|| {
            AggregatorError::ConnectionFailure("connection already closed".to_string())
        })?;
        Ok((conn, &*self.sql))
    }
}

#[async_trait]
impl RowStore for PgRowStore {
    async fn fetch(&mut self, key: &AggregateKey) -> Result<Option<AggregateRow>> {
        let (conn, sql) = self.parts()?;
        let row = sqlx::query_as::<_, (f64, i64)>(&sql.select)
            .bind(key.weekday)
            .bind(key.time_slice)
            .bind(key.plug_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(query_failure)?;
        Ok(row.map(|(total, count)| AggregateRow::new(total, count)))
    }

    async fn write(&mut self, key: &AggregateKey, row: &AggregateRow) -> Result<bool> {
        let (conn, sql) = self.parts()?;
        let done = sqlx::query(&sql.update)
            .bind(row.total_load)
            .bind(row.event_count)
            .bind(key.weekday)
            .bind(key.time_slice)
            .bind(key.plug_id)
            .execute(&mut *conn)
            .await
            .map_err(query_failure)?;
        Ok(done.rows_affected() > 0)
    }

    async fn add(&mut self, key: &AggregateKey, value: f64) -> Result<Option<AggregateRow>> {
        let (conn, sql) = self.parts()?;
        let row = sqlx::query_as::<_, (f64, i64)>(&sql.add)
            .bind(value)
            .bind(key.weekday)
            .bind(key.time_slice)
            .bind(key.plug_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(query_failure)?;
        Ok(row.map(|(total, count)| AggregateRow::new(total, count)))
    }

    async fn upsert(&mut self, key: &AggregateKey, value: f64) -> Result<AggregateRow> {
        let (conn, sql) = self.parts()?;
        let (total, count) = sqlx::query_as::<_, (f64, i64)>(&sql.upsert)
            .bind(key.weekday)
            .bind(key.time_slice)
            .bind(key.plug_id)
            .bind(value)
            .fetch_one(&mut *conn)
            .await
            .map_err(query_failure)?;
        Ok(AggregateRow::new(total, count))
    }

    async fn insert(&mut self, key: &AggregateKey, row: &AggregateRow) -> Result<()> {
        let (conn, sql) = self.parts()?;
        sqlx::query(&sql.insert)
            .bind(key.weekday)
            .bind(key.time_slice)
            .bind(key.plug_id)
            .bind(row.total_load)
            .bind(row.event_count)
            .execute(&mut *conn)
            .await
            .map_err(query_failure)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .await
                .map_err(|e| AggregatorError::ConnectionFailure(e.to_string()))?;
        }
        Ok(())
    }
}
