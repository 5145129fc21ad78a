use super::pool::{ConnectionPool, PooledConnection};
use super::{safety, Backend, BackendKind, ColumnInfo, ExecutionLimits, TableSchema};
use crate::errors::{JudgeError, JudgeResult};
use crate::model::{ResultTable, Value};
use crate::registry::ConnectionDescriptor;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode, InterruptHandle, OpenFlags};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Interrupt handle of a running statement. The worker empties the slot once
/// the statement is done, so a late interrupt never reaches the next user of
/// the connection.
type CancelSlot = Arc<Mutex<Option<InterruptHandle>>>;

pub struct SqliteBackend {
    descriptor: ConnectionDescriptor,
    pool: Arc<ConnectionPool<Connection>>,
    in_flight: Arc<Mutex<HashMap<u64, CancelSlot>>>,
    next_id: AtomicU64,
}

impl SqliteBackend {
    pub fn new(descriptor: ConnectionDescriptor) -> JudgeResult<Self> {
        if descriptor.target.trim().is_empty() {
            return Err(JudgeError::internal(format!(
                "malformed connection descriptor for {}: empty target",
                descriptor.dataset
            )));
        }
        let target = descriptor.target.clone();
        let pool = ConnectionPool::new(
            descriptor.dataset.clone(),
            descriptor.pool_size,
            descriptor.acquire_timeout,
            move || open_read_only(&target),
        );
        Ok(Self {
            descriptor,
            pool: Arc::new(pool),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        })
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// Checks out a connection and runs `work` on a blocking worker under
    /// `deadline`. Any open transaction is rolled back before the connection
    /// goes back to the pool.
    async fn run_blocking<T, F>(&self, deadline: Duration, work: F) -> JudgeResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> JudgeResult<T> + Send + 'static,
    {
        let conn = self.pool.acquire().await?;
        let slot: CancelSlot = Arc::new(Mutex::new(Some(conn.get_interrupt_handle())));
        let _guard = self.track(Arc::clone(&slot));

        let dataset = self.descriptor.dataset.clone();
        let task = tokio::task::spawn_blocking(move || {
            let result = work(&conn);
            slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            release(conn, &dataset);
            result
        });

        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(JudgeError::internal(format!(
                "execution worker failed: {join_err}"
            ))),
            Err(_) => {
                tracing::warn!(
                    event = "execution_timeout",
                    dataset = %self.descriptor.dataset,
                    limit_ms = deadline.as_millis() as u64,
                );
                Err(JudgeError::ExecutionTimeout { limit: deadline })
            }
        }
    }

    fn track(&self, slot: CancelSlot) -> InFlight {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&slot));
        InFlight {
            id,
            slot,
            registry: Arc::clone(&self.in_flight),
        }
    }
}

/// Interrupts the statement if it is still running when the caller stops
/// waiting for it: deadline passed, request dropped, or shutdown.
struct InFlight {
    id: u64,
    slot: CancelSlot,
    registry: Arc<Mutex<HashMap<u64, CancelSlot>>>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if interrupt(&self.slot) {
            tracing::debug!(event = "statement_interrupted", id = self.id);
        }
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

fn interrupt(slot: &CancelSlot) -> bool {
    match slot.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
        Some(handle) => {
            handle.interrupt();
            true
        }
        None => false,
    }
}

fn release(conn: PooledConnection<Connection>, dataset: &str) {
    if conn.is_autocommit() {
        return;
    }
    if let Err(e) = conn.execute_batch("ROLLBACK") {
        tracing::warn!(event = "rollback_failed", dataset = %dataset, error = %e);
        conn.discard();
    }
}

fn open_read_only(target: &str) -> JudgeResult<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
        | OpenFlags::SQLITE_OPEN_NO_MUTEX
        | OpenFlags::SQLITE_OPEN_URI;
    let conn = Connection::open_with_flags(target, flags).map_err(map_sqlite_err)?;
    conn.execute_batch("PRAGMA query_only = ON")
        .map_err(map_sqlite_err)?;
    Ok(conn)
}

fn map_sqlite_err(e: rusqlite::Error) -> JudgeError {
    match &e {
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::OperationInterrupted => {
            JudgeError::internal("statement was cancelled")
        }
        _ => JudgeError::execution(e.to_string()),
    }
}

fn run_query(conn: &Connection, sql: &str, max_rows: usize) -> JudgeResult<ResultTable> {
    let mut stmt = conn.prepare(sql).map_err(map_sqlite_err)?;
    if !stmt.readonly() {
        return Err(JudgeError::forbidden("statement would modify the database"));
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let decls: Vec<Option<String>> = stmt
        .columns()
        .iter()
        .map(|c| c.decl_type().map(|d| d.to_ascii_uppercase()))
        .collect();

    let mut rows = stmt.query([]).map_err(map_sqlite_err)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(map_sqlite_err)? {
        if out.len() == max_rows {
            return Err(JudgeError::ResultTooLarge { limit: max_rows });
        }
        let mut values = Vec::with_capacity(decls.len());
        for (idx, decl) in decls.iter().enumerate() {
            let raw = row.get_ref(idx).map_err(map_sqlite_err)?;
            values.push(to_value(raw, decl.as_deref()));
        }
        out.push(values);
    }
    ResultTable::new(columns, out)
}

fn to_value(raw: ValueRef<'_>, decl: Option<&str>) -> Value {
    match raw {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(r) => Value::Real(r),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            temporal(&text, decl).unwrap_or(Value::Text(text))
        }
    }
}

/// SQLite stores dates as text. Declared temporal columns and untyped
/// expression columns are parsed; explicitly typed text stays text.
fn temporal(text: &str, decl: Option<&str>) -> Option<Value> {
    match decl {
        Some(d) if d.contains("DATETIME") || d.contains("TIMESTAMP") => {
            parse_timestamp(text).map(Value::Timestamp)
        }
        Some(d) if d.contains("DATE") => parse_date(text).map(Value::Date),
        Some(_) => None,
        None => parse_timestamp_with_time(text)
            .map(Value::Timestamp)
            .or_else(|| parse_date(text).map(Value::Date)),
    }
}

fn parse_timestamp_with_time(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    parse_timestamp_with_time(text).or_else(|| {
        parse_date(text)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    })
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

#[async_trait]
impl Backend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn execute(&self, sql: &str, limits: &ExecutionLimits) -> JudgeResult<ResultTable> {
        self.execute_timed(sql, limits).await.map(|(table, _)| table)
    }

    async fn execute_timed(
        &self,
        sql: &str,
        limits: &ExecutionLimits,
    ) -> JudgeResult<(ResultTable, Duration)> {
        safety::check_statement(sql)?;
        let sql = sql.to_owned();
        let max_rows = limits.max_rows;
        self.run_blocking(limits.timeout, move |conn| {
            let started = Instant::now();
            run_query(conn, &sql, max_rows).map(|table| (table, started.elapsed()))
        })
        .await
    }

    async fn describe_columns(&self, sql: &str) -> JudgeResult<Vec<ColumnInfo>> {
        safety::check_statement(sql)?;
        let sql = sql.to_owned();
        self.run_blocking(self.descriptor.timeout, move |conn| {
            let stmt = conn.prepare(&sql).map_err(map_sqlite_err)?;
            let cols = stmt
                .columns()
                .iter()
                .map(|c| ColumnInfo {
                    name: c.name().to_string(),
                    decl_type: c.decl_type().map(String::from),
                })
                .collect();
            Ok(cols)
        })
        .await
    }

    async fn describe_schema(&self) -> JudgeResult<Vec<TableSchema>> {
        self.run_blocking(self.descriptor.timeout, |conn| {
            let mut tables = conn
                .prepare(
                    "SELECT name, type FROM sqlite_master \
                     WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
                     ORDER BY name",
                )
                .map_err(map_sqlite_err)?;
            let listed = tables
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
                .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
                .map_err(map_sqlite_err)?;

            let mut info = conn
                .prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")
                .map_err(map_sqlite_err)?;
            let mut schema = Vec::with_capacity(listed.len());
            for (name, kind) in listed {
                let columns = info
                    .query_map([&name], |row| {
                        let ty: String = row.get(1)?;
                        Ok(ColumnInfo {
                            name: row.get(0)?,
                            decl_type: (!ty.is_empty()).then_some(ty),
                        })
                    })
                    .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
                    .map_err(map_sqlite_err)?;
                schema.push(TableSchema {
                    name,
                    kind,
                    columns,
                });
            }
            Ok(schema)
        })
        .await
    }

    fn available_connections(&self) -> usize {
        self.pool.available()
    }

    fn shutdown(&self) {
        let slots: Vec<CancelSlot> = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for slot in &slots {
            interrupt(slot);
        }
        self.pool.close();
        tracing::info!(
            event = "backend_shutdown",
            dataset = %self.descriptor.dataset,
            interrupted = slots.len(),
        );
    }
}
