//! Connection-pool contract.
//!
//! The core issues all I/O through [`ConnPool`]; drivers (or wrappers such
//! as the prepared-statement cache) implement it. Result sets are
//! materialized into driver-agnostic [`Rows`] of [`Value`]s — streaming is
//! the driver's concern, not the core's.

use crate::error::{OrmError, OrmResult};
use crate::value::Value;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of an exec-path statement.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// The generated key of the inserted row, when the driver reports one.
    pub last_insert_id: Option<i64>,
}

/// A materialized result set.
#[derive(Debug, Clone, Default)]
pub struct Rows {
    pub columns: Arc<Vec<String>>,
    pub values: Vec<Vec<Value>>,
}

impl Rows {
    pub fn new(columns: Vec<String>, values: Vec<Vec<Value>>) -> Self {
        Rows {
            columns: Arc::new(columns),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Borrowing iterator over row views.
    pub fn iter(&self) -> impl Iterator<Item = Row<'_>> {
        self.values.iter().map(move |values| Row {
            columns: &self.columns,
            values,
        })
    }

    /// One `column → value` map per row.
    pub fn into_maps(self) -> Vec<HashMap<String, Value>> {
        let Rows { columns, values } = self;
        values
            .into_iter()
            .map(|row| columns.iter().cloned().zip(row).collect::<HashMap<_, _>>())
            .collect()
    }
}

/// A borrowed view over one result row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    pub columns: &'a [String],
    pub values: &'a [Value],
}

impl<'a> Row<'a> {
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    /// Typed access with a decode error naming the column.
    pub fn try_get<T: crate::value::FromValue>(&self, column: &str) -> OrmResult<T> {
        let value = self
            .get(column)
            .ok_or_else(|| OrmError::invalid_field(format!("no such column: {column}")))?;
        T::from_value(value)
            .map_err(|e| OrmError::invalid_value(format!("column '{column}': {e}")))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a String, &'a Value)> {
        self.columns.iter().zip(self.values.iter())
    }
}

/// A prepared-statement handle.
#[async_trait]
pub trait PreparedStatement: Send + Sync {
    async fn exec(&self, vars: &[Value]) -> OrmResult<ExecResult>;

    async fn query(&self, vars: &[Value]) -> OrmResult<Rows>;
}

/// The narrow interface every executor satisfies: a raw pool, a pooled
/// connection, a transaction, or a caching wrapper.
#[async_trait]
pub trait ConnPool: Send + Sync {
    /// Execute a statement and report affected rows.
    async fn exec(&self, sql: &str, vars: &[Value]) -> OrmResult<ExecResult>;

    /// Execute a query and materialize all rows.
    async fn query(&self, sql: &str, vars: &[Value]) -> OrmResult<Rows>;

    /// Execute a query expected to yield at most one row.
    async fn query_row(&self, sql: &str, vars: &[Value]) -> OrmResult<Option<OwnedRow>> {
        let mut rows = self.query(sql, vars).await?;
        if rows.values.is_empty() {
            return Ok(None);
        }
        let values = rows.values.remove(0);
        Ok(Some(OwnedRow {
            columns: rows.columns,
            values,
        }))
    }

    /// Prepare a statement for repeated execution.
    async fn prepare(&self, sql: &str) -> OrmResult<Arc<dyn PreparedStatement>> {
        let _ = sql;
        Err(OrmError::not_implemented("prepared statements"))
    }

    /// Start a transaction, when this pool supports one.
    async fn begin(&self) -> OrmResult<Arc<dyn TxHandle>> {
        Err(OrmError::not_implemented("transactions"))
    }

    /// Connectivity probe used at open time.
    async fn ping(&self) -> OrmResult<()> {
        Ok(())
    }
}

/// An owned row, for the single-row path.
#[derive(Debug, Clone)]
pub struct OwnedRow {
    pub columns: Arc<Vec<String>>,
    pub values: Vec<Value>,
}

impl OwnedRow {
    pub fn as_row(&self) -> Row<'_> {
        Row {
            columns: &self.columns,
            values: &self.values,
        }
    }
}

/// A live transaction: an executor plus commit/rollback.
#[async_trait]
pub trait TxHandle: ConnPool {
    async fn commit(&self) -> OrmResult<()>;

    async fn rollback(&self) -> OrmResult<()>;
}

/// The active executor carried on a statement: either the root pool or a
/// transaction installed by `begin` / the default transaction bracket.
#[derive(Clone)]
pub enum Executor {
    Pool(Arc<dyn ConnPool>),
    Tx(Arc<dyn TxHandle>),
}

impl Executor {
    pub fn is_transaction(&self) -> bool {
        matches!(self, Executor::Tx(_))
    }

    pub async fn exec(&self, sql: &str, vars: &[Value]) -> OrmResult<ExecResult> {
        match self {
            Executor::Pool(pool) => pool.exec(sql, vars).await,
            Executor::Tx(tx) => tx.exec(sql, vars).await,
        }
    }

    pub async fn query(&self, sql: &str, vars: &[Value]) -> OrmResult<Rows> {
        match self {
            Executor::Pool(pool) => pool.query(sql, vars).await,
            Executor::Tx(tx) => tx.query(sql, vars).await,
        }
    }

    pub async fn query_row(&self, sql: &str, vars: &[Value]) -> OrmResult<Option<OwnedRow>> {
        match self {
            Executor::Pool(pool) => pool.query_row(sql, vars).await,
            Executor::Tx(tx) => tx.query_row(sql, vars).await,
        }
    }

    pub async fn begin(&self) -> OrmResult<Arc<dyn TxHandle>> {
        match self {
            Executor::Pool(pool) => pool.begin().await,
            Executor::Tx(tx) => tx.begin().await,
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Executor::Pool(_) => f.write_str("Executor::Pool"),
            Executor::Tx(_) => f.write_str("Executor::Tx"),
        }
    }
}
