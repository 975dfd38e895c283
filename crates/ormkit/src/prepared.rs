//! Prepared-statement cache.
//!
//! When prepared-statement mode is on, the executor is wrapped by a cache
//! keyed by SQL text: lookup, prepare-and-store on miss, execute through
//! the cached handle. The cache lives on the root handle, so every session
//! derived from the same root shares it. On a driver error the entry is
//! evicted and the statement re-prepared once; transactions get their own
//! transaction-bound view so cached handles never outlive the connection
//! they were prepared on.

use crate::error::OrmResult;
use crate::pool::{ConnPool, ExecResult, PreparedStatement, Rows, TxHandle};
use crate::value::Value;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Statement cache statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct StmtCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

impl StmtCacheStats {
    /// Cache hit ratio (0.0 – 1.0). Returns 0.0 if no lookups have occurred.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// SQL-text-keyed cache of prepared handles.
#[derive(Default)]
pub struct StmtCache {
    map: Mutex<HashMap<String, Arc<dyn PreparedStatement>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl StmtCache {
    pub fn new() -> Self {
        StmtCache::default()
    }

    fn get(&self, sql: &str) -> Option<Arc<dyn PreparedStatement>> {
        let map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        match map.get(sql) {
            Some(stmt) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(stmt))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn insert(&self, sql: String, stmt: Arc<dyn PreparedStatement>) -> Arc<dyn PreparedStatement> {
        let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(map.entry(sql).or_insert(stmt))
    }

    fn remove(&self, sql: &str) {
        let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        if map.remove(sql).is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> StmtCacheStats {
        let map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        StmtCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: map.len(),
        }
    }
}

/// A pool wrapper executing everything through cached prepared handles.
pub struct PreparedPool {
    inner: Arc<dyn ConnPool>,
    cache: Arc<StmtCache>,
}

impl PreparedPool {
    pub fn new(inner: Arc<dyn ConnPool>, cache: Arc<StmtCache>) -> Self {
        PreparedPool { inner, cache }
    }

    async fn handle(
        &self,
        sql: &str,
        pool: &dyn ConnPool,
    ) -> OrmResult<Arc<dyn PreparedStatement>> {
        if let Some(stmt) = self.cache.get(sql) {
            return Ok(stmt);
        }
        let stmt = pool.prepare(sql).await?;
        Ok(self.cache.insert(sql.to_string(), stmt))
    }
}

#[async_trait]
impl ConnPool for PreparedPool {
    async fn exec(&self, sql: &str, vars: &[Value]) -> OrmResult<ExecResult> {
        let stmt = self.handle(sql, self.inner.as_ref()).await?;
        match stmt.exec(vars).await {
            Ok(result) => Ok(result),
            Err(first) => {
                // The handle may be stale (schema change, dropped session);
                // evict, re-prepare once, retry.
                self.cache.remove(sql);
                let stmt = self.handle(sql, self.inner.as_ref()).await.map_err(|e| e.chain(first.clone()))?;
                stmt.exec(vars).await.map_err(|e| e.chain(first))
            }
        }
    }

    async fn query(&self, sql: &str, vars: &[Value]) -> OrmResult<Rows> {
        let stmt = self.handle(sql, self.inner.as_ref()).await?;
        match stmt.query(vars).await {
            Ok(rows) => Ok(rows),
            Err(first) => {
                self.cache.remove(sql);
                let stmt = self.handle(sql, self.inner.as_ref()).await.map_err(|e| e.chain(first.clone()))?;
                stmt.query(vars).await.map_err(|e| e.chain(first))
            }
        }
    }

    async fn prepare(&self, sql: &str) -> OrmResult<Arc<dyn PreparedStatement>> {
        self.handle(sql, self.inner.as_ref()).await
    }

    async fn begin(&self) -> OrmResult<Arc<dyn TxHandle>> {
        let tx = self.inner.begin().await?;
        Ok(Arc::new(PreparedTx {
            tx,
            cache: StmtCache::new(),
        }))
    }

    async fn ping(&self) -> OrmResult<()> {
        self.inner.ping().await
    }
}

/// The transaction-bound view of the cache: handles prepared inside the
/// transaction stay inside it and die with it.
pub struct PreparedTx {
    tx: Arc<dyn TxHandle>,
    cache: StmtCache,
}

impl PreparedTx {
    async fn handle(&self, sql: &str) -> OrmResult<Arc<dyn PreparedStatement>> {
        if let Some(stmt) = self.cache.get(sql) {
            return Ok(stmt);
        }
        let stmt = self.tx.prepare(sql).await?;
        Ok(self.cache.insert(sql.to_string(), stmt))
    }
}

#[async_trait]
impl ConnPool for PreparedTx {
    async fn exec(&self, sql: &str, vars: &[Value]) -> OrmResult<ExecResult> {
        let stmt = self.handle(sql).await?;
        stmt.exec(vars).await
    }

    async fn query(&self, sql: &str, vars: &[Value]) -> OrmResult<Rows> {
        let stmt = self.handle(sql).await?;
        stmt.query(vars).await
    }

    async fn prepare(&self, sql: &str) -> OrmResult<Arc<dyn PreparedStatement>> {
        self.handle(sql).await
    }
}

#[async_trait]
impl TxHandle for PreparedTx {
    async fn commit(&self) -> OrmResult<()> {
        self.tx.commit().await
    }

    async fn rollback(&self) -> OrmResult<()> {
        self.tx.rollback().await
    }
}
