//! The session surface: configuration, the fluent chain, finishers,
//! transactions, and plugins.
//!
//! A root [`Db`] comes out of [`open`] and is safe to clone across tasks.
//! Every chain method consumes `self` and returns the next builder, so a
//! chain in one place can never leak statement mutations into another;
//! branching a query is an explicit `clone()`, which snapshots the
//! statement.
//!
//! # Example
//!
//! ```ignore
//! let users: Vec<User> = db
//!     .model::<User>()
//!     .where_("age > ?", vars![18])
//!     .order("name ASC")
//!     .limit(20)
//!     .find()
//!     .await?;
//! ```

use crate::callbacks::{initialize_callbacks, run_operation, Callbacks, Dest, ExecCtx, Op};
use crate::clause::{
    primary_column, ClausePart, ColumnRef, Expr, GroupBy, Limit, Locking, OrderBy, OrderByColumn,
    Select, Set, Where, CURRENT_TABLE,
};
use crate::dialect::Dialect;
use crate::error::{OrmError, OrmResult};
use crate::model::{Entity, Record, RecordSink, RowsSink, ScanSink, ValueSink};
use crate::naming::NamingStrategy;
use crate::pool::{ConnPool, Executor, Rows, TxHandle};
use crate::prepared::{PreparedPool, StmtCache, StmtCacheStats};
use crate::statement::{JoinSpec, Statement};
use crate::value::{FromValue, Value};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// Clock injection point.
pub type NowFunc = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Root and session configuration.
#[derive(Clone)]
pub struct Config {
    /// Omit the automatic transaction bracket around Create/Update/Delete.
    pub skip_default_transaction: bool,
    pub full_save_associations: bool,
    pub naming_strategy: NamingStrategy,
    pub now_func: NowFunc,
    /// Build SQL without executing it.
    pub dry_run: bool,
    /// Route execution through the shared prepared-statement cache.
    pub prepare_stmt: bool,
    pub disable_automatic_ping: bool,
    pub disable_foreign_key_constraint_when_migrating: bool,
    pub ignore_relationships_when_migrating: bool,
    pub disable_nested_transaction: bool,
    /// Permit UPDATE/DELETE without a WHERE clause.
    pub allow_global_update: bool,
    /// Always select the destination type's field list instead of `*`.
    pub query_fields: bool,
    /// Chunk size for batch INSERT; 0 means a single statement.
    pub create_batch_size: usize,
    /// Translate driver errors through the dialect's taxonomy.
    pub translate_error: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            skip_default_transaction: false,
            full_save_associations: false,
            naming_strategy: NamingStrategy::default(),
            now_func: Arc::new(Utc::now),
            dry_run: false,
            prepare_stmt: false,
            disable_automatic_ping: false,
            disable_foreign_key_constraint_when_migrating: false,
            ignore_relationships_when_migrating: false,
            disable_nested_transaction: false,
            allow_global_update: false,
            query_fields: false,
            create_batch_size: 0,
            translate_error: false,
        }
    }
}

/// Per-session overrides; unset fields inherit from the parent.
#[derive(Default)]
pub struct Session {
    pub dry_run: bool,
    pub prepare_stmt: bool,
    /// Start from a fresh statement instead of snapshotting the parent's.
    pub new_db: bool,
    pub skip_hooks: bool,
    pub skip_default_transaction: bool,
    pub disable_nested_transaction: bool,
    pub allow_global_update: bool,
    pub full_save_associations: bool,
    pub query_fields: bool,
    pub now_func: Option<NowFunc>,
    pub create_batch_size: Option<usize>,
}

/// An extension registered on the root handle.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Attach callbacks or wrap the pool. Runs once at registration.
    fn initialize(&self, db: &Db) -> OrmResult<()>;
}

pub(crate) struct DbShared {
    dialect: Arc<dyn Dialect>,
    pool: Arc<dyn ConnPool>,
    callbacks: Arc<Callbacks>,
    plugins: Mutex<HashMap<String, Arc<dyn Plugin>>>,
    prepared_cache: Arc<StmtCache>,
    capture: Arc<Mutex<Option<(String, Vec<Value>)>>>,
}

/// A database handle: shared root state plus this chain's statement.
#[derive(Clone)]
pub struct Db {
    shared: Arc<DbShared>,
    config: Config,
    stmt: Statement,
    tx: Option<Arc<dyn TxHandle>>,
    savepoints: Vec<String>,
    scopes: Vec<fn(Db) -> Db>,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("in_transaction", &self.tx.is_some())
            .field("savepoints", &self.savepoints)
            .finish()
    }
}

/// Open a database handle over a dialect and a connection pool.
pub async fn open(
    dialect: Arc<dyn Dialect>,
    pool: Arc<dyn ConnPool>,
    config: Config,
) -> OrmResult<Db> {
    let prepared_cache = Arc::new(StmtCache::new());
    let pool: Arc<dyn ConnPool> = if config.prepare_stmt {
        Arc::new(PreparedPool::new(pool, Arc::clone(&prepared_cache)))
    } else {
        pool
    };
    let executor = Executor::Pool(Arc::clone(&pool));

    let shared = Arc::new(DbShared {
        dialect: Arc::clone(&dialect),
        pool: Arc::clone(&pool),
        callbacks: Arc::new(initialize_callbacks()),
        plugins: Mutex::new(HashMap::new()),
        prepared_cache,
        capture: Arc::new(Mutex::new(None)),
    });

    let db = Db {
        shared,
        config: config.clone(),
        stmt: Statement::new(executor, Arc::clone(&dialect)),
        tx: None,
        savepoints: Vec::new(),
        scopes: Vec::new(),
    };

    dialect.initialize(&db).await?;
    if !config.disable_automatic_ping {
        db.shared.pool.ping().await?;
    }
    Ok(db)
}

impl Db {
    // ── Sessions and shared state ───────────────────────────────────────────

    /// Derive a session: configuration overrides from `session`, fresh or
    /// snapshotted statement state, shared caches from the root.
    pub fn session(&self, session: Session) -> Db {
        let mut db = self.clone();
        if session.dry_run {
            db.config.dry_run = true;
        }
        if session.skip_default_transaction {
            db.config.skip_default_transaction = true;
        }
        if session.disable_nested_transaction {
            db.config.disable_nested_transaction = true;
        }
        if session.allow_global_update {
            db.config.allow_global_update = true;
        }
        if session.full_save_associations {
            db.config.full_save_associations = true;
        }
        if session.query_fields {
            db.config.query_fields = true;
        }
        if let Some(now_func) = session.now_func {
            db.config.now_func = now_func;
        }
        if let Some(size) = session.create_batch_size {
            db.config.create_batch_size = size;
        }
        if session.new_db {
            db.stmt = db.stmt.fresh();
        }
        if session.skip_hooks {
            db.stmt.skip_hooks = true;
        }
        if session.prepare_stmt && !db.config.prepare_stmt {
            db.config.prepare_stmt = true;
            let pool: Arc<dyn ConnPool> = Arc::new(PreparedPool::new(
                Arc::clone(&db.shared.pool),
                Arc::clone(&db.shared.prepared_cache),
            ));
            db.stmt.executor = Executor::Pool(pool);
        }
        db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dialect(&self) -> Arc<dyn Dialect> {
        Arc::clone(&self.shared.dialect)
    }

    /// The callback manager, for extensions.
    pub fn callback(&self) -> &Callbacks {
        &self.shared.callbacks
    }

    /// Prepared-statement cache counters for the root handle.
    pub fn prepared_stmt_stats(&self) -> StmtCacheStats {
        self.shared.prepared_cache.stats()
    }

    /// The most recent statement captured without execution: dry runs and
    /// failed builds. For logging.
    pub fn last_sql(&self) -> Option<(String, Vec<Value>)> {
        self.shared
            .capture
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Register a plugin; duplicate names are rejected.
    pub fn use_plugin(&self, plugin: Arc<dyn Plugin>) -> OrmResult<()> {
        let name = plugin.name().to_string();
        {
            let plugins = self
                .shared
                .plugins
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if plugins.contains_key(&name) {
                return Err(OrmError::Registered(name));
            }
        }
        plugin.initialize(self)?;
        self.shared
            .plugins
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, plugin);
        Ok(())
    }

    // ── Fluent chain ────────────────────────────────────────────────────────

    /// Target a record type; resolves and caches its schema.
    pub fn model<T: Record>(mut self) -> Db {
        self.stmt
            .parse(T::descriptor(), &self.config.naming_strategy);
        self
    }

    /// Target an explicit table.
    pub fn table(mut self, table: &str) -> Db {
        self.stmt.table = Some(table.to_string());
        self
    }

    /// AND a templated condition (`"age > ?"`).
    pub fn where_(mut self, sql: &str, vars: Vec<Value>) -> Db {
        self.stmt
            .add_clause(Where::new(vec![Expr::template(sql, vars)]));
        self
    }

    /// AND an expression tree.
    pub fn where_expr(mut self, expr: Expr) -> Db {
        self.stmt.add_clause(Where::new(vec![expr]));
        self
    }

    /// AND equality conditions from the record's non-zero fields.
    pub fn where_record<T: Record>(mut self, record: &T) -> Db {
        let schema = crate::schema::parse(T::descriptor(), &self.config.naming_strategy);
        let conds: Vec<Expr> = schema
            .fields
            .iter()
            .filter_map(|field| {
                record
                    .get(&field.db_name)
                    .filter(|value| !value.is_zero())
                    .map(|value| {
                        Expr::eq(
                            ColumnRef::qualified(CURRENT_TABLE, field.db_name.clone()),
                            value,
                        )
                    })
            })
            .collect();
        if !conds.is_empty() {
            self.stmt.add_clause(Where::new(conds));
        }
        self
    }

    /// OR a templated condition against everything accumulated so far.
    pub fn or_(mut self, sql: &str, vars: Vec<Value>) -> Db {
        let prior = self
            .stmt
            .clauses
            .get("WHERE")
            .and_then(|c| c.expression.as_ref())
            .and_then(|e| e.as_any().downcast_ref::<Where>())
            .map(|w| w.exprs.clone())
            .unwrap_or_default();
        let new = Expr::template(sql, vars);
        if prior.is_empty() {
            self.stmt.add_clause(Where::new(vec![new]));
        } else {
            let mut prior = prior;
            let lhs = if prior.len() == 1 {
                prior.remove(0)
            } else {
                Expr::and(prior)
            };
            self.stmt.clauses.shift_remove("WHERE");
            self.stmt
                .add_clause(Where::new(vec![Expr::or(vec![lhs, new])]));
        }
        self
    }

    /// AND a negated templated condition.
    pub fn not_(mut self, sql: &str, vars: Vec<Value>) -> Db {
        self.stmt
            .add_clause(Where::new(vec![Expr::not(Expr::template(sql, vars))]));
        self
    }

    /// Restrict the select list.
    pub fn select(mut self, columns: &[&str]) -> Db {
        self.stmt
            .selects
            .extend(columns.iter().map(|c| c.to_string()));
        self
    }

    /// Exclude columns from the select list.
    pub fn omit(mut self, columns: &[&str]) -> Db {
        self.stmt
            .omits
            .extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn distinct(mut self) -> Db {
        self.stmt.distinct = true;
        self
    }

    /// LEFT JOIN a relationship path (`"Company.Manager"`) or raw join SQL.
    pub fn joins(mut self, name: &str) -> Db {
        self.stmt.joins.push(JoinSpec {
            name: name.to_string(),
            join_type: crate::clause::JoinType::Left,
            vars: Vec::new(),
        });
        self
    }

    /// INNER JOIN a relationship path or raw join SQL.
    pub fn inner_joins(mut self, name: &str) -> Db {
        self.stmt.joins.push(JoinSpec {
            name: name.to_string(),
            join_type: crate::clause::JoinType::Inner,
            vars: Vec::new(),
        });
        self
    }

    /// Join with explicit type and bind parameters (raw joins).
    pub fn joins_with(mut self, join_type: crate::clause::JoinType, sql: &str, vars: Vec<Value>) -> Db {
        self.stmt.joins.push(JoinSpec {
            name: sql.to_string(),
            join_type,
            vars,
        });
        self
    }

    /// Queue a relationship preload.
    pub fn preload(mut self, name: &str) -> Db {
        self.stmt.preloads.insert(name.to_string(), Vec::new());
        self
    }

    /// Queue a relationship preload with extra conditions (`sql` is a
    /// `?`-template over `vars`).
    pub fn preload_with(mut self, name: &str, sql: &str, mut vars: Vec<Value>) -> Db {
        let mut conds = vec![Value::Text(sql.to_string())];
        conds.append(&mut vars);
        self.stmt.preloads.insert(name.to_string(), conds);
        self
    }

    /// Raw ordering SQL; replaces accumulated ordering columns.
    pub fn order(mut self, raw: &str) -> Db {
        self.stmt.add_clause(OrderBy {
            columns: Vec::new(),
            expression: Some(Box::new(Expr::raw(raw))),
        });
        self
    }

    /// Append one ordering column.
    pub fn order_by(mut self, column: &str, desc: bool) -> Db {
        self.stmt.add_clause(OrderBy {
            columns: vec![OrderByColumn {
                column: ColumnRef::new(column),
                desc,
            }],
            expression: None,
        });
        self
    }

    pub fn group(mut self, column: &str) -> Db {
        self.stmt.add_clause(GroupBy {
            columns: vec![ColumnRef::new(column)],
            having: Vec::new(),
        });
        self
    }

    pub fn having(mut self, sql: &str, vars: Vec<Value>) -> Db {
        self.stmt.add_clause(GroupBy {
            columns: Vec::new(),
            having: vec![Expr::template(sql, vars)],
        });
        self
    }

    pub fn limit(mut self, limit: i64) -> Db {
        self.stmt.add_clause(Limit {
            limit: Some(limit),
            offset: None,
        });
        self
    }

    pub fn offset(mut self, offset: i64) -> Db {
        self.stmt.add_clause(Limit {
            limit: None,
            offset: Some(offset),
        });
        self
    }

    /// `SELECT … FOR UPDATE`.
    pub fn lock_for_update(mut self) -> Db {
        self.stmt.add_clause(Locking::update());
        self
    }

    /// Skip default scoping (soft-delete filters).
    pub fn unscoped(mut self) -> Db {
        self.stmt.unscoped = true;
        self
    }

    /// Install any clause directly.
    pub fn clauses<C: ClausePart>(mut self, clause: C) -> Db {
        self.stmt.add_clause(clause);
        self
    }

    /// Stash a session-scoped value.
    pub fn set(mut self, key: &str, value: Value) -> Db {
        self.stmt.settings.insert(key.to_string(), value);
        self
    }

    /// Read back a session-scoped value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.stmt.settings.get(key).cloned()
    }

    /// Queue scope functions applied when the operation runs.
    pub fn scopes(mut self, scopes: &[fn(Db) -> Db]) -> Db {
        self.scopes.extend_from_slice(scopes);
        self
    }

    /// Switch to raw-SQL mode.
    pub fn raw(mut self, sql: &str, vars: Vec<Value>) -> Db {
        self.stmt.raw_sql = Some((sql.to_string(), vars));
        self
    }

    // ── Finishers ───────────────────────────────────────────────────────────

    async fn run(mut self, op: Op, dest: Dest) -> ExecCtx {
        for scope in std::mem::take(&mut self.scopes) {
            self = scope(self);
        }
        run_operation(
            Arc::clone(&self.shared.callbacks),
            self.config.clone(),
            Arc::clone(&self.shared.capture),
            Executor::Pool(Arc::clone(&self.shared.pool)),
            op,
            self.stmt,
            dest,
        )
        .await
    }

    fn ensure_model<T: Record>(&mut self) {
        if self.stmt.schema.is_none() {
            self.stmt
                .parse(T::descriptor(), &self.config.naming_strategy);
        }
    }

    /// Fetch every matching record.
    pub async fn find<T: Record>(mut self) -> OrmResult<Vec<T>> {
        self.ensure_model::<T>();
        let ctx = self
            .run(Op::Query, Dest::Sink(Box::new(RecordSink::<T>::default())))
            .await;
        finish_sink(ctx)
    }

    /// Fetch the first record ordered by primary key.
    pub async fn first<T: Record>(self) -> OrmResult<T> {
        let db = self.clauses(OrderBy {
            columns: vec![OrderByColumn {
                column: primary_column(),
                desc: false,
            }],
            expression: None,
        });
        db.take_one().await
    }

    /// Fetch the last record ordered by primary key.
    pub async fn last<T: Record>(self) -> OrmResult<T> {
        let db = self.clauses(OrderBy {
            columns: vec![OrderByColumn {
                column: primary_column(),
                desc: true,
            }],
            expression: None,
        });
        db.take_one().await
    }

    /// Fetch one record with no implied ordering.
    pub async fn take_one<T: Record>(mut self) -> OrmResult<T> {
        self.ensure_model::<T>();
        let db = self.limit(1);
        let ctx = db
            .run(Op::Query, Dest::Sink(Box::new(RecordSink::<T>::default())))
            .await;
        let mut items: Vec<T> = finish_sink(ctx)?;
        match items.is_empty() {
            true => Err(OrmError::RecordNotFound),
            false => Ok(items.remove(0)),
        }
    }

    /// Re-fetch a record by its populated primary key.
    pub async fn reload<T: Record>(mut self, record: T) -> OrmResult<T> {
        self.ensure_model::<T>();
        let ctx = self
            .run(Op::Query, Dest::Entities(vec![Box::new(record)]))
            .await;
        let mut ctx = ctx;
        if ctx.rows_affected == 0 && ctx.error.is_none() {
            return Err(OrmError::RecordNotFound);
        }
        finish_entity(&mut ctx)
    }

    /// `SELECT count(*)`.
    pub async fn count(mut self) -> OrmResult<i64> {
        self.stmt.add_clause(Select {
            distinct: false,
            columns: Vec::new(),
            expression: Some(Box::new(Expr::raw("count(*)"))),
        });
        let ctx = self
            .run(Op::Query, Dest::Sink(Box::new(ValueSink::<i64>::default())))
            .await;
        let items: Vec<i64> = finish_value_sink(ctx)?;
        Ok(items.into_iter().next().unwrap_or(0))
    }

    /// Fetch a single column into primitives.
    pub async fn pluck<T: FromValue + Send + 'static>(mut self, column: &str) -> OrmResult<Vec<T>> {
        self.stmt.selects.push(column.to_string());
        let ctx = self
            .run(Op::Query, Dest::Sink(Box::new(ValueSink::<T>::default())))
            .await;
        finish_value_sink(ctx)
    }

    /// Insert one record; hooks run, associations cascade, generated keys
    /// backfill. Returns the record.
    pub async fn create<T: Record>(self, record: T) -> OrmResult<T> {
        let mut results = self.create_many(vec![record]).await?;
        Ok(results.remove(0))
    }

    /// Insert a batch, chunked by `create_batch_size`.
    pub async fn create_many<T: Record>(mut self, records: Vec<T>) -> OrmResult<Vec<T>> {
        self.ensure_model::<T>();
        let entities: Vec<Box<dyn Entity>> = records
            .into_iter()
            .map(|r| Box::new(r) as Box<dyn Entity>)
            .collect();
        let mut ctx = self.run(Op::Create, Dest::Entities(entities)).await;
        finish_entities(&mut ctx)
    }

    /// Insert when the primary key is zero, update otherwise.
    pub async fn save<T: Record>(mut self, record: T) -> OrmResult<T> {
        self.ensure_model::<T>();
        let has_pk = self
            .stmt
            .schema
            .as_ref()
            .and_then(|s| s.prioritized_primary_field())
            .and_then(|pk| record.get(&pk.db_name))
            .is_some_and(|v| !v.is_zero());
        if has_pk {
            self.update(record).await
        } else {
            self.create(record).await
        }
    }

    /// Update the record's row from its current field values.
    pub async fn update<T: Record>(mut self, record: T) -> OrmResult<T> {
        self.ensure_model::<T>();
        let mut ctx = self
            .run(Op::Update, Dest::Entities(vec![Box::new(record)]))
            .await;
        finish_entity(&mut ctx)
    }

    /// Update explicit column assignments; requires a model or table plus
    /// conditions (or `allow_global_update`). Returns rows affected.
    /// Nothing to assign means a no-op: no SQL is issued.
    pub async fn updates(mut self, assignments: Vec<(&str, Value)>) -> OrmResult<u64> {
        if !assignments.is_empty() {
            self.stmt.add_clause(
                assignments
                    .into_iter()
                    .map(|(column, value)| (column.to_string(), value))
                    .collect::<Set>(),
            );
        }
        let ctx = self.run(Op::Update, Dest::None).await;
        finish_exec(ctx)
    }

    /// Delete the record's row by primary key. Returns rows affected.
    pub async fn delete<T: Record>(mut self, record: T) -> OrmResult<u64> {
        self.ensure_model::<T>();
        let ctx = self
            .run(Op::Delete, Dest::Entities(vec![Box::new(record)]))
            .await;
        finish_exec(ctx)
    }

    /// Delete every row matching the accumulated conditions.
    pub async fn delete_all<T: Record>(mut self) -> OrmResult<u64> {
        self.ensure_model::<T>();
        let ctx = self.run(Op::Delete, Dest::None).await;
        finish_exec(ctx)
    }

    /// Execute raw SQL on the exec path. Returns rows affected.
    pub async fn exec(self) -> OrmResult<u64> {
        let ctx = self.run(Op::Raw, Dest::None).await;
        finish_exec(ctx)
    }

    /// Execute raw SQL on the query path and keep the raw rows.
    pub async fn fetch_rows(self) -> OrmResult<Rows> {
        let ctx = self
            .run(Op::Row, Dest::Sink(Box::new(RowsSink::default())))
            .await;
        let mut ctx = ctx;
        if let Some(err) = ctx.error.take() {
            return Err(err);
        }
        let sink = match ctx.dest.sink_mut() {
            Some(sink) => sink,
            None => return Ok(Rows::default()),
        };
        let rows_sink = sink
            .as_any_mut()
            .downcast_mut::<RowsSink>()
            .expect("row finisher installed a RowsSink");
        Ok(Rows::new(
            std::mem::take(&mut rows_sink.columns),
            std::mem::take(&mut rows_sink.rows),
        ))
    }

    /// Execute raw SQL on the query path, hydrating records.
    pub async fn scan<T: Record>(self) -> OrmResult<Vec<T>> {
        let ctx = self
            .run(Op::Row, Dest::Sink(Box::new(RecordSink::<T>::default())))
            .await;
        finish_sink(ctx)
    }

    // ── Transactions ────────────────────────────────────────────────────────

    /// Start a transaction. Nested calls mark savepoints, or are no-ops
    /// when nested transactions are disabled.
    pub async fn begin(mut self) -> OrmResult<Db> {
        if self.stmt.executor.is_transaction() {
            if self.config.disable_nested_transaction {
                return Ok(self);
            }
            let name = format!("ormkit_sp{}", self.savepoints.len() + 1);
            self.shared
                .dialect
                .save_point(&self.stmt.executor, &name)
                .await?;
            self.savepoints.push(name);
            return Ok(self);
        }

        let tx = self.stmt.executor.begin().await?;
        self.stmt.executor = Executor::Tx(Arc::clone(&tx));
        self.tx = Some(tx);
        Ok(self)
    }

    /// Commit the innermost transaction level.
    pub async fn commit(mut self) -> OrmResult<Db> {
        if self.savepoints.pop().is_some() {
            // Savepoints fold into the surrounding transaction on commit.
            return Ok(self);
        }
        let Some(tx) = self.tx.take() else {
            return Err(OrmError::InvalidTransaction);
        };
        tx.commit().await?;
        self.restore_root_executor();
        Ok(self)
    }

    /// Roll back the innermost transaction level.
    pub async fn rollback(mut self) -> OrmResult<Db> {
        if let Some(name) = self.savepoints.pop() {
            self.shared
                .dialect
                .rollback_to(&self.stmt.executor, &name)
                .await?;
            return Ok(self);
        }
        let Some(tx) = self.tx.take() else {
            return Err(OrmError::InvalidTransaction);
        };
        tx.rollback().await?;
        self.restore_root_executor();
        Ok(self)
    }

    fn restore_root_executor(&mut self) {
        self.stmt.executor = Executor::Pool(Arc::clone(&self.shared.pool));
    }

    /// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
    pub async fn transaction<T, F, Fut>(&self, f: F) -> OrmResult<T>
    where
        F: FnOnce(Db) -> Fut,
        Fut: Future<Output = OrmResult<T>>,
    {
        let tx = self.clone().begin().await?;
        let handle = tx.clone();
        match f(tx).await {
            Ok(value) => {
                handle.commit().await?;
                Ok(value)
            }
            Err(err) => match handle.rollback().await {
                Ok(_) => Err(err),
                Err(rollback_err) => Err(rollback_err.chain(err)),
            },
        }
    }

    // ── Dry run ─────────────────────────────────────────────────────────────

    /// Build the SQL a chain would execute, without executing it, rendered
    /// with literals through the dialect.
    pub async fn to_sql<T, F, Fut>(&self, f: F) -> OrmResult<String>
    where
        F: FnOnce(Db) -> Fut,
        Fut: Future<Output = OrmResult<T>>,
    {
        let session = self.session(Session {
            dry_run: true,
            skip_default_transaction: true,
            ..Default::default()
        });
        let _ = f(session).await;
        let captured = self
            .shared
            .capture
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match captured {
            Some((sql, vars)) => Ok(self.shared.dialect.explain(&sql, &vars)),
            None => Err(OrmError::InvalidData(
                "dry run produced no statement".to_string(),
            )),
        }
    }
}

fn finish_sink<T: Record>(mut ctx: ExecCtx) -> OrmResult<Vec<T>> {
    if let Some(err) = ctx.error.take() {
        return Err(err);
    }
    let items = ctx
        .dest
        .sink_mut()
        .and_then(|sink| sink.as_any_mut().downcast_mut::<RecordSink<T>>())
        .map(|sink| std::mem::take(&mut sink.items))
        .unwrap_or_default();
    Ok(items)
}

fn finish_value_sink<T: FromValue + Send + 'static>(mut ctx: ExecCtx) -> OrmResult<Vec<T>> {
    if let Some(err) = ctx.error.take() {
        return Err(err);
    }
    let items = ctx
        .dest
        .sink_mut()
        .and_then(|sink| sink.as_any_mut().downcast_mut::<ValueSink<T>>())
        .map(|sink| std::mem::take(&mut sink.items))
        .unwrap_or_default();
    Ok(items)
}

fn finish_entities<T: Record>(ctx: &mut ExecCtx) -> OrmResult<Vec<T>> {
    if let Some(err) = ctx.error.take() {
        return Err(err);
    }
    let mut results = Vec::new();
    for entity in ctx.dest.entities_mut() {
        let record = entity
            .as_any_mut()
            .downcast_mut::<T>()
            .map(std::mem::take)
            .ok_or_else(|| OrmError::InvalidData("destination type mismatch".to_string()))?;
        results.push(record);
    }
    Ok(results)
}

fn finish_entity<T: Record>(ctx: &mut ExecCtx) -> OrmResult<T> {
    let mut results: Vec<T> = finish_entities(ctx)?;
    results
        .pop()
        .ok_or_else(|| OrmError::InvalidData("operation lost its destination".to_string()))
}

fn finish_exec(mut ctx: ExecCtx) -> OrmResult<u64> {
    match ctx.error.take() {
        Some(err) => Err(err),
        None => Ok(ctx.rows_affected),
    }
}
