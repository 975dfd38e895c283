//! The callback pipeline.
//!
//! Every operation kind (Create/Query/Update/Delete/Row/Raw) owns a
//! [`Processor`]: an ordered list of named handlers plus the clause
//! emission order for that operation. Extensions edit the list by name —
//! register before/after an existing handler, replace it, remove it, or
//! gate it with a match predicate. Ordering constraints are resolved by
//! topological sort; cycles fail at registration time.
//!
//! Handlers receive the mutable [`ExecCtx`] and follow one convention:
//! check the error slot first and return early, so a failure anywhere in
//! the chain short-circuits the rest without unwinding.

mod create;
mod delete;
mod preload;
mod query;
mod raw;
mod transaction;
mod update;

use crate::db::Config;
use crate::error::{OrmError, OrmResult};
use crate::model::{Entity, ScanSink};
use crate::pool::{Executor, TxHandle};
use crate::statement::Statement;
use crate::value::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// Operation kinds, each with its own processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Create,
    Query,
    Update,
    Delete,
    Row,
    Raw,
}

/// The destination of an operation: owned records being written, or an
/// erased sink collecting query results.
pub enum Dest {
    None,
    Entities(Vec<Box<dyn Entity>>),
    Sink(Box<dyn ScanSink>),
}

impl Dest {
    pub fn entities_mut(&mut self) -> &mut [Box<dyn Entity>] {
        match self {
            Dest::Entities(entities) => entities,
            _ => &mut [],
        }
    }

    pub fn sink_mut(&mut self) -> Option<&mut dyn ScanSink> {
        match self {
            Dest::Sink(sink) => Some(sink.as_mut()),
            _ => None,
        }
    }

    /// Visit every destination entity, whichever shape the destination has.
    pub fn for_each_entity(
        &mut self,
        f: &mut dyn FnMut(&mut dyn Entity) -> OrmResult<()>,
    ) -> OrmResult<()> {
        match self {
            Dest::Sink(sink) => sink.for_each_entity(f),
            Dest::Entities(entities) => {
                for entity in entities {
                    f(entity.as_mut())?;
                }
                Ok(())
            }
            Dest::None => Ok(()),
        }
    }
}

/// Run one operation through its processor, returning the finished
/// context. Boxed so handlers can issue nested operations (association
/// cascade, preload) without recursive future types.
pub(crate) fn run_operation(
    callbacks: Arc<Callbacks>,
    config: Config,
    capture: Arc<Mutex<Option<(String, Vec<Value>)>>>,
    root_executor: Executor,
    op: Op,
    stmt: Statement,
    dest: Dest,
) -> Pin<Box<dyn Future<Output = ExecCtx> + Send>> {
    Box::pin(async move {
        let mut ctx = ExecCtx {
            op,
            stmt,
            dest,
            error: None,
            rows_affected: 0,
            config,
            callbacks: Arc::clone(&callbacks),
            started_transaction: false,
            bracket_tx: None,
            capture,
            root_executor,
            last_insert_id: None,
        };
        callbacks.processor(op).execute(&mut ctx).await;
        ctx
    })
}

/// The execution context handlers mutate.
pub struct ExecCtx {
    pub op: Op,
    pub stmt: Statement,
    pub dest: Dest,
    pub error: Option<OrmError>,
    pub rows_affected: u64,
    pub config: Config,
    pub callbacks: Arc<Callbacks>,
    /// Set by the transaction bracket when it opened a transaction that
    /// commit-or-rollback must resolve.
    pub started_transaction: bool,
    pub bracket_tx: Option<Arc<dyn TxHandle>>,
    /// Dry-run capture slot shared with the root handle.
    pub capture: Arc<Mutex<Option<(String, Vec<Value>)>>>,
    /// The root pool, restored after the transaction bracket resolves.
    pub root_executor: Executor,
    /// Generated key reported by the driver on the exec path.
    pub last_insert_id: Option<i64>,
}

impl ExecCtx {
    /// Whether the pipeline is still healthy.
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }

    /// Record an error, translating through the dialect when enabled and
    /// chaining over any prior error (most recent first).
    pub fn add_error(&mut self, err: OrmError) {
        let err = if self.config.translate_error {
            self.stmt.dialect.translate(err)
        } else {
            err
        };
        self.error = Some(match self.error.take() {
            Some(prev) => err.chain(prev),
            None => err,
        });
    }

    /// Move build errors recorded on the statement into the error slot.
    pub fn take_statement_errors(&mut self) {
        for err in std::mem::take(&mut self.stmt.errors) {
            self.add_error(err);
        }
    }

    /// Store the rendered SQL for dry-run inspection.
    pub fn capture_sql(&self) {
        let mut slot = self.capture.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some((self.stmt.sql.clone(), self.stmt.vars.clone()));
    }

    /// Hooks are skipped for this session.
    pub fn skip_hooks(&self) -> bool {
        self.stmt.skip_hooks
    }
}

/// The boxed future a handler returns.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// A pipeline handler.
pub type Handler = Arc<dyn for<'a> Fn(&'a mut ExecCtx) -> HandlerFuture<'a> + Send + Sync>;

/// A predicate gating a handler at execution time.
pub type MatchFn = Arc<dyn Fn(&ExecCtx) -> bool + Send + Sync>;

#[derive(Clone)]
struct CallbackDef {
    name: String,
    handler: Handler,
    before: Option<String>,
    after: Option<String>,
    matcher: Option<MatchFn>,
}

#[derive(Default)]
struct ProcessorInner {
    callbacks: Vec<CallbackDef>,
    clauses: Vec<&'static str>,
    compiled: Option<Arc<Vec<CallbackDef>>>,
}

/// The ordered handler list for one operation kind.
#[derive(Default)]
pub struct Processor {
    inner: Mutex<ProcessorInner>,
}

/// A pending registration carrying ordering constraints and a predicate.
pub struct Registration<'a> {
    processor: &'a Processor,
    before: Option<String>,
    after: Option<String>,
    matcher: Option<MatchFn>,
}

impl<'a> Registration<'a> {
    /// Constrain the handler to run before the named one.
    pub fn before(mut self, name: &str) -> Self {
        self.before = Some(name.to_string());
        self
    }

    /// Constrain the handler to run after the named one.
    pub fn after(mut self, name: &str) -> Self {
        self.after = Some(name.to_string());
        self
    }

    /// Gate the handler on a predicate evaluated at execution time.
    pub fn match_fn(mut self, matcher: impl Fn(&ExecCtx) -> bool + Send + Sync + 'static) -> Self {
        self.matcher = Some(Arc::new(matcher));
        self
    }

    /// Install the handler. Fails when the resulting constraints cycle.
    pub fn register(
        self,
        name: &str,
        handler: impl for<'b> Fn(&'b mut ExecCtx) -> HandlerFuture<'b> + Send + Sync + 'static,
    ) -> OrmResult<()> {
        self.processor.install(CallbackDef {
            name: name.to_string(),
            handler: Arc::new(handler),
            before: self.before,
            after: self.after,
            matcher: self.matcher,
        })
    }
}

impl Processor {
    /// Begin a registration constrained to run before `name`.
    pub fn before(&self, name: &str) -> Registration<'_> {
        Registration {
            processor: self,
            before: Some(name.to_string()),
            after: None,
            matcher: None,
        }
    }

    /// Begin a registration constrained to run after `name`.
    pub fn after(&self, name: &str) -> Registration<'_> {
        Registration {
            processor: self,
            before: None,
            after: Some(name.to_string()),
            matcher: None,
        }
    }

    /// Begin a registration gated on a predicate.
    pub fn match_fn(
        &self,
        matcher: impl Fn(&ExecCtx) -> bool + Send + Sync + 'static,
    ) -> Registration<'_> {
        Registration {
            processor: self,
            before: None,
            after: None,
            matcher: Some(Arc::new(matcher)),
        }
    }

    /// Append a handler with no ordering constraints.
    pub fn register(
        &self,
        name: &str,
        handler: impl for<'b> Fn(&'b mut ExecCtx) -> HandlerFuture<'b> + Send + Sync + 'static,
    ) -> OrmResult<()> {
        Registration {
            processor: self,
            before: None,
            after: None,
            matcher: None,
        }
        .register(name, handler)
    }

    /// Swap the handler registered under `name`.
    pub fn replace(
        &self,
        name: &str,
        handler: impl for<'b> Fn(&'b mut ExecCtx) -> HandlerFuture<'b> + Send + Sync + 'static,
    ) -> OrmResult<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let slot = inner
            .callbacks
            .iter_mut()
            .find(|cb| cb.name == name)
            .ok_or_else(|| OrmError::invalid_field(format!("no callback named {name}")))?;
        slot.handler = Arc::new(handler);
        inner.compiled = None;
        Ok(())
    }

    /// Remove the handler registered under `name`.
    pub fn remove(&self, name: &str) -> OrmResult<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let len_before = inner.callbacks.len();
        inner.callbacks.retain(|cb| cb.name != name);
        if inner.callbacks.len() == len_before {
            return Err(OrmError::invalid_field(format!("no callback named {name}")));
        }
        inner.compiled = None;
        Ok(())
    }

    /// Declare the clause emission order for this operation.
    pub fn set_clauses(&self, clauses: Vec<&'static str>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.clauses = clauses;
    }

    fn install(&self, callback: CallbackDef) -> OrmResult<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = inner.callbacks.iter_mut().find(|cb| cb.name == callback.name) {
            *slot = callback;
        } else {
            inner.callbacks.push(callback);
        }
        // Recompile eagerly so constraint cycles surface here, not at
        // execution time.
        let sorted = sort_callbacks(&inner.callbacks)?;
        inner.compiled = Some(Arc::new(sorted));
        Ok(())
    }

    fn snapshot(&self) -> (Arc<Vec<CallbackDef>>, Vec<&'static str>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.compiled.is_none() {
            let sorted = sort_callbacks(&inner.callbacks)
                .expect("callback constraints were validated at registration");
            inner.compiled = Some(Arc::new(sorted));
        }
        (
            Arc::clone(inner.compiled.as_ref().expect("compiled just above")),
            inner.clauses.clone(),
        )
    }

    /// Run the compiled chain over a context.
    pub async fn execute(&self, ctx: &mut ExecCtx) {
        let (callbacks, clauses) = self.snapshot();
        ctx.stmt.build_clauses = clauses;
        for callback in callbacks.iter() {
            if let Some(matcher) = &callback.matcher {
                if !matcher(ctx) {
                    continue;
                }
            }
            (callback.handler)(ctx).await;
        }
        ctx.take_statement_errors();
    }
}

/// Resolve Before/After constraints into an execution order.
///
/// Registration order is the backbone; a constrained handler is placed
/// relative to its target (after-targets place first, before-targets get
/// the new handler inserted just ahead of them). Constraints naming an
/// unregistered handler are ignored; cycles and unsatisfiable
/// combinations are an error.
fn sort_callbacks(callbacks: &[CallbackDef]) -> OrmResult<Vec<CallbackDef>> {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Unplaced,
        Visiting,
        Placed,
    }

    fn place(
        i: usize,
        callbacks: &[CallbackDef],
        state: &mut [State],
        order: &mut Vec<usize>,
    ) -> OrmResult<()> {
        match state[i] {
            State::Placed => return Ok(()),
            State::Visiting => {
                return Err(OrmError::InvalidData(format!(
                    "callback ordering cycle involving {}",
                    callbacks[i].name
                )))
            }
            State::Unplaced => {}
        }
        state[i] = State::Visiting;

        let index_of = |name: &str| callbacks.iter().position(|cb| cb.name == name);
        if let Some(target) = callbacks[i].after.as_deref().and_then(index_of) {
            place(target, callbacks, state, order)?;
        }
        match callbacks[i].before.as_deref().and_then(index_of) {
            Some(target) => {
                place(target, callbacks, state, order)?;
                let pos = order
                    .iter()
                    .position(|&placed| placed == target)
                    .expect("before-target was just placed");
                order.insert(pos, i);
            }
            None => order.push(i),
        }
        state[i] = State::Placed;
        Ok(())
    }

    let n = callbacks.len();
    let mut state = vec![State::Unplaced; n];
    let mut order: Vec<usize> = Vec::with_capacity(n);
    for i in 0..n {
        place(i, callbacks, &mut state, &mut order)?;
    }

    // Insertion ahead of a before-target can only move handlers earlier,
    // so after-constraints need a final check.
    let index_of = |name: &str| callbacks.iter().position(|cb| cb.name == name);
    for (pos, &i) in order.iter().enumerate() {
        if let Some(target) = callbacks[i].after.as_deref().and_then(index_of) {
            let target_pos = order
                .iter()
                .position(|&placed| placed == target)
                .expect("every callback is placed");
            if target_pos > pos {
                return Err(OrmError::InvalidData(format!(
                    "unsatisfiable callback ordering around {}",
                    callbacks[i].name
                )));
            }
        }
    }

    Ok(order.into_iter().map(|i| callbacks[i].clone()).collect())
}

/// The processors of one root handle.
pub struct Callbacks {
    create: Processor,
    query: Processor,
    update: Processor,
    delete: Processor,
    row: Processor,
    raw: Processor,
}

impl Callbacks {
    pub fn processor(&self, op: Op) -> &Processor {
        match op {
            Op::Create => &self.create,
            Op::Query => &self.query,
            Op::Update => &self.update,
            Op::Delete => &self.delete,
            Op::Row => &self.row,
            Op::Raw => &self.raw,
        }
    }

    pub fn create(&self) -> &Processor {
        &self.create
    }

    pub fn query(&self) -> &Processor {
        &self.query
    }

    pub fn update(&self) -> &Processor {
        &self.update
    }

    pub fn delete(&self) -> &Processor {
        &self.delete
    }

    pub fn row(&self) -> &Processor {
        &self.row
    }

    pub fn raw(&self) -> &Processor {
        &self.raw
    }
}

const CREATE_CLAUSES: &[&str] = &["INSERT", "VALUES", "ON CONFLICT", "RETURNING"];
const QUERY_CLAUSES: &[&str] = &[
    "SELECT", "FROM", "WHERE", "GROUP BY", "ORDER BY", "LIMIT", "FOR",
];
const UPDATE_CLAUSES: &[&str] = &["UPDATE", "SET", "WHERE", "RETURNING"];
const DELETE_CLAUSES: &[&str] = &["DELETE", "FROM", "WHERE", "RETURNING"];

fn transactions_enabled(ctx: &ExecCtx) -> bool {
    !ctx.config.skip_default_transaction
}

/// Build the default handler chains.
pub fn initialize_callbacks() -> Callbacks {
    let callbacks = Callbacks {
        create: Processor::default(),
        query: Processor::default(),
        update: Processor::default(),
        delete: Processor::default(),
        row: Processor::default(),
        raw: Processor::default(),
    };

    let create = &callbacks.create;
    create
        .match_fn(transactions_enabled)
        .register("ormkit:begin_transaction", transaction::begin_transaction)
        .expect("default create chain");
    create
        .register("ormkit:before_create", create::before_create)
        .expect("default create chain");
    create
        .register(
            "ormkit:save_before_associations",
            create::save_before_associations,
        )
        .expect("default create chain");
    create
        .register("ormkit:create", create::create)
        .expect("default create chain");
    create
        .register(
            "ormkit:save_after_associations",
            create::save_after_associations,
        )
        .expect("default create chain");
    create
        .register("ormkit:after_create", create::after_create)
        .expect("default create chain");
    create
        .match_fn(transactions_enabled)
        .register(
            "ormkit:commit_or_rollback_transaction",
            transaction::commit_or_rollback_transaction,
        )
        .expect("default create chain");
    create.set_clauses(CREATE_CLAUSES.to_vec());

    let query = &callbacks.query;
    query
        .register("ormkit:query", query::query)
        .expect("default query chain");
    query
        .register("ormkit:preload", preload::preload)
        .expect("default query chain");
    query
        .register("ormkit:after_query", query::after_query)
        .expect("default query chain");
    query.set_clauses(QUERY_CLAUSES.to_vec());

    let update = &callbacks.update;
    update
        .match_fn(transactions_enabled)
        .register("ormkit:begin_transaction", transaction::begin_transaction)
        .expect("default update chain");
    update
        .register("ormkit:before_update", update::before_update)
        .expect("default update chain");
    update
        .register(
            "ormkit:save_before_associations",
            create::save_before_associations,
        )
        .expect("default update chain");
    update
        .register("ormkit:update", update::update)
        .expect("default update chain");
    update
        .register(
            "ormkit:save_after_associations",
            create::save_after_associations,
        )
        .expect("default update chain");
    update
        .register("ormkit:after_update", update::after_update)
        .expect("default update chain");
    update
        .match_fn(transactions_enabled)
        .register(
            "ormkit:commit_or_rollback_transaction",
            transaction::commit_or_rollback_transaction,
        )
        .expect("default update chain");
    update.set_clauses(UPDATE_CLAUSES.to_vec());

    let delete = &callbacks.delete;
    delete
        .match_fn(transactions_enabled)
        .register("ormkit:begin_transaction", transaction::begin_transaction)
        .expect("default delete chain");
    delete
        .register("ormkit:before_delete", delete::before_delete)
        .expect("default delete chain");
    delete
        .register(
            "ormkit:delete_before_associations",
            delete::delete_before_associations,
        )
        .expect("default delete chain");
    delete
        .register("ormkit:delete", delete::delete)
        .expect("default delete chain");
    delete
        .register("ormkit:after_delete", delete::after_delete)
        .expect("default delete chain");
    delete
        .match_fn(transactions_enabled)
        .register(
            "ormkit:commit_or_rollback_transaction",
            transaction::commit_or_rollback_transaction,
        )
        .expect("default delete chain");
    delete.set_clauses(DELETE_CLAUSES.to_vec());

    callbacks
        .row
        .register("ormkit:row", raw::row_query)
        .expect("default row chain");
    callbacks.row.set_clauses(QUERY_CLAUSES.to_vec());

    callbacks
        .raw
        .register("ormkit:raw", raw::raw_exec)
        .expect("default raw chain");
    callbacks.raw.set_clauses(QUERY_CLAUSES.to_vec());

    callbacks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_ctx: &mut ExecCtx) -> HandlerFuture<'_> {
        Box::pin(async {})
    }

    #[test]
    fn register_orders_by_constraints() {
        let processor = Processor::default();
        processor.register("first", noop).unwrap();
        processor.register("third", noop).unwrap();
        processor
            .before("third")
            .after("first")
            .register("second", noop)
            .unwrap();

        let (compiled, _) = processor.snapshot();
        let names: Vec<&str> = compiled.iter().map(|cb| cb.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn cycle_fails_at_registration() {
        let processor = Processor::default();
        processor.register("a", noop).unwrap();
        processor.before("a").register("b", noop).unwrap();
        // b before a, and now a before b: cycle.
        let err = processor.before("b").register("a", noop).unwrap_err();
        assert!(matches!(err, OrmError::InvalidData(_)));
    }

    #[test]
    fn replace_and_remove_by_name() {
        let processor = Processor::default();
        processor.register("only", noop).unwrap();
        processor.replace("only", noop).unwrap();
        processor.remove("only").unwrap();
        assert!(processor.remove("only").is_err());
    }

    #[test]
    fn default_chain_compiles() {
        let callbacks = initialize_callbacks();
        let (compiled, clauses) = callbacks.create().snapshot();
        assert_eq!(compiled.len(), 7);
        assert_eq!(clauses, CREATE_CLAUSES.to_vec());
    }
}
