//! The callback-manager surface: registration, ordering edits, match
//! predicates, and the plugin registry.

mod support;

use ormkit::{ExecCtx, HandlerFuture, OrmError, Plugin, Value};
use std::sync::{Arc, Mutex};
use support::*;

static ORDER_LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

fn log_pre(_ctx: &mut ExecCtx) -> HandlerFuture<'_> {
    Box::pin(async move {
        ORDER_LOG.lock().unwrap().push("pre-query");
    })
}

fn log_post(_ctx: &mut ExecCtx) -> HandlerFuture<'_> {
    Box::pin(async move {
        ORDER_LOG.lock().unwrap().push("post-query");
    })
}

fn noop(_ctx: &mut ExecCtx) -> HandlerFuture<'_> {
    Box::pin(async move {})
}

fn forbidden(ctx: &mut ExecCtx) -> HandlerFuture<'_> {
    Box::pin(async move {
        ctx.add_error(OrmError::InvalidData("matched handler ran".to_string()));
    })
}

#[tokio::test]
async fn registered_handlers_run_in_constraint_order() {
    let (db, _state) = open_test_db().await;
    db.callback()
        .query()
        .before("ormkit:query")
        .register("test:pre", log_pre)
        .unwrap();
    db.callback()
        .query()
        .after("ormkit:query")
        .register("test:post", log_post)
        .unwrap();

    ORDER_LOG.lock().unwrap().clear();
    let _: Vec<User> = db.clone().model::<User>().find().await.unwrap();
    assert_eq!(
        *ORDER_LOG.lock().unwrap(),
        vec!["pre-query", "post-query"]
    );
}

#[tokio::test]
async fn replaced_handler_takes_over() {
    let (db, state) = open_test_db().await;
    db.callback().query().replace("ormkit:query", noop).unwrap();

    let users: Vec<User> = db.clone().model::<User>().find().await.unwrap();
    assert!(users.is_empty());
    assert!(state.executed_sql().is_empty(), "replaced handler did no IO");
}

#[tokio::test]
async fn removed_handler_no_longer_runs() {
    let (db, state) = open_test_db().await;
    state.query_results.lock().unwrap().push_back(Ok(ormkit::Rows::new(
        vec![
            "id".to_string(),
            "label".to_string(),
            "created_hook".to_string(),
            "found_hook".to_string(),
        ],
        vec![vec![
            Value::Int(1),
            Value::Text("x".to_string()),
            Value::Bool(false),
            Value::Bool(false),
        ]],
    )));
    db.callback().query().remove("ormkit:after_query").unwrap();

    let found: Vec<Audited> = db.clone().model::<Audited>().find().await.unwrap();
    assert!(
        !found[0].found_hook,
        "after_query removed, AfterFind never invoked"
    );
}

#[tokio::test]
async fn match_predicate_gates_execution() {
    let (db, _state) = open_test_db().await;
    db.callback()
        .query()
        .match_fn(|_ctx| false)
        .register("test:never", forbidden)
        .unwrap();

    let users: Vec<User> = db.clone().model::<User>().find().await.unwrap();
    assert!(users.is_empty(), "gated handler never reported its error");
}

struct CountingPlugin {
    initialized: Arc<Mutex<u32>>,
}

impl Plugin for CountingPlugin {
    fn name(&self) -> &str {
        "counting"
    }

    fn initialize(&self, db: &ormkit::Db) -> ormkit::OrmResult<()> {
        *self.initialized.lock().unwrap() += 1;
        db.callback()
            .create()
            .after("ormkit:create")
            .register("counting:after_create", noop)
    }
}

#[tokio::test]
async fn plugins_register_once_and_reject_duplicates() {
    let (db, _state) = open_test_db().await;
    let initialized = Arc::new(Mutex::new(0));

    db.use_plugin(Arc::new(CountingPlugin {
        initialized: Arc::clone(&initialized),
    }))
    .unwrap();
    assert_eq!(*initialized.lock().unwrap(), 1);

    let err = db
        .use_plugin(Arc::new(CountingPlugin {
            initialized: Arc::clone(&initialized),
        }))
        .unwrap_err();
    assert!(matches!(err, OrmError::Registered(_)));
    assert_eq!(*initialized.lock().unwrap(), 1, "duplicate never initialized");
}

#[tokio::test]
async fn constraint_cycles_fail_at_registration() {
    let (db, _state) = open_test_db().await;
    let processor = db.callback().raw();
    processor.before("ormkit:raw").register("test:a", noop).unwrap();
    let err = processor
        .after("ormkit:raw")
        .before("test:a")
        .register("test:b", noop)
        .unwrap_err();
    assert!(matches!(err, OrmError::InvalidData(_)));
}
