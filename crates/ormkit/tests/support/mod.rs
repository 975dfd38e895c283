//! Shared test fixtures: a recording pool with scriptable results, two
//! test dialects, and hand-mapped record types.

#![allow(dead_code)]

use async_trait::async_trait;
use ormkit::schema::{DataType, Descriptor, FieldDef, HookFlags};
use ormkit::{
    ConnPool, Dialect, Entity, ExecResult, FromValue, OrmError, OrmResult, PreparedStatement,
    Record, Row, Rows, TxHandle, Value,
};
use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

// ── Dialects ────────────────────────────────────────────────────────────────

/// ANSI-ish dialect: `"ident"` quoting, `?` placeholders, no RETURNING.
pub struct TestDialect;

impl Dialect for TestDialect {
    fn name(&self) -> &'static str {
        "test"
    }

    fn bind_var_to(&self, sql: &mut String, _position: usize) {
        sql.push('?');
    }

    fn quote_to(&self, sql: &mut String, ident: &str) {
        sql.push('"');
        sql.push_str(ident);
        sql.push('"');
    }

    fn data_type_of(&self, field: &ormkit::schema::Field) -> String {
        match field.data_type {
            DataType::Int => "integer".to_string(),
            DataType::Text => "text".to_string(),
            DataType::Bool => "boolean".to_string(),
            DataType::Float => "real".to_string(),
            DataType::Bytes => "blob".to_string(),
            DataType::Time => "datetime".to_string(),
        }
    }
}

/// Postgres-flavored dialect: `$n` placeholders and RETURNING support.
pub struct PgDialect;

impl Dialect for PgDialect {
    fn name(&self) -> &'static str {
        "pgtest"
    }

    fn bind_var_to(&self, sql: &mut String, position: usize) {
        sql.push('$');
        sql.push_str(&position.to_string());
    }

    fn quote_to(&self, sql: &mut String, ident: &str) {
        sql.push('"');
        sql.push_str(ident);
        sql.push('"');
    }

    fn data_type_of(&self, field: &ormkit::schema::Field) -> String {
        TestDialect.data_type_of(field)
    }

    fn supports_returning(&self) -> bool {
        true
    }
}

// ── Recording pool ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct PoolState {
    /// Every statement sent to the pool, in order.
    pub log: Mutex<Vec<(String, Vec<Value>)>>,
    /// Transaction lifecycle events: BEGIN / COMMIT / ROLLBACK.
    pub tx_events: Mutex<Vec<String>>,
    pub exec_results: Mutex<VecDeque<OrmResult<ExecResult>>>,
    pub query_results: Mutex<VecDeque<OrmResult<Rows>>>,
    pub prepares: AtomicUsize,
    next_id: AtomicI64,
}

impl PoolState {
    fn record(&self, sql: &str, vars: &[Value]) {
        self.log
            .lock()
            .unwrap()
            .push((sql.to_string(), vars.to_vec()));
    }

    fn next_exec(&self) -> OrmResult<ExecResult> {
        match self.exec_results.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(ExecResult {
                rows_affected: 1,
                last_insert_id: Some(self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
            }),
        }
    }

    fn next_query(&self) -> OrmResult<Rows> {
        match self.query_results.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(Rows::default()),
        }
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }
}

/// A pool that records everything and replays scripted results.
#[derive(Default)]
pub struct RecordingPool {
    pub state: Arc<PoolState>,
}

impl RecordingPool {
    pub fn new() -> (Arc<Self>, Arc<PoolState>) {
        let pool = Arc::new(RecordingPool::default());
        let state = Arc::clone(&pool.state);
        (pool, state)
    }
}

#[async_trait]
impl ConnPool for RecordingPool {
    async fn exec(&self, sql: &str, vars: &[Value]) -> OrmResult<ExecResult> {
        self.state.record(sql, vars);
        self.state.next_exec()
    }

    async fn query(&self, sql: &str, vars: &[Value]) -> OrmResult<Rows> {
        self.state.record(sql, vars);
        self.state.next_query()
    }

    async fn prepare(&self, sql: &str) -> OrmResult<Arc<dyn PreparedStatement>> {
        self.state.prepares.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(RecordingStmt {
            sql: sql.to_string(),
            state: Arc::clone(&self.state),
        }))
    }

    async fn begin(&self) -> OrmResult<Arc<dyn TxHandle>> {
        self.state.tx_events.lock().unwrap().push("BEGIN".to_string());
        Ok(Arc::new(RecordingTx {
            state: Arc::clone(&self.state),
        }))
    }
}

pub struct RecordingTx {
    state: Arc<PoolState>,
}

#[async_trait]
impl ConnPool for RecordingTx {
    async fn exec(&self, sql: &str, vars: &[Value]) -> OrmResult<ExecResult> {
        self.state.record(sql, vars);
        self.state.next_exec()
    }

    async fn query(&self, sql: &str, vars: &[Value]) -> OrmResult<Rows> {
        self.state.record(sql, vars);
        self.state.next_query()
    }

    async fn prepare(&self, sql: &str) -> OrmResult<Arc<dyn PreparedStatement>> {
        self.state.prepares.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(RecordingStmt {
            sql: sql.to_string(),
            state: Arc::clone(&self.state),
        }))
    }
}

#[async_trait]
impl TxHandle for RecordingTx {
    async fn commit(&self) -> OrmResult<()> {
        self.state.tx_events.lock().unwrap().push("COMMIT".to_string());
        Ok(())
    }

    async fn rollback(&self) -> OrmResult<()> {
        self.state
            .tx_events
            .lock()
            .unwrap()
            .push("ROLLBACK".to_string());
        Ok(())
    }
}

pub struct RecordingStmt {
    sql: String,
    state: Arc<PoolState>,
}

#[async_trait]
impl PreparedStatement for RecordingStmt {
    async fn exec(&self, vars: &[Value]) -> OrmResult<ExecResult> {
        self.state.record(&self.sql, vars);
        self.state.next_exec()
    }

    async fn query(&self, vars: &[Value]) -> OrmResult<Rows> {
        self.state.record(&self.sql, vars);
        self.state.next_query()
    }
}

// ── Record types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manager {
    pub id: i64,
    pub name: String,
}

impl Entity for Manager {
    fn descriptor_ref(&self) -> &'static Descriptor {
        Manager::descriptor()
    }

    fn get(&self, column: &str) -> Option<Value> {
        match column {
            "id" => Some(self.id.into()),
            "name" => Some(self.name.as_str().into()),
            _ => None,
        }
    }

    fn set(&mut self, column: &str, value: &Value) -> OrmResult<bool> {
        match column {
            "id" => self.id = i64::from_value(value)?,
            "name" => self.name = String::from_value(value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Record for Manager {
    fn descriptor() -> &'static Descriptor {
        static D: OnceLock<Descriptor> = OnceLock::new();
        D.get_or_init(|| {
            Descriptor::new("Manager")
                .field(FieldDef::new("id", DataType::Int).primary_key().auto_increment())
                .field(FieldDef::new("name", DataType::Text))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Company {
    pub id: i64,
    pub name: String,
    pub manager_id: i64,
    pub manager: Option<Manager>,
}

impl Entity for Company {
    fn descriptor_ref(&self) -> &'static Descriptor {
        Company::descriptor()
    }

    fn get(&self, column: &str) -> Option<Value> {
        match column {
            "id" => Some(self.id.into()),
            "name" => Some(self.name.as_str().into()),
            "manager_id" => Some(self.manager_id.into()),
            _ => None,
        }
    }

    fn set(&mut self, column: &str, value: &Value) -> OrmResult<bool> {
        match column {
            "id" => self.id = i64::from_value(value)?,
            "name" => self.name = String::from_value(value)?,
            "manager_id" => self.manager_id = i64::from_value(value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn set_path(&mut self, path: &[&str], value: &Value) -> OrmResult<bool> {
        match path {
            [column] => self.set(column, value),
            ["Manager", rest @ ..] => self
                .manager
                .get_or_insert_with(Manager::default)
                .set_path(rest, value),
            _ => Ok(false),
        }
    }

    fn attach(&mut self, relation: &str, rows: &[Row<'_>]) -> OrmResult<()> {
        match relation {
            "Manager" => {
                self.manager = rows.first().map(Manager::from_row).transpose()?;
                Ok(())
            }
            other => Err(OrmError::UnsupportedRelation(other.to_string())),
        }
    }

    fn detach(&mut self, relation: &str) -> Vec<Box<dyn Entity>> {
        match relation {
            "Manager" => self
                .manager
                .take()
                .map(|m| Box::new(m) as Box<dyn Entity>)
                .into_iter()
                .collect(),
            _ => Vec::new(),
        }
    }

    fn restore(&mut self, relation: &str, mut entities: Vec<Box<dyn Entity>>) {
        if relation == "Manager" {
            self.manager = entities
                .pop()
                .and_then(|mut e| e.as_any_mut().downcast_mut::<Manager>().map(std::mem::take));
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Record for Company {
    fn descriptor() -> &'static Descriptor {
        static D: OnceLock<Descriptor> = OnceLock::new();
        D.get_or_init(|| {
            Descriptor::new("Company")
                .field(FieldDef::new("id", DataType::Int).primary_key().auto_increment())
                .field(FieldDef::new("name", DataType::Text))
                .field(FieldDef::new("manager_id", DataType::Int))
                .belongs_to("Manager", Manager::descriptor)
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Post {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
}

impl Entity for Post {
    fn descriptor_ref(&self) -> &'static Descriptor {
        Post::descriptor()
    }

    fn get(&self, column: &str) -> Option<Value> {
        match column {
            "id" => Some(self.id.into()),
            "user_id" => Some(self.user_id.into()),
            "title" => Some(self.title.as_str().into()),
            _ => None,
        }
    }

    fn set(&mut self, column: &str, value: &Value) -> OrmResult<bool> {
        match column {
            "id" => self.id = i64::from_value(value)?,
            "user_id" => self.user_id = i64::from_value(value)?,
            "title" => self.title = String::from_value(value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Record for Post {
    fn descriptor() -> &'static Descriptor {
        static D: OnceLock<Descriptor> = OnceLock::new();
        D.get_or_init(|| {
            Descriptor::new("Post")
                .field(FieldDef::new("id", DataType::Int).primary_key().auto_increment())
                .field(FieldDef::new("user_id", DataType::Int))
                .field(FieldDef::new("title", DataType::Text))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub age: i64,
    pub company_id: i64,
    pub company: Option<Company>,
    pub posts: Vec<Post>,
}

impl Entity for User {
    fn descriptor_ref(&self) -> &'static Descriptor {
        User::descriptor()
    }

    fn get(&self, column: &str) -> Option<Value> {
        match column {
            "id" => Some(self.id.into()),
            "name" => Some(self.name.as_str().into()),
            "age" => Some(self.age.into()),
            "company_id" => Some(self.company_id.into()),
            _ => None,
        }
    }

    fn set(&mut self, column: &str, value: &Value) -> OrmResult<bool> {
        match column {
            "id" => self.id = i64::from_value(value)?,
            "name" => self.name = String::from_value(value)?,
            "age" => self.age = i64::from_value(value)?,
            "company_id" => self.company_id = i64::from_value(value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn set_path(&mut self, path: &[&str], value: &Value) -> OrmResult<bool> {
        match path {
            [column] => self.set(column, value),
            ["Company", rest @ ..] => self
                .company
                .get_or_insert_with(Company::default)
                .set_path(rest, value),
            _ => Ok(false),
        }
    }

    fn attach(&mut self, relation: &str, rows: &[Row<'_>]) -> OrmResult<()> {
        match relation {
            "Posts" => {
                self.posts = rows.iter().map(Post::from_row).collect::<OrmResult<_>>()?;
                Ok(())
            }
            "Company" => {
                self.company = rows.first().map(Company::from_row).transpose()?;
                Ok(())
            }
            other => Err(OrmError::UnsupportedRelation(other.to_string())),
        }
    }

    fn detach(&mut self, relation: &str) -> Vec<Box<dyn Entity>> {
        match relation {
            "Company" => self
                .company
                .take()
                .map(|c| Box::new(c) as Box<dyn Entity>)
                .into_iter()
                .collect(),
            "Posts" => std::mem::take(&mut self.posts)
                .into_iter()
                .map(|p| Box::new(p) as Box<dyn Entity>)
                .collect(),
            _ => Vec::new(),
        }
    }

    fn restore(&mut self, relation: &str, mut entities: Vec<Box<dyn Entity>>) {
        match relation {
            "Company" => {
                self.company = entities.pop().and_then(|mut e| {
                    e.as_any_mut().downcast_mut::<Company>().map(std::mem::take)
                });
            }
            "Posts" => {
                self.posts = entities
                    .iter_mut()
                    .filter_map(|e| e.as_any_mut().downcast_mut::<Post>().map(std::mem::take))
                    .collect();
            }
            _ => {}
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Record for User {
    fn descriptor() -> &'static Descriptor {
        static D: OnceLock<Descriptor> = OnceLock::new();
        D.get_or_init(|| {
            Descriptor::new("User")
                .field(FieldDef::new("id", DataType::Int).primary_key().auto_increment())
                .field(FieldDef::new("name", DataType::Text))
                .field(FieldDef::new("age", DataType::Int))
                .field(FieldDef::new("company_id", DataType::Int))
                .belongs_to("Company", Company::descriptor)
                .has_many("Posts", Post::descriptor)
        })
    }
}

/// A record with hook capabilities, for pipeline hook tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Audited {
    pub id: i64,
    pub label: String,
    pub created_hook: bool,
    pub found_hook: bool,
}

impl Entity for Audited {
    fn descriptor_ref(&self) -> &'static Descriptor {
        Audited::descriptor()
    }

    fn get(&self, column: &str) -> Option<Value> {
        match column {
            "id" => Some(self.id.into()),
            "label" => Some(self.label.as_str().into()),
            "created_hook" => Some(self.created_hook.into()),
            "found_hook" => Some(self.found_hook.into()),
            _ => None,
        }
    }

    fn set(&mut self, column: &str, value: &Value) -> OrmResult<bool> {
        match column {
            "id" => self.id = i64::from_value(value)?,
            "label" => self.label = String::from_value(value)?,
            "created_hook" => self.created_hook = bool::from_value(value)?,
            "found_hook" => self.found_hook = bool::from_value(value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn before_create(&mut self) -> OrmResult<()> {
        if self.label == "reject" {
            return Err(OrmError::InvalidData("rejected by hook".to_string()));
        }
        self.created_hook = true;
        Ok(())
    }

    fn after_find(&mut self) -> OrmResult<()> {
        self.found_hook = true;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Record for Audited {
    fn descriptor() -> &'static Descriptor {
        static D: OnceLock<Descriptor> = OnceLock::new();
        D.get_or_init(|| {
            Descriptor::new("Audited")
                .field(FieldDef::new("id", DataType::Int).primary_key().auto_increment())
                .field(FieldDef::new("label", DataType::Text))
                .field(FieldDef::new("created_hook", DataType::Bool))
                .field(FieldDef::new("found_hook", DataType::Bool))
                .hooks(HookFlags {
                    before_create: true,
                    after_find: true,
                    ..Default::default()
                })
        })
    }
}

/// A soft-deletable record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SoftDoc {
    pub id: i64,
    pub title: String,
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Entity for SoftDoc {
    fn descriptor_ref(&self) -> &'static Descriptor {
        SoftDoc::descriptor()
    }

    fn get(&self, column: &str) -> Option<Value> {
        match column {
            "id" => Some(self.id.into()),
            "title" => Some(self.title.as_str().into()),
            "deleted_at" => Some(self.deleted_at.into()),
            _ => None,
        }
    }

    fn set(&mut self, column: &str, value: &Value) -> OrmResult<bool> {
        match column {
            "id" => self.id = i64::from_value(value)?,
            "title" => self.title = String::from_value(value)?,
            "deleted_at" => self.deleted_at = Option::from_value(value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Record for SoftDoc {
    fn descriptor() -> &'static Descriptor {
        static D: OnceLock<Descriptor> = OnceLock::new();
        D.get_or_init(|| {
            Descriptor::new("SoftDoc")
                .field(FieldDef::new("id", DataType::Int).primary_key().auto_increment())
                .field(FieldDef::new("title", DataType::Text))
                .field(FieldDef::new("deleted_at", DataType::Time).soft_delete())
        })
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Open a Db over a fresh recording pool and the ANSI test dialect.
pub async fn open_test_db() -> (ormkit::Db, Arc<PoolState>) {
    open_test_db_with(ormkit::Config::default()).await
}

pub async fn open_test_db_with(config: ormkit::Config) -> (ormkit::Db, Arc<PoolState>) {
    let (pool, state) = RecordingPool::new();
    let db = ormkit::open(Arc::new(TestDialect), pool, config)
        .await
        .expect("open test db");
    (db, state)
}

/// Build a user-rows result set in schema column order.
pub fn user_rows(users: &[(i64, &str, i64, i64)]) -> Rows {
    Rows::new(
        vec![
            "id".to_string(),
            "name".to_string(),
            "age".to_string(),
            "company_id".to_string(),
        ],
        users
            .iter()
            .map(|(id, name, age, company_id)| {
                vec![
                    Value::Int(*id),
                    Value::Text(name.to_string()),
                    Value::Int(*age),
                    Value::Int(*company_id),
                ]
            })
            .collect(),
    )
}

pub fn post_rows(posts: &[(i64, i64, &str)]) -> Rows {
    Rows::new(
        vec!["id".to_string(), "user_id".to_string(), "title".to_string()],
        posts
            .iter()
            .map(|(id, user_id, title)| {
                vec![
                    Value::Int(*id),
                    Value::Int(*user_id),
                    Value::Text(title.to_string()),
                ]
            })
            .collect(),
    )
}
