//! # ormkit
//!
//! A database-agnostic ORM core: the statement-construction and execution
//! pipeline that turns a fluent, model-oriented query description into
//! dialect-specific SQL, executes it against a pluggable connection pool,
//! and maps result rows back into record types.
//!
//! ## Features
//!
//! - **Clause model**: every SQL fragment (SELECT, WHERE, VALUES, …) is a
//!   value that renders itself and merges with prior fragments
//! - **Callback pipeline**: ordered, named, extensible handler chains per
//!   operation kind, with before/after hooks, transaction bracketing,
//!   association cascade, and preloading
//! - **Copy-on-write sessions**: chain methods consume and return the
//!   builder, so branches never share mutable statement state
//! - **Narrow dialect contract**: quoting, placeholders, datatypes,
//!   explain — one core drives many databases
//! - **Prepared-statement cache**: SQL-keyed, shared per root handle, with
//!   evict-and-retry on driver errors
//!
//! ## Quick start
//!
//! ```ignore
//! use ormkit::{open, Config, vars};
//!
//! let db = open(dialect, pool, Config::default()).await?;
//! let user = db.model::<User>().create(User { name: "ada".into(), ..Default::default() }).await?;
//! let found: Vec<User> = db
//!     .model::<User>()
//!     .where_("name = ?", vars!["ada"])
//!     .find()
//!     .await?;
//! ```

pub mod callbacks;
pub mod clause;
mod db;
pub mod dialect;
mod error;
pub mod model;
mod naming;
pub mod pool;
mod prepared;
mod scan;
pub mod schema;
mod statement;
mod value;

pub use callbacks::{Callbacks, Dest, ExecCtx, HandlerFuture, Op, Processor};
pub use db::{open, Config, Db, NowFunc, Plugin, Session};
pub use dialect::{explain_with_literals, Dialect, Migrator};
pub use error::{OrmError, OrmResult};
pub use model::{load_row, Entity, Record, RecordSink, RowsSink, ScanSink, ValueSink};
pub use naming::NamingStrategy;
pub use pool::{ConnPool, ExecResult, Executor, OwnedRow, PreparedStatement, Row, Rows, TxHandle};
pub use prepared::{PreparedPool, StmtCache, StmtCacheStats};
pub use scan::scan_rows;
pub use statement::{nested_alias, JoinSpec, Statement};
pub use value::{FromValue, Value};
