//! The dialect contract.
//!
//! A database driver satisfies this narrow interface — identifier quoting,
//! bind-variable rendering, datatype mapping, default values, explain —
//! and the core never learns anything else about the database. Savepoints
//! and error translation are optional capabilities with workable defaults.

use crate::clause::Expr;
use crate::error::{OrmError, OrmResult};
use crate::pool::Executor;
use crate::schema::Field;
use crate::value::Value;
use async_trait::async_trait;
use std::sync::Arc;

/// Database-specific behavior the core delegates to.
#[async_trait]
pub trait Dialect: Send + Sync {
    /// Driver name, e.g. `"sqlite"`.
    fn name(&self) -> &'static str;

    /// One-time setup after open: register clause builders, tweak
    /// callbacks, verify server capabilities.
    async fn initialize(&self, db: &crate::db::Db) -> OrmResult<()> {
        let _ = db;
        Ok(())
    }

    /// Render one bind placeholder. `position` is the 1-based index of the
    /// value just appended to the statement's bind list.
    fn bind_var_to(&self, sql: &mut String, position: usize);

    /// Quote a single identifier segment.
    fn quote_to(&self, sql: &mut String, ident: &str);

    /// Map a field to its column type in DDL.
    fn data_type_of(&self, field: &Field) -> String;

    /// The default-value expression for a field in DDL.
    fn default_value_of(&self, field: &Field) -> Expr {
        Expr::raw(field.default.clone().unwrap_or_else(|| "DEFAULT".to_string()))
    }

    /// Render a debug SQL string with literals in place of placeholders.
    ///
    /// Never sent to the database; logging and dry-run output only.
    fn explain(&self, sql: &str, vars: &[Value]) -> String {
        explain_with_literals(sql, vars)
    }

    /// Whether INSERT … RETURNING is available. Turning this on routes
    /// creates through the query path so generated keys scan back.
    fn supports_returning(&self) -> bool {
        false
    }

    /// Whether the driver reports the last generated key of a batch
    /// (rather than the first), for primary-key backfill order.
    fn last_insert_id_reversed(&self) -> bool {
        false
    }

    /// Mark a savepoint inside the given transaction.
    async fn save_point(&self, conn: &Executor, name: &str) -> OrmResult<()> {
        conn.exec(&format!("SAVEPOINT {name}"), &[]).await?;
        Ok(())
    }

    /// Roll back to a previously marked savepoint.
    async fn rollback_to(&self, conn: &Executor, name: &str) -> OrmResult<()> {
        conn.exec(&format!("ROLLBACK TO SAVEPOINT {name}"), &[])
            .await?;
        Ok(())
    }

    /// Translate a driver error into the portable taxonomy
    /// (duplicated key, foreign key violated, check violated). Applied
    /// when the session enables `translate_error`.
    fn translate(&self, err: OrmError) -> OrmError {
        err
    }

    /// The migration seam. Migration itself is an external collaborator;
    /// dialects without one report the missing capability.
    fn migrator(&self) -> OrmResult<Arc<dyn Migrator>> {
        Err(OrmError::not_implemented(format!(
            "{} migrator",
            self.name()
        )))
    }
}

/// The narrow migration surface a dialect may hand out.
#[async_trait]
pub trait Migrator: Send + Sync {
    async fn auto_migrate(&self, db: &crate::db::Db, tables: &[&str]) -> OrmResult<()>;
}

/// Substitute literals for both `?` and numbered (`$n` / `:n`) markers.
pub fn explain_with_literals(sql: &str, vars: &[Value]) -> String {
    let mut out = String::with_capacity(sql.len() + vars.len() * 8);
    let mut next = 0usize;
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '?' => {
                if let Some(value) = vars.get(next) {
                    out.push_str(&value.to_literal());
                    next += 1;
                } else {
                    out.push('?');
                }
            }
            '$' | ':' if chars.peek().is_some_and(|c| c.is_ascii_digit()) => {
                let mut num = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() {
                        num.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match num.parse::<usize>().ok().and_then(|n| vars.get(n - 1)) {
                    Some(value) => out.push_str(&value.to_literal()),
                    None => {
                        out.push(ch);
                        out.push_str(&num);
                    }
                }
            }
            other => out.push(other),
        }
    }
    out
}
