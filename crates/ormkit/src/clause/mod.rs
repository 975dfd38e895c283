//! Clause model: every SQL statement decomposed into named fragments.
//!
//! Each fragment (SELECT, FROM, WHERE, …) is a value that knows how to
//! render itself into a shared [`Builder`] and how to merge with a prior
//! fragment of the same name. A statement holds at most one [`Clause`] per
//! name; the operation kind decides the emission order.

mod delete;
mod expr;
mod from;
mod group_by;
mod insert;
mod limit;
mod locking;
mod on_conflict;
mod order_by;
mod returning;
mod select;
mod set;
mod update;
mod values;
mod where_clause;

pub use delete::Delete;
pub use expr::{Expr, Operand};
pub use from::{From, Join, JoinType};
pub use group_by::GroupBy;
pub use insert::Insert;
pub use limit::Limit;
pub use locking::Locking;
pub use on_conflict::OnConflict;
pub use order_by::{OrderBy, OrderByColumn};
pub use returning::Returning;
pub use select::Select;
pub use set::{Assignment, Set};
pub use update::Update;
pub use values::Values;
pub use where_clause::Where;

use crate::error::OrmError;
use crate::value::Value;
use std::any::Any;

/// Sentinel resolved to the schema's prioritized primary-key column.
pub const PRIMARY_KEY: &str = "~~~py~~~";
/// Sentinel resolved to the statement's current table.
pub const CURRENT_TABLE: &str = "~~~ct~~~";
/// Sentinel selecting every relationship of the model.
pub const ASSOCIATIONS: &str = "~~~as~~~";

/// A column reference, optionally table-qualified and aliased.
///
/// When `raw` is set the name is emitted verbatim and never inspected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnRef {
    pub table: String,
    pub name: String,
    pub alias: String,
    pub raw: bool,
}

impl ColumnRef {
    /// A bare column.
    pub fn new(name: impl Into<String>) -> Self {
        ColumnRef {
            name: name.into(),
            ..Default::default()
        }
    }

    /// A table-qualified column.
    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        ColumnRef {
            table: table.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// A raw column emitted without quoting.
    pub fn raw(name: impl Into<String>) -> Self {
        ColumnRef {
            name: name.into(),
            raw: true,
            ..Default::default()
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }
}

/// The current table's primary-key column (both halves are sentinels).
pub fn primary_column() -> ColumnRef {
    ColumnRef::qualified(CURRENT_TABLE, PRIMARY_KEY)
}

/// A table reference, optionally aliased.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableRef {
    pub name: String,
    pub alias: String,
    pub raw: bool,
}

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        TableRef {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn aliased(name: impl Into<String>, alias: impl Into<String>) -> Self {
        TableRef {
            name: name.into(),
            alias: alias.into(),
            raw: false,
        }
    }
}

/// The current table as a [`TableRef`] sentinel.
pub fn current_table() -> TableRef {
    TableRef::new(CURRENT_TABLE)
}

/// Anything [`Builder::write_quoted`] can quote.
#[derive(Debug, Clone)]
pub enum QuoteTarget {
    /// A plain identifier; a dotted name is split at the last dot and each
    /// side quoted independently.
    Plain(String),
    Column(ColumnRef),
    Table(TableRef),
}

impl std::convert::From<&str> for QuoteTarget {
    fn from(s: &str) -> Self {
        QuoteTarget::Plain(s.to_string())
    }
}

impl std::convert::From<String> for QuoteTarget {
    fn from(s: String) -> Self {
        QuoteTarget::Plain(s)
    }
}

impl std::convert::From<ColumnRef> for QuoteTarget {
    fn from(c: ColumnRef) -> Self {
        QuoteTarget::Column(c)
    }
}

impl std::convert::From<TableRef> for QuoteTarget {
    fn from(t: TableRef) -> Self {
        QuoteTarget::Table(t)
    }
}

/// The writer surface clauses and expressions render into.
///
/// The statement implements this, backed by its growable SQL buffer, the
/// positional bind list, and the active dialect. Every placeholder written
/// through [`add_var`](Builder::add_var) is backed by exactly one entry in
/// the bind list.
pub trait Builder {
    fn write_str(&mut self, s: &str);

    fn write_byte(&mut self, b: char);

    /// Quote an identifier, column, or table per dialect rules, resolving
    /// the [`CURRENT_TABLE`] and [`PRIMARY_KEY`] sentinels.
    fn write_quoted(&mut self, target: &QuoteTarget);

    /// Append each value to the bind list and render one placeholder per
    /// value through the dialect.
    fn add_var(&mut self, values: &[Value]);

    /// Record a non-fatal error. Subsequent clauses still build (dry-run
    /// yields SQL even with partial failures) but execution short-circuits.
    fn add_error(&mut self, err: OrmError);
}

/// A renderable expression tree used inside clauses.
///
/// Implemented by the leaf [`Expr`] enum and by every clause type, so a
/// merged clause can store either under one object.
pub trait Expression: Send + Sync + 'static {
    fn build(&self, builder: &mut dyn Builder);

    fn boxed_clone(&self) -> Box<dyn Expression>;

    fn as_any(&self) -> &dyn Any;
}

impl Clone for Box<dyn Expression> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

macro_rules! impl_expression_delegate {
    ($ty:ty) => {
        impl crate::clause::Expression for $ty {
            fn build(&self, builder: &mut dyn crate::clause::Builder) {
                self.render(builder);
            }

            fn boxed_clone(&self) -> Box<dyn crate::clause::Expression> {
                Box::new(self.clone())
            }

            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }
    };
}
pub(crate) use impl_expression_delegate;

/// A hook overriding how a named clause renders, installed per clause.
pub type ClauseBuilderFn = fn(&Clause, &mut dyn Builder);

/// A named SQL fragment inside a statement.
///
/// Within one statement a clause name is unique; installing a fragment
/// under an existing name goes through the fragment's own merge rule.
#[derive(Clone, Default)]
pub struct Clause {
    pub name: &'static str,
    pub before: Option<Box<dyn Expression>>,
    pub after_name: Option<Box<dyn Expression>>,
    pub after: Option<Box<dyn Expression>>,
    pub expression: Option<Box<dyn Expression>>,
    pub builder: Option<ClauseBuilderFn>,
}

impl std::fmt::Debug for Clause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clause")
            .field("name", &self.name)
            .field("has_expression", &self.expression.is_some())
            .finish()
    }
}

impl Clause {
    /// Render `before`, the name, `after_name`, the expression, and `after`,
    /// separated by single spaces. A custom builder overrides everything.
    pub fn build(&self, builder: &mut dyn Builder) {
        if let Some(custom) = self.builder {
            custom(self, builder);
            return;
        }
        let Some(expression) = &self.expression else {
            return;
        };

        if let Some(before) = &self.before {
            before.build(builder);
            builder.write_byte(' ');
        }
        if !self.name.is_empty() {
            builder.write_str(self.name);
            builder.write_byte(' ');
        }
        if let Some(after_name) = &self.after_name {
            after_name.build(builder);
            builder.write_byte(' ');
        }
        expression.build(builder);
        if let Some(after) = &self.after {
            builder.write_byte(' ');
            after.build(builder);
        }
    }
}

/// The contract every concrete clause type satisfies.
///
/// `merge` is called on every install, including the first, so each clause
/// controls its own combine semantics (WHERE concatenates conjuncts, VALUES
/// replaces, SELECT lets an explicit expression win).
pub trait ClausePart: Expression + Clone {
    /// The clause name this fragment occupies, e.g. `"WHERE"`.
    fn name(&self) -> &'static str;

    /// Fold this fragment into the statement's stored clause.
    fn merge(self, clause: &mut Clause);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A standalone builder for clause-level tests: backtick quoting,
    /// `?` placeholders, sentinel resolution against a fixed table.
    pub(crate) struct TestBuilder {
        pub sql: String,
        pub vars: Vec<Value>,
        pub errors: Vec<OrmError>,
        pub table: String,
    }

    impl Default for TestBuilder {
        fn default() -> Self {
            TestBuilder {
                sql: String::new(),
                vars: Vec::new(),
                errors: Vec::new(),
                table: "t".to_string(),
            }
        }
    }

    impl TestBuilder {
        fn quote_ident(&mut self, ident: &str) {
            if let Some((table, column)) = ident.rsplit_once('.') {
                self.sql.push('`');
                self.sql.push_str(table);
                self.sql.push_str("`.`");
                self.sql.push_str(column);
                self.sql.push('`');
            } else {
                self.sql.push('`');
                self.sql.push_str(ident);
                self.sql.push('`');
            }
        }

        fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
            match name {
                CURRENT_TABLE => &self.table,
                PRIMARY_KEY => "id",
                other => other,
            }
        }
    }

    impl Builder for TestBuilder {
        fn write_str(&mut self, s: &str) {
            self.sql.push_str(s);
        }

        fn write_byte(&mut self, b: char) {
            self.sql.push(b);
        }

        fn write_quoted(&mut self, target: &QuoteTarget) {
            match target {
                QuoteTarget::Plain(s) => self.quote_ident(s),
                QuoteTarget::Column(c) => {
                    if c.raw {
                        self.sql.push_str(&c.name);
                        return;
                    }
                    if !c.table.is_empty() {
                        let table = self.resolve(&c.table).to_string();
                        self.quote_ident(&table);
                        self.sql.push('.');
                    }
                    let name = self.resolve(&c.name).to_string();
                    self.quote_ident(&name);
                    if !c.alias.is_empty() {
                        self.sql.push_str(" AS ");
                        let alias = c.alias.clone();
                        self.quote_ident(&alias);
                    }
                }
                QuoteTarget::Table(t) => {
                    if t.raw {
                        self.sql.push_str(&t.name);
                        return;
                    }
                    let name = self.resolve(&t.name).to_string();
                    self.quote_ident(&name);
                    if !t.alias.is_empty() {
                        self.sql.push(' ');
                        let alias = t.alias.clone();
                        self.quote_ident(&alias);
                    }
                }
            }
        }

        fn add_var(&mut self, values: &[Value]) {
            for value in values {
                self.vars.push(value.clone());
                self.sql.push('?');
            }
        }

        fn add_error(&mut self, err: OrmError) {
            self.errors.push(err);
        }
    }
}
