//! Leaf expression builders.
//!
//! [`Expr`] is the composable condition tree used inside WHERE, HAVING,
//! JOIN ON, and ON CONFLICT fragments: AND/OR/NOT groups, comparisons,
//! IN/BETWEEN/LIKE, raw `?` templates, named `@name` templates, and
//! sub-select splices. Placeholders are rendered through the dialect at
//! build time; there is no string replacement after the fact.

use crate::clause::{impl_expression_delegate, Builder, ColumnRef, QuoteTarget};
use crate::value::Value;

/// The right-hand side of an equality: a bind value or another column.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(Value),
    Column(ColumnRef),
}

impl<T: Into<Value>> std::convert::From<T> for Operand {
    fn from(v: T) -> Self {
        Operand::Value(v.into())
    }
}

/// Expression node for building conditions.
#[derive(Debug, Clone)]
pub enum Expr {
    /// All conditions must hold.
    And(Vec<Expr>),

    /// At least one condition must hold.
    Or(Vec<Expr>),

    /// Negate the inner expression.
    Not(Box<Expr>),

    /// `column = rhs`; a `Null` value renders `IS NULL`.
    Eq { column: ColumnRef, value: Operand },

    /// `column <> rhs`; a `Null` value renders `IS NOT NULL`.
    Neq { column: ColumnRef, value: Operand },

    /// `column OP value` for `>`, `>=`, `<`, `<=`, `LIKE`.
    Cmp {
        column: ColumnRef,
        op: &'static str,
        value: Value,
    },

    /// `column IN (…)`. An empty list renders nothing; the surrounding
    /// conjunction skips it.
    In {
        column: ColumnRef,
        values: Vec<Value>,
    },

    /// `column BETWEEN from AND to`.
    Between {
        column: ColumnRef,
        from: Value,
        to: Value,
    },

    /// Raw SQL with `?` placeholders bound positionally.
    Raw { sql: String, vars: Vec<Value> },

    /// SQL with `@name` placeholders bound from a name→value map.
    Named {
        sql: String,
        vars: Vec<(String, Value)>,
    },

    /// A pre-rendered sub-select, spliced in parentheses; its `?`
    /// placeholders are renumbered into the parent statement.
    Subquery { sql: String, vars: Vec<Value> },
}

impl Expr {
    pub fn eq(column: impl Into<ColumnRef>, value: impl Into<Operand>) -> Self {
        Expr::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn neq(column: impl Into<ColumnRef>, value: impl Into<Operand>) -> Self {
        Expr::Neq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn gt(column: impl Into<ColumnRef>, value: impl Into<Value>) -> Self {
        Expr::Cmp {
            column: column.into(),
            op: ">",
            value: value.into(),
        }
    }

    pub fn gte(column: impl Into<ColumnRef>, value: impl Into<Value>) -> Self {
        Expr::Cmp {
            column: column.into(),
            op: ">=",
            value: value.into(),
        }
    }

    pub fn lt(column: impl Into<ColumnRef>, value: impl Into<Value>) -> Self {
        Expr::Cmp {
            column: column.into(),
            op: "<",
            value: value.into(),
        }
    }

    pub fn lte(column: impl Into<ColumnRef>, value: impl Into<Value>) -> Self {
        Expr::Cmp {
            column: column.into(),
            op: "<=",
            value: value.into(),
        }
    }

    pub fn like(column: impl Into<ColumnRef>, pattern: impl Into<Value>) -> Self {
        Expr::Cmp {
            column: column.into(),
            op: "LIKE",
            value: pattern.into(),
        }
    }

    pub fn in_list(column: impl Into<ColumnRef>, values: Vec<Value>) -> Self {
        Expr::In {
            column: column.into(),
            values,
        }
    }

    pub fn between(
        column: impl Into<ColumnRef>,
        from: impl Into<Value>,
        to: impl Into<Value>,
    ) -> Self {
        Expr::Between {
            column: column.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn and(exprs: Vec<Expr>) -> Self {
        Expr::And(exprs)
    }

    pub fn or(exprs: Vec<Expr>) -> Self {
        Expr::Or(exprs)
    }

    pub fn not(expr: Expr) -> Self {
        Expr::Not(Box::new(expr))
    }

    /// Raw SQL without parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw {
            sql: sql.into(),
            vars: Vec::new(),
        }
    }

    /// Raw SQL with `?` placeholders.
    pub fn template(sql: impl Into<String>, vars: Vec<Value>) -> Self {
        Expr::Raw {
            sql: sql.into(),
            vars,
        }
    }

    /// SQL with `@name` placeholders.
    pub fn named(sql: impl Into<String>, vars: Vec<(String, Value)>) -> Self {
        Expr::Named {
            sql: sql.into(),
            vars,
        }
    }

    /// Whether this expression renders nothing (empty groups, empty IN).
    pub fn is_empty(&self) -> bool {
        match self {
            Expr::And(exprs) | Expr::Or(exprs) => {
                exprs.is_empty() || exprs.iter().all(Expr::is_empty)
            }
            Expr::Not(inner) => inner.is_empty(),
            Expr::In { values, .. } => values.is_empty(),
            Expr::Raw { sql, .. } | Expr::Named { sql, .. } | Expr::Subquery { sql, .. } => {
                sql.is_empty()
            }
            _ => false,
        }
    }

    pub(crate) fn render(&self, builder: &mut dyn Builder) {
        match self {
            Expr::And(exprs) => build_junction(builder, exprs, " AND "),
            Expr::Or(exprs) => build_junction(builder, exprs, " OR "),
            Expr::Not(inner) => match &**inner {
                Expr::Eq { column, value } => Expr::Neq {
                    column: column.clone(),
                    value: value.clone(),
                }
                .render(builder),
                Expr::In { column, values } if !values.is_empty() => {
                    builder.write_quoted(&QuoteTarget::Column(column.clone()));
                    builder.write_str(" NOT IN (");
                    add_vars_separated(builder, values);
                    builder.write_byte(')');
                }
                other => {
                    if other.is_empty() {
                        return;
                    }
                    builder.write_str("NOT (");
                    other.render(builder);
                    builder.write_byte(')');
                }
            },
            Expr::Eq { column, value } => match value {
                Operand::Value(Value::Null) => {
                    builder.write_quoted(&QuoteTarget::Column(column.clone()));
                    builder.write_str(" IS NULL");
                }
                Operand::Value(v) => {
                    builder.write_quoted(&QuoteTarget::Column(column.clone()));
                    builder.write_str(" = ");
                    builder.add_var(std::slice::from_ref(v));
                }
                Operand::Column(rhs) => {
                    builder.write_quoted(&QuoteTarget::Column(column.clone()));
                    builder.write_str(" = ");
                    builder.write_quoted(&QuoteTarget::Column(rhs.clone()));
                }
            },
            Expr::Neq { column, value } => match value {
                Operand::Value(Value::Null) => {
                    builder.write_quoted(&QuoteTarget::Column(column.clone()));
                    builder.write_str(" IS NOT NULL");
                }
                Operand::Value(v) => {
                    builder.write_quoted(&QuoteTarget::Column(column.clone()));
                    builder.write_str(" <> ");
                    builder.add_var(std::slice::from_ref(v));
                }
                Operand::Column(rhs) => {
                    builder.write_quoted(&QuoteTarget::Column(column.clone()));
                    builder.write_str(" <> ");
                    builder.write_quoted(&QuoteTarget::Column(rhs.clone()));
                }
            },
            Expr::Cmp { column, op, value } => {
                builder.write_quoted(&QuoteTarget::Column(column.clone()));
                builder.write_byte(' ');
                builder.write_str(op);
                builder.write_byte(' ');
                builder.add_var(std::slice::from_ref(value));
            }
            Expr::In { column, values } => {
                if values.is_empty() {
                    return;
                }
                builder.write_quoted(&QuoteTarget::Column(column.clone()));
                builder.write_str(" IN (");
                add_vars_separated(builder, values);
                builder.write_byte(')');
            }
            Expr::Between { column, from, to } => {
                builder.write_quoted(&QuoteTarget::Column(column.clone()));
                builder.write_str(" BETWEEN ");
                builder.add_var(std::slice::from_ref(from));
                builder.write_str(" AND ");
                builder.add_var(std::slice::from_ref(to));
            }
            Expr::Raw { sql, vars } => splice_template(builder, sql, vars),
            Expr::Named { sql, vars } => build_named(builder, sql, vars),
            Expr::Subquery { sql, vars } => {
                builder.write_byte('(');
                splice_template(builder, sql, vars);
                builder.write_byte(')');
            }
        }
    }
}

impl_expression_delegate!(Expr);

/// Join non-empty children with `sep`, parenthesizing children of the
/// opposite junction so precedence survives flattening.
fn build_junction(builder: &mut dyn Builder, exprs: &[Expr], sep: &str) {
    let mut first = true;
    for expr in exprs.iter().filter(|e| !e.is_empty()) {
        if !first {
            builder.write_str(sep);
        }
        first = false;

        let needs_parens = match (sep, expr) {
            (" AND ", Expr::Or(_)) => true,
            (" OR ", Expr::And(_)) => true,
            _ => false,
        };
        if needs_parens {
            builder.write_byte('(');
            expr.render(builder);
            builder.write_byte(')');
        } else {
            expr.render(builder);
        }
    }
}

fn add_vars_separated(builder: &mut dyn Builder, values: &[Value]) {
    for (idx, value) in values.iter().enumerate() {
        if idx > 0 {
            builder.write_byte(',');
        }
        builder.add_var(std::slice::from_ref(value));
    }
}

/// Replace each `?` with a dialect placeholder, binding the next value.
/// A `?` beyond the value list is written through verbatim.
fn splice_template(builder: &mut dyn Builder, sql: &str, vars: &[Value]) {
    let mut next = 0usize;
    for ch in sql.chars() {
        if ch == '?' && next < vars.len() {
            builder.add_var(std::slice::from_ref(&vars[next]));
            next += 1;
        } else {
            builder.write_byte(ch);
        }
    }
}

/// Replace `@name` tokens with dialect placeholders from the map. Unknown
/// names are written through verbatim.
fn build_named(builder: &mut dyn Builder, sql: &str, vars: &[(String, Value)]) {
    let mut chars = sql.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '@' {
            builder.write_byte(ch);
            continue;
        }
        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c == '_' || c.is_ascii_alphanumeric() {
                name.push(c);
                chars.next();
            } else {
                break;
            }
        }
        match vars.iter().find(|(n, _)| *n == name) {
            Some((_, value)) => builder.add_var(std::slice::from_ref(value)),
            None => {
                builder.write_byte('@');
                builder.write_str(&name);
            }
        }
    }
}
