//! The mutable build context for one operation.
//!
//! A [`Statement`] accumulates clauses and bind parameters as the fluent
//! chain runs, then serializes them in the operation's declared clause
//! order. It implements the clause [`Builder`] contract backed by its SQL
//! buffer, its positional bind list, and the active dialect, and it owns
//! the query-SQL assembly: primary-key conditions, select-list
//! composition, and relationship join resolution with `Parent__Child`
//! aliasing.

use crate::clause::{
    Builder, Clause, ClausePart, ColumnRef, Expr, Expression, From, Join, JoinType, Operand,
    QuoteTarget, Select, TableRef, Where, ASSOCIATIONS, CURRENT_TABLE, PRIMARY_KEY,
};
use crate::dialect::Dialect;
use crate::error::{ormkit_warn, OrmError};
use crate::pool::Executor;
use crate::schema::{self, Descriptor, Schema};
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// A join requested through the fluent chain, resolved at build time into
/// either a relationship join or a raw join expression.
#[derive(Debug, Clone)]
pub struct JoinSpec {
    /// Relationship path (`"Company.Manager"`) or raw join SQL.
    pub name: String,
    pub join_type: JoinType,
    pub vars: Vec<Value>,
}

/// The per-operation build context.
#[derive(Clone)]
pub struct Statement {
    /// The current target table; wins over the schema's default table.
    pub table: Option<String>,
    pub schema: Option<Arc<Schema>>,
    pub clauses: IndexMap<&'static str, Clause>,
    /// Clause emission order for the running operation.
    pub build_clauses: Vec<&'static str>,
    /// Positional bind parameters backing the placeholders in `sql`.
    pub vars: Vec<Value>,
    pub sql: String,
    pub selects: Vec<String>,
    pub omits: Vec<String>,
    pub joins: Vec<JoinSpec>,
    /// Relation name → extra conditions, emitted in sorted order.
    pub preloads: BTreeMap<String, Vec<Value>>,
    pub settings: HashMap<String, Value>,
    pub distinct: bool,
    pub unscoped: bool,
    pub skip_hooks: bool,
    /// Raw mode: pre-rendered SQL bypassing clause assembly.
    pub raw_sql: Option<(String, Vec<Value>)>,
    pub executor: Executor,
    pub dialect: Arc<dyn Dialect>,
    /// Errors recorded while building; execution short-circuits on any.
    pub errors: Vec<OrmError>,
}

impl Statement {
    pub fn new(executor: Executor, dialect: Arc<dyn Dialect>) -> Self {
        Statement {
            table: None,
            schema: None,
            clauses: IndexMap::new(),
            build_clauses: Vec::new(),
            vars: Vec::new(),
            sql: String::new(),
            selects: Vec::new(),
            omits: Vec::new(),
            joins: Vec::new(),
            preloads: BTreeMap::new(),
            settings: HashMap::new(),
            distinct: false,
            unscoped: false,
            skip_hooks: false,
            raw_sql: None,
            executor,
            dialect,
            errors: Vec::new(),
        }
    }

    /// A fresh statement sharing this one's executor and dialect.
    pub fn fresh(&self) -> Self {
        Statement::new(self.executor.clone(), Arc::clone(&self.dialect))
    }

    /// Resolve and install the schema for a record descriptor.
    pub fn parse(&mut self, descriptor: &'static Descriptor, naming: &crate::naming::NamingStrategy) {
        let schema = schema::parse(descriptor, naming);
        if self.table.is_none() {
            self.table = Some(schema.table.clone());
        }
        self.schema = Some(schema);
    }

    /// The table name the [`CURRENT_TABLE`] sentinel resolves to.
    pub fn current_table_name(&self) -> Option<&str> {
        self.table
            .as_deref()
            .or_else(|| self.schema.as_ref().map(|s| s.table.as_str()))
    }

    /// Install a clause, merging with any prior clause of the same name.
    /// Merging is the clause's responsibility; the statement never
    /// inspects expression internals.
    pub fn add_clause<C: ClausePart>(&mut self, part: C) {
        let name = part.name();
        let clause = self.clauses.entry(name).or_insert_with(|| Clause {
            name,
            ..Default::default()
        });
        part.merge(clause);
    }

    /// Install a clause only when the name is not taken yet.
    pub fn add_clause_if_not_exists<C: ClausePart>(&mut self, part: C) {
        if !self.clauses.contains_key(part.name()) {
            self.add_clause(part);
        }
    }

    pub fn has_clause(&self, name: &str) -> bool {
        self.clauses.contains_key(name)
    }

    /// Whether a WHERE clause with at least one non-empty conjunct exists.
    pub fn has_conditions(&self) -> bool {
        match self.clauses.get("WHERE").and_then(|c| c.expression.as_ref()) {
            None => false,
            Some(expression) => match expression.as_any().downcast_ref::<Where>() {
                Some(where_clause) => !where_clause.is_empty(),
                None => true,
            },
        }
    }

    /// Emit the named clauses in order, skipping missing names. Each
    /// present clause is separated from the previous by a single space.
    pub fn build(&mut self, names: &[&'static str]) {
        let mut first_written = false;
        for name in names {
            let Some(clause) = self.clauses.get(name).cloned() else {
                continue;
            };
            if clause.expression.is_none() && clause.builder.is_none() {
                continue;
            }
            if first_written {
                self.write_byte(' ');
            }
            first_written = true;
            clause.build(self);
        }
    }

    fn resolve_column_name(&self, name: &str) -> String {
        if name == PRIMARY_KEY {
            return self
                .schema
                .as_ref()
                .and_then(|s| s.prioritized_primary_field())
                .map(|f| f.db_name.clone())
                .unwrap_or_else(|| {
                    ormkit_warn("primary-key sentinel used without a primary field; assuming id");
                    "id".to_string()
                });
        }
        name.to_string()
    }

    fn resolve_table_name(&self, name: &str) -> String {
        if name == CURRENT_TABLE {
            return self.current_table_name().unwrap_or_default().to_string();
        }
        name.to_string()
    }

    fn quote_ident(&self, out: &mut String, ident: &str) {
        // A dotted identifier splits at the last dot; each side is quoted
        // independently.
        if let Some((table, column)) = ident.rsplit_once('.') {
            self.dialect.quote_to(out, table);
            out.push('.');
            self.dialect.quote_to(out, column);
        } else {
            self.dialect.quote_to(out, ident);
        }
    }

    /// Render a quote target into a standalone string.
    pub fn quote(&self, target: &QuoteTarget) -> String {
        let mut out = String::new();
        self.quote_target_to(&mut out, target);
        out
    }

    fn quote_target_to(&self, out: &mut String, target: &QuoteTarget) {
        match target {
            QuoteTarget::Plain(s) => self.quote_ident(out, s),
            QuoteTarget::Column(c) => {
                if c.raw {
                    out.push_str(&c.name);
                    return;
                }
                if !c.table.is_empty() {
                    let table = self.resolve_table_name(&c.table);
                    self.dialect.quote_to(out, &table);
                    out.push('.');
                }
                let name = self.resolve_column_name(&c.name);
                if name == "*" {
                    out.push('*');
                } else {
                    self.dialect.quote_to(out, &name);
                }
                if !c.alias.is_empty() {
                    out.push_str(" AS ");
                    self.dialect.quote_to(out, &c.alias);
                }
            }
            QuoteTarget::Table(t) => {
                if t.raw {
                    out.push_str(&t.name);
                    return;
                }
                let name = self.resolve_table_name(&t.name);
                self.dialect.quote_to(out, &name);
                if !t.alias.is_empty() {
                    out.push(' ');
                    self.dialect.quote_to(out, &t.alias);
                }
            }
        }
    }

    // ── Query SQL assembly ──────────────────────────────────────────────────

    /// Compose SELECT/FROM/joins per the model and the fluent accumulators,
    /// then emit every clause in `build_clauses` order. `dest` is the
    /// destination record type when it differs from the model.
    pub fn build_query_sql(&mut self, dest: Option<&'static Descriptor>, query_fields: bool) {
        if !self.sql.is_empty() {
            return;
        }

        if let Some(schema) = self.schema.clone() {
            if !self.unscoped && !schema.query_clauses.is_empty() {
                self.add_clause(Where::new(schema.query_clauses.clone()));
            }
        }

        let mut select = Select {
            distinct: self.distinct,
            ..Default::default()
        };

        if !self.selects.is_empty() {
            for name in &self.selects {
                if name == ASSOCIATIONS {
                    continue;
                }
                let column = match self.schema.as_ref().and_then(|s| s.look_up_field(name)) {
                    Some(field) => ColumnRef::new(field.db_name.clone()),
                    None => ColumnRef::raw(name.clone()),
                };
                select.columns.push(column);
            }
        } else if let Some(schema) = self.schema.clone() {
            if !self.omits.is_empty() {
                let omitted: HashSet<String> = self
                    .omits
                    .iter()
                    .map(|name| {
                        schema
                            .look_up_field(name)
                            .map(|f| f.db_name.clone())
                            .unwrap_or_else(|| name.clone())
                    })
                    .collect();
                for db_name in schema.db_names() {
                    if !omitted.contains(db_name) {
                        select
                            .columns
                            .push(ColumnRef::qualified(CURRENT_TABLE, db_name));
                    }
                }
            } else {
                // Smaller-struct optimization: a destination type narrower
                // than the model selects only its own columns.
                let dest_schema = dest.map(|d| schema::parse(d, &schema.naming));
                match dest_schema {
                    Some(dest_schema) if !Arc::ptr_eq(&dest_schema, &schema) => {
                        for db_name in dest_schema.db_names() {
                            select
                                .columns
                                .push(ColumnRef::qualified(CURRENT_TABLE, db_name));
                        }
                    }
                    _ if query_fields => {
                        for db_name in schema.db_names() {
                            select
                                .columns
                                .push(ColumnRef::qualified(CURRENT_TABLE, db_name));
                        }
                    }
                    _ => {}
                }
            }
        }

        let has_joins = !self.joins.is_empty()
            || self
                .clauses
                .get("FROM")
                .and_then(|c| c.expression.as_ref())
                .and_then(|e| e.as_any().downcast_ref::<From>())
                .is_some_and(|f| !f.joins.is_empty());

        if has_joins {
            // With joins, an unqualified `*` would be ambiguous; qualify
            // every model column with the current table.
            if select.columns.is_empty() {
                if let Some(schema) = self.schema.clone() {
                    for db_name in schema.db_names() {
                        select
                            .columns
                            .push(ColumnRef::qualified(CURRENT_TABLE, db_name));
                    }
                }
            }
            self.resolve_joins(&mut select);
        } else {
            self.add_clause_if_not_exists(From::default());
        }

        self.add_clause_if_not_exists(select);

        let order = std::mem::take(&mut self.build_clauses);
        self.build(&order);
        self.build_clauses = order;
    }

    /// Turn the accumulated [`JoinSpec`]s into FROM-clause joins.
    /// Relationship paths resolve through the schema graph and generate
    /// `Parent__Child` aliases; anything else passes through as raw join
    /// SQL. Joins against already-joined relation paths deduplicate by
    /// nested alias.
    fn resolve_joins(&mut self, select: &mut Select) {
        let mut from = self
            .clauses
            .get("FROM")
            .and_then(|c| c.expression.as_ref())
            .and_then(|e| e.as_any().downcast_ref::<From>())
            .cloned()
            .unwrap_or_default();

        let mut seen: HashSet<String> = HashSet::new();
        let specs = std::mem::take(&mut self.joins);

        for spec in specs {
            let chain = self.relation_chain(&spec.name);
            match chain {
                Some(relationships) => {
                    let mut parent = CURRENT_TABLE.to_string();
                    for relationship in relationships {
                        let alias = if parent == CURRENT_TABLE {
                            relationship.name.clone()
                        } else {
                            nested_alias(&parent, &relationship.name)
                        };
                        if seen.insert(alias.clone()) {
                            for db_name in relationship.target.db_names() {
                                select.columns.push(
                                    ColumnRef::qualified(alias.clone(), db_name)
                                        .with_alias(nested_alias(&alias, db_name)),
                                );
                            }

                            let mut on = Vec::new();
                            for reference in &relationship.references {
                                let expr = if reference.own_primary_key {
                                    Expr::eq(
                                        ColumnRef::qualified(
                                            parent.clone(),
                                            reference.primary.column.clone(),
                                        ),
                                        Operand::Column(ColumnRef::qualified(
                                            alias.clone(),
                                            reference.foreign.column.clone(),
                                        )),
                                    )
                                } else if let Some(literal) = &reference.primary_value {
                                    Expr::eq(
                                        ColumnRef::qualified(
                                            alias.clone(),
                                            reference.foreign.column.clone(),
                                        ),
                                        Operand::Value(Value::Text(literal.clone())),
                                    )
                                } else {
                                    Expr::eq(
                                        ColumnRef::qualified(
                                            parent.clone(),
                                            reference.foreign.column.clone(),
                                        ),
                                        Operand::Column(ColumnRef::qualified(
                                            alias.clone(),
                                            reference.primary.column.clone(),
                                        )),
                                    )
                                };
                                on.push(expr);
                            }

                            from.joins.push(Join {
                                join_type: spec.join_type,
                                table: TableRef::aliased(
                                    relationship.target.table.clone(),
                                    alias.clone(),
                                ),
                                on: Where::new(on),
                                ..Default::default()
                            });
                        }
                        parent = alias;
                    }
                }
                None => {
                    from.joins.push(Join {
                        expression: Some(Box::new(Expr::template(
                            spec.name.clone(),
                            spec.vars.clone(),
                        )) as Box<dyn Expression>),
                        ..Default::default()
                    });
                }
            }
        }

        self.add_clause(from);
    }

    /// Resolve a dotted relationship path (`"Company.Manager"`) through the
    /// schema graph. An incomplete match means raw join SQL.
    fn relation_chain(&self, path: &str) -> Option<Vec<crate::schema::Relationship>> {
        let mut current = self.schema.clone()?;
        let mut chain = Vec::new();
        for name in path.split('.') {
            let relationship = current.relationship(name).ok()?;
            let target = Arc::clone(&relationship.target);
            chain.push(relationship);
            current = target;
        }
        Some(chain)
    }
}

/// Compose a nested join alias (`Parent__Child`).
pub fn nested_alias(parent: &str, child: &str) -> String {
    format!("{parent}__{child}")
}

impl crate::clause::Builder for Statement {
    fn write_str(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    fn write_byte(&mut self, b: char) {
        self.sql.push(b);
    }

    fn write_quoted(&mut self, target: &QuoteTarget) {
        let mut out = String::new();
        self.quote_target_to(&mut out, target);
        self.sql.push_str(&out);
    }

    fn add_var(&mut self, values: &[Value]) {
        for value in values {
            self.vars.push(value.clone());
            let position = self.vars.len();
            let mut out = String::new();
            self.dialect.bind_var_to(&mut out, position);
            self.sql.push_str(&out);
        }
    }

    fn add_error(&mut self, err: OrmError) {
        self.errors.push(err);
    }
}
