//! Delete pipeline, including the association cascade and the soft-delete
//! rewrite.

use crate::callbacks::update::add_primary_key_conditions;
use crate::callbacks::{ExecCtx, HandlerFuture};
use crate::clause::{
    Assignment, ColumnRef, Delete, Expr, From, Set, Update, Where, ASSOCIATIONS, CURRENT_TABLE,
};
use crate::error::OrmError;
use crate::model::Entity;
use crate::schema::RelationKind;
use crate::value::Value;
use std::time::Instant;

pub(super) fn before_delete(ctx: &mut ExecCtx) -> HandlerFuture<'_> {
    Box::pin(async move {
        if !ctx.ok() || ctx.skip_hooks() {
            return;
        }
        let Some(schema) = ctx.stmt.schema.clone() else {
            return;
        };
        if !schema.hooks.before_delete {
            return;
        }
        let mut hook_err = None;
        for entity in ctx.dest.entities_mut() {
            if let Err(err) = entity.before_delete() {
                hook_err = Some(err);
                break;
            }
        }
        if let Some(err) = hook_err {
            ctx.add_error(err);
        }
    })
}

pub(super) fn after_delete(ctx: &mut ExecCtx) -> HandlerFuture<'_> {
    Box::pin(async move {
        if !ctx.ok() || ctx.skip_hooks() {
            return;
        }
        let Some(schema) = ctx.stmt.schema.clone() else {
            return;
        };
        if !schema.hooks.after_delete {
            return;
        }
        let mut hook_err = None;
        for entity in ctx.dest.entities_mut() {
            if let Err(err) = entity.after_delete() {
                hook_err = Some(err);
                break;
            }
        }
        if let Some(err) = hook_err {
            ctx.add_error(err);
        }
    })
}

/// Cascade to dependent rows when the chain selected the associations
/// sentinel: delete has-one/has-many rows referencing the records being
/// deleted, and join-table rows for many-to-many.
pub(super) fn delete_before_associations(ctx: &mut ExecCtx) -> HandlerFuture<'_> {
    Box::pin(async move {
        if !ctx.ok() {
            return;
        }
        if !ctx.stmt.selects.iter().any(|s| s == ASSOCIATIONS) {
            return;
        }
        let Some(schema) = ctx.stmt.schema.clone() else {
            return;
        };

        let relation_names: Vec<String> = schema
            .relations
            .iter()
            .filter(|def| def.kind != RelationKind::BelongsTo)
            .map(|def| def.name.clone())
            .collect();

        for name in relation_names {
            let relationship = match schema.relationship(&name) {
                Ok(relationship) => relationship,
                Err(err) => {
                    ctx.add_error(err);
                    return;
                }
            };

            let owner_reference = relationship
                .references
                .iter()
                .find(|r| r.own_primary_key)
                .cloned();
            let Some(owner_reference) = owner_reference else {
                continue;
            };

            let mut parent_keys = Vec::new();
            for entity in ctx.dest.entities_mut() {
                if let Some(value) = entity
                    .get(&owner_reference.primary.column)
                    .filter(|v| !v.is_zero())
                {
                    parent_keys.push(value);
                }
            }
            if parent_keys.is_empty() {
                ctx.add_error(OrmError::PrimaryKeyRequired(format!(
                    "cascading delete of {}.{}",
                    schema.name, relationship.name
                )));
                return;
            }

            let (table, fk_column) = match (&relationship.join_table, relationship.kind) {
                (Some(join_table), RelationKind::ManyToMany) => {
                    (join_table.table.clone(), join_table.owner_key.clone())
                }
                _ => (
                    relationship.target.table.clone(),
                    owner_reference.foreign.column.clone(),
                ),
            };

            let mut stmt = ctx.stmt.fresh();
            stmt.table = Some(table);
            stmt.add_clause(Delete::default());
            stmt.add_clause(From::default());
            stmt.add_clause(Where::new(vec![Expr::in_list(
                ColumnRef::qualified(CURRENT_TABLE, fk_column),
                parent_keys,
            )]));
            stmt.build(&["DELETE", "FROM", "WHERE"]);

            if ctx.config.dry_run {
                continue;
            }
            if let Err(err) = stmt.executor.exec(&stmt.sql, &stmt.vars).await {
                ctx.add_error(err);
                return;
            }
        }
    })
}

/// The main delete handler. Soft-deletable records turn into an UPDATE of
/// the deletion stamp; everything else is a plain DELETE. Either way a
/// conditionless statement is rejected unless global updates are allowed.
pub(super) fn delete(ctx: &mut ExecCtx) -> HandlerFuture<'_> {
    Box::pin(async move {
        if !ctx.ok() {
            return;
        }

        let schema = ctx.stmt.schema.clone();
        if let Some(schema) = &schema {
            if !ctx.stmt.unscoped && !schema.query_clauses.is_empty() {
                ctx.stmt.add_clause(Where::new(schema.query_clauses.clone()));
            }
            add_primary_key_conditions(ctx, schema);
        }

        if !ctx.stmt.has_conditions() && !ctx.config.allow_global_update {
            ctx.add_error(OrmError::MissingWhereClause);
            return;
        }

        let soft_delete = schema.as_ref().and_then(|s| {
            if ctx.stmt.unscoped {
                None
            } else {
                s.soft_delete_field.map(|idx| s.fields[idx].db_name.clone())
            }
        });

        match soft_delete {
            Some(column) => {
                let stamp = Value::Timestamp((ctx.config.now_func)());
                ctx.stmt.add_clause(Set(vec![Assignment::new(
                    ColumnRef::new(column),
                    stamp,
                )]));
                ctx.stmt.add_clause_if_not_exists(Update::default());
                ctx.stmt.build(&["UPDATE", "SET", "WHERE"]);
            }
            None => {
                ctx.stmt.add_clause(Delete::default());
                ctx.stmt.add_clause_if_not_exists(From::default());
                let order = ctx.stmt.build_clauses.clone();
                ctx.stmt.build(&order);
            }
        }
        ctx.take_statement_errors();

        if ctx.config.dry_run || !ctx.ok() {
            ctx.capture_sql();
            return;
        }

        let started = Instant::now();
        match ctx.stmt.executor.exec(&ctx.stmt.sql, &ctx.stmt.vars).await {
            Ok(result) => ctx.rows_affected = result.rows_affected,
            Err(err) => ctx.add_error(err),
        }
        tracing::debug!(
            target: "ormkit",
            sql = %ctx.stmt.sql,
            rows = ctx.rows_affected,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "delete"
        );
    })
}
