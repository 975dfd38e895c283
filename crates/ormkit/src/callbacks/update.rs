//! Update pipeline.

use crate::callbacks::{create::fill_timestamps, Dest, ExecCtx, HandlerFuture};
use crate::clause::{Set, Update, Where};
use crate::error::OrmError;
use crate::model::Entity;
use std::time::Instant;

pub(super) fn before_update(ctx: &mut ExecCtx) -> HandlerFuture<'_> {
    Box::pin(async move {
        if !ctx.ok() || ctx.skip_hooks() {
            return;
        }
        let Some(schema) = ctx.stmt.schema.clone() else {
            return;
        };
        if !schema.hooks.before_save && !schema.hooks.before_update {
            return;
        }
        let mut hook_err = None;
        for entity in ctx.dest.entities_mut() {
            let result = if schema.hooks.before_save {
                entity.before_save()
            } else {
                Ok(())
            }
            .and_then(|_| {
                if schema.hooks.before_update {
                    entity.before_update()
                } else {
                    Ok(())
                }
            });
            if let Err(err) = result {
                hook_err = Some(err);
                break;
            }
        }
        if let Some(err) = hook_err {
            ctx.add_error(err);
        }
    })
}

pub(super) fn after_update(ctx: &mut ExecCtx) -> HandlerFuture<'_> {
    Box::pin(async move {
        if !ctx.ok() || ctx.skip_hooks() {
            return;
        }
        let Some(schema) = ctx.stmt.schema.clone() else {
            return;
        };
        if !schema.hooks.after_update && !schema.hooks.after_save {
            return;
        }
        let mut hook_err = None;
        for entity in ctx.dest.entities_mut() {
            let result = if schema.hooks.after_update {
                entity.after_update()
            } else {
                Ok(())
            }
            .and_then(|_| {
                if schema.hooks.after_save {
                    entity.after_save()
                } else {
                    Ok(())
                }
            });
            if let Err(err) = result {
                hook_err = Some(err);
                break;
            }
        }
        if let Some(err) = hook_err {
            ctx.add_error(err);
        }
    })
}

/// The main update handler: SET assignments come from an explicit SET
/// clause (the `updates` chain) or from the destination record's writable
/// columns; the WHERE comes from existing conditions plus the record's
/// primary key. An UPDATE with nothing to assign is a no-op and issues no
/// SQL; an UPDATE with no conditions is rejected unless global updates are
/// allowed.
pub(super) fn update(ctx: &mut ExecCtx) -> HandlerFuture<'_> {
    Box::pin(async move {
        if !ctx.ok() {
            return;
        }

        if let Some(schema) = ctx.stmt.schema.clone() {
            fill_timestamps(ctx, &schema, false);
            if !ctx.ok() {
                return;
            }

            if !ctx.stmt.unscoped && !schema.query_clauses.is_empty() {
                ctx.stmt.add_clause(Where::new(schema.query_clauses.clone()));
            }

            add_primary_key_conditions(ctx, &schema);

            if !ctx.stmt.has_clause("SET") {
                let assignments = entity_assignments(ctx, &schema);
                if !assignments.is_empty() {
                    ctx.stmt.add_clause(Set(assignments));
                }
            }
        }

        if !ctx.stmt.has_clause("SET") {
            // Nothing to assign: no-op, no SQL.
            return;
        }

        if !ctx.stmt.has_conditions() && !ctx.config.allow_global_update {
            ctx.add_error(OrmError::MissingWhereClause);
            return;
        }

        ctx.stmt.add_clause_if_not_exists(Update::default());
        let order = ctx.stmt.build_clauses.clone();
        ctx.stmt.build(&order);
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
            "update"
        );
    })
}

/// AND the destination records' primary keys into the WHERE clause.
pub(super) fn add_primary_key_conditions(ctx: &mut ExecCtx, schema: &crate::schema::Schema) {
    let mut conds = Vec::new();
    if let Dest::Entities(entities) = &ctx.dest {
        for entity in entities {
            for field in schema.primary_fields() {
                if let Some(value) = entity.get(&field.db_name).filter(|v| !v.is_zero()) {
                    conds.push(crate::clause::Expr::eq(
                        crate::clause::ColumnRef::qualified(
                            crate::clause::CURRENT_TABLE,
                            field.db_name.clone(),
                        ),
                        value,
                    ));
                }
            }
        }
    }
    if !conds.is_empty() {
        ctx.stmt.add_clause(Where::new(conds));
    }
}

/// Assignments derived from the destination record: every writable,
/// non-primary, non-create-stamped column.
fn entity_assignments(ctx: &mut ExecCtx, schema: &crate::schema::Schema) -> Vec<crate::clause::Assignment> {
    let mut assignments = Vec::new();
    if let Dest::Entities(entities) = &ctx.dest {
        if let Some(entity) = entities.first() {
            for field in &schema.fields {
                if !field.writable || field.primary_key || field.auto_create_time {
                    continue;
                }
                if let Some(value) = entity.get(&field.db_name) {
                    assignments.push(crate::clause::Assignment::new(
                        crate::clause::ColumnRef::new(field.db_name.clone()),
                        value,
                    ));
                }
            }
        }
    }
    assignments
}
