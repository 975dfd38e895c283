//! Create pipeline: hooks, association cascade, chunked INSERT, and
//! generated-key backfill.

use crate::callbacks::{run_operation, Dest, ExecCtx, HandlerFuture, Op};
use crate::clause::{
    Assignment, ColumnRef, Insert, OnConflict, Operand, Returning, Set, Values,
};
use crate::error::OrmError;
use crate::model::load_row;
use crate::schema::{RelationKind, Relationship, Schema};
use crate::statement::Statement;
use crate::value::Value;
use std::sync::Arc;
use std::time::Instant;

pub(super) fn before_create(ctx: &mut ExecCtx) -> HandlerFuture<'_> {
    Box::pin(async move {
        if !ctx.ok() || ctx.skip_hooks() {
            return;
        }
        let Some(schema) = ctx.stmt.schema.clone() else {
            return;
        };
        if !schema.hooks.before_save && !schema.hooks.before_create {
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
                if schema.hooks.before_create {
                    entity.before_create()
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

pub(super) fn after_create(ctx: &mut ExecCtx) -> HandlerFuture<'_> {
    Box::pin(async move {
        if !ctx.ok() || ctx.skip_hooks() {
            return;
        }
        let Some(schema) = ctx.stmt.schema.clone() else {
            return;
        };
        if !schema.hooks.after_create && !schema.hooks.after_save {
            return;
        }
        let mut hook_err = None;
        for entity in ctx.dest.entities_mut() {
            let result = if schema.hooks.after_create {
                entity.after_create()
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

/// Save belongs-to associations ahead of the owner so the owner's foreign
/// keys can point at the freshly created rows. Association save failures
/// are fail-fast: the first error stops the cascade.
pub(super) fn save_before_associations(ctx: &mut ExecCtx) -> HandlerFuture<'_> {
    Box::pin(async move {
        if !ctx.ok() {
            return;
        }
        let Some(schema) = ctx.stmt.schema.clone() else {
            return;
        };
        let relationships = resolved_relationships(ctx, &schema, RelationKind::BelongsTo);

        for relationship in relationships {
            let count = ctx.dest.entities_mut().len();
            for index in 0..count {
                let children = ctx.dest.entities_mut()[index].detach(&relationship.name);
                if children.is_empty() {
                    continue;
                }
                let children = save_associated(ctx, &relationship, children).await;
                if let Some(child) = children.first() {
                    for reference in &relationship.references {
                        if let Some(value) = child.get(&reference.primary.column) {
                            if let Err(err) = ctx.dest.entities_mut()[index]
                                .set(&reference.foreign.column, &value)
                            {
                                ctx.add_error(err);
                            }
                        }
                    }
                }
                ctx.dest.entities_mut()[index].restore(&relationship.name, children);
                if !ctx.ok() {
                    return;
                }
            }
        }
    })
}

/// Save has-one / has-many / many-to-many associations after the owner
/// exists, pointing their foreign keys back at the owner's primary key.
pub(super) fn save_after_associations(ctx: &mut ExecCtx) -> HandlerFuture<'_> {
    Box::pin(async move {
        if !ctx.ok() {
            return;
        }
        let Some(schema) = ctx.stmt.schema.clone() else {
            return;
        };

        for kind in [
            RelationKind::HasOne,
            RelationKind::HasMany,
            RelationKind::ManyToMany,
        ] {
            let relationships = resolved_relationships(ctx, &schema, kind);
            for relationship in relationships {
                let count = ctx.dest.entities_mut().len();
                for index in 0..count {
                    let mut children = ctx.dest.entities_mut()[index].detach(&relationship.name);
                    if children.is_empty() {
                        continue;
                    }

                    if kind != RelationKind::ManyToMany {
                        // Point each child's foreign key at the parent.
                        for reference in &relationship.references {
                            if !reference.own_primary_key {
                                continue;
                            }
                            let parent_value = ctx.dest.entities_mut()[index]
                                .get(&reference.primary.column)
                                .filter(|v| !v.is_zero());
                            let Some(parent_value) = parent_value else {
                                ctx.add_error(OrmError::PrimaryKeyRequired(format!(
                                    "saving {}.{}",
                                    schema.name, relationship.name
                                )));
                                return;
                            };
                            for child in children.iter_mut() {
                                if let Err(err) =
                                    child.set(&reference.foreign.column, &parent_value)
                                {
                                    ctx.add_error(err);
                                    return;
                                }
                            }
                        }
                    }

                    let children = save_associated(ctx, &relationship, children).await;
                    if ctx.ok() && kind == RelationKind::ManyToMany {
                        let join_values =
                            join_row_values(ctx, &relationship, index, &children);
                        if let Some(join_values) = join_values {
                            link_join_rows(ctx, &relationship, join_values).await;
                        }
                    }
                    ctx.dest.entities_mut()[index].restore(&relationship.name, children);
                    if !ctx.ok() {
                        return;
                    }
                }
            }
        }
    })
}

fn resolved_relationships(
    ctx: &mut ExecCtx,
    schema: &Arc<Schema>,
    kind: RelationKind,
) -> Vec<Relationship> {
    let names: Vec<String> = schema
        .relations
        .iter()
        .filter(|def| def.kind == kind)
        .map(|def| def.name.clone())
        .collect();
    let mut resolved = Vec::with_capacity(names.len());
    for name in names {
        match schema.relationship(&name) {
            Ok(relationship) => resolved.push(relationship),
            Err(err) => {
                ctx.add_error(err);
                break;
            }
        }
    }
    resolved
}

/// Run a nested create for associated records sharing this operation's
/// executor (and therefore its transaction bracket).
async fn save_associated(
    ctx: &mut ExecCtx,
    relationship: &Relationship,
    children: Vec<Box<dyn crate::model::Entity>>,
) -> Vec<Box<dyn crate::model::Entity>> {
    let mut child_stmt = ctx.stmt.fresh();
    child_stmt.schema = Some(Arc::clone(&relationship.target));
    child_stmt.table = Some(relationship.target.table.clone());
    child_stmt.skip_hooks = ctx.stmt.skip_hooks;

    let sub = run_operation(
        Arc::clone(&ctx.callbacks),
        ctx.config.clone(),
        Arc::clone(&ctx.capture),
        ctx.root_executor.clone(),
        Op::Create,
        child_stmt,
        Dest::Entities(children),
    )
    .await;

    if let Some(err) = sub.error {
        ctx.add_error(err);
    }
    match sub.dest {
        Dest::Entities(children) => children,
        _ => Vec::new(),
    }
}

/// Compute the owner/target primary-key pairs for a many-to-many join,
/// recording an error and returning `None` if either side is missing a key.
fn join_row_values(
    ctx: &mut ExecCtx,
    relationship: &Relationship,
    index: usize,
    children: &[Box<dyn crate::model::Entity>],
) -> Option<Vec<Vec<Value>>> {
    if relationship.join_table.is_none() {
        return None;
    }
    let owner_reference = relationship
        .references
        .iter()
        .find(|r| r.own_primary_key)
        .expect("many-to-many keeps an owner-side reference");
    let target_reference = relationship
        .references
        .iter()
        .find(|r| !r.own_primary_key)
        .expect("many-to-many keeps a target-side reference");

    let Some(owner_value) = ctx.dest.entities_mut()[index]
        .get(&owner_reference.primary.column)
        .filter(|v| !v.is_zero())
    else {
        ctx.add_error(OrmError::PrimaryKeyRequired(format!(
            "linking {}",
            relationship.name
        )));
        return None;
    };

    let mut values = Vec::with_capacity(children.len());
    for child in children {
        let Some(child_value) = child
            .get(&target_reference.primary.column)
            .filter(|v| !v.is_zero())
        else {
            ctx.add_error(OrmError::PrimaryKeyRequired(format!(
                "linking {}",
                relationship.name
            )));
            return None;
        };
        values.push(vec![owner_value.clone(), child_value]);
    }
    Some(values)
}

/// Insert join-table rows for a many-to-many save.
async fn link_join_rows(ctx: &mut ExecCtx, relationship: &Relationship, values: Vec<Vec<Value>>) {
    let Some(join_table) = &relationship.join_table else {
        return;
    };

    let mut stmt = ctx.stmt.fresh();
    stmt.table = Some(join_table.table.clone());
    stmt.add_clause(Insert::default());
    stmt.add_clause(Values {
        columns: vec![
            ColumnRef::new(join_table.owner_key.clone()),
            ColumnRef::new(join_table.target_key.clone()),
        ],
        values,
    });
    stmt.add_clause(OnConflict {
        do_nothing: true,
        ..Default::default()
    });
    stmt.build(&["INSERT", "VALUES", "ON CONFLICT"]);

    if ctx.config.dry_run {
        return;
    }
    if let Err(err) = stmt.executor.exec(&stmt.sql, &stmt.vars).await {
        ctx.add_error(err);
    }
}

/// The main create handler: renders INSERT/VALUES/ON CONFLICT/RETURNING,
/// executes (in chunks when `create_batch_size` applies), and backfills
/// generated primary keys.
pub(super) fn create(ctx: &mut ExecCtx) -> HandlerFuture<'_> {
    Box::pin(async move {
        if !ctx.ok() {
            return;
        }
        let Some(schema) = ctx.stmt.schema.clone() else {
            ctx.add_error(OrmError::ModelValueRequired);
            return;
        };
        let total = ctx.dest.entities_mut().len();
        if total == 0 {
            return;
        }

        fill_timestamps(ctx, &schema, true);

        let auto_pk = schema
            .prioritized_primary_field()
            .filter(|f| f.auto_increment)
            .cloned();
        // The auto-increment key joins the column list only when a caller
        // assigned it explicitly.
        let include_auto_pk = auto_pk.as_ref().is_some_and(|pk| {
            ctx.dest
                .entities_mut()
                .iter()
                .any(|e| e.get(&pk.db_name).is_some_and(|v| !v.is_zero()))
        });
        let backfill_pk = auto_pk.filter(|_| !include_auto_pk);

        let columns: Vec<String> = schema
            .fields
            .iter()
            .filter(|f| f.writable && (!f.auto_increment || include_auto_pk))
            .map(|f| f.db_name.clone())
            .collect();

        let batch = match ctx.config.create_batch_size {
            0 => total,
            size => size,
        };

        let mut total_affected = 0u64;
        let mut offset = 0usize;
        while offset < total {
            let end = usize::min(offset + batch, total);

            let values: Vec<Vec<Value>> = ctx.dest.entities_mut()[offset..end]
                .iter()
                .map(|entity| {
                    columns
                        .iter()
                        .map(|column| entity.get(column).unwrap_or(Value::Null))
                        .collect()
                })
                .collect();

            ctx.stmt.sql.clear();
            ctx.stmt.vars.clear();
            ctx.stmt.clauses.shift_remove("VALUES");

            ctx.stmt.add_clause_if_not_exists(Insert::default());
            ctx.stmt.add_clause(Values {
                columns: columns.iter().map(|c| ColumnRef::new(c.clone())).collect(),
                values,
            });
            if ctx.stmt.has_clause("ON CONFLICT") {
                resolve_on_conflict(&mut ctx.stmt, &schema);
            }
            if let Some(pk) = backfill_pk.as_ref() {
                if ctx.stmt.dialect.supports_returning() {
                    ctx.stmt.add_clause_if_not_exists(Returning {
                        columns: vec![ColumnRef::new(pk.db_name.clone())],
                    });
                }
            }

            let order = ctx.stmt.build_clauses.clone();
            ctx.stmt.build(&order);
            ctx.take_statement_errors();

            if ctx.config.dry_run || !ctx.ok() {
                ctx.capture_sql();
                return;
            }

            let started = Instant::now();
            if ctx.stmt.has_clause("RETURNING") {
                match ctx.stmt.executor.query(&ctx.stmt.sql, &ctx.stmt.vars).await {
                    Ok(rows) => {
                        total_affected += rows.len() as u64;
                        let mut scan_err = None;
                        let entities = ctx.dest.entities_mut();
                        for (entity, row) in entities[offset..end].iter_mut().zip(rows.iter()) {
                            if let Err(err) = load_row(entity.as_mut(), &row) {
                                scan_err = Some(err);
                                break;
                            }
                        }
                        if let Some(err) = scan_err {
                            ctx.add_error(err);
                            return;
                        }
                    }
                    Err(err) => {
                        ctx.add_error(err);
                        return;
                    }
                }
            } else {
                match ctx.stmt.executor.exec(&ctx.stmt.sql, &ctx.stmt.vars).await {
                    Ok(result) => {
                        total_affected += result.rows_affected;
                        ctx.last_insert_id = result.last_insert_id;
                        if let (Some(pk), Some(last_id)) =
                            (backfill_pk.as_ref(), result.last_insert_id)
                        {
                            backfill_generated_keys(ctx, &pk.db_name, last_id, offset, end);
                            if !ctx.ok() {
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        ctx.add_error(err);
                        return;
                    }
                }
            }
            tracing::debug!(
                target: "ormkit",
                sql = %ctx.stmt.sql,
                rows = end - offset,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "create"
            );

            offset = end;
        }

        ctx.rows_affected = total_affected;
    })
}

/// Assign generated keys to the chunk's entities. Drivers report either
/// the first id of the batch (assign forward) or the last (assign
/// backward).
fn backfill_generated_keys(
    ctx: &mut ExecCtx,
    pk_column: &str,
    last_insert_id: i64,
    offset: usize,
    end: usize,
) {
    let reversed = ctx.stmt.dialect.last_insert_id_reversed();
    let entities = ctx.dest.entities_mut();
    let mut id = last_insert_id;

    let mut assign = |entity: &mut Box<dyn crate::model::Entity>, id: i64| {
        entity.set(pk_column, &Value::Int(id)).map(|_| ())
    };

    let result = if reversed {
        entities[offset..end]
            .iter_mut()
            .rev()
            .try_for_each(|entity| {
                let r = assign(entity, id);
                id -= 1;
                r
            })
    } else {
        entities[offset..end].iter_mut().try_for_each(|entity| {
            let r = assign(entity, id);
            id += 1;
            r
        })
    };
    if let Err(err) = result {
        ctx.add_error(err);
    }
}

/// Fill auto-create/auto-update timestamp fields that are still zero.
pub(super) fn fill_timestamps(ctx: &mut ExecCtx, schema: &Arc<Schema>, creating: bool) {
    let now = (ctx.config.now_func)();
    let columns: Vec<String> = schema
        .fields
        .iter()
        .filter(|f| {
            if creating {
                f.auto_create_time || f.auto_update_time
            } else {
                f.auto_update_time
            }
        })
        .map(|f| f.db_name.clone())
        .collect();
    if columns.is_empty() {
        return;
    }
    let stamp = Value::Timestamp(now);
    let mut fill_err = None;
    'entities: for entity in ctx.dest.entities_mut() {
        for column in &columns {
            let unset = entity.get(column).map(|v| v.is_zero()).unwrap_or(false);
            if unset || !creating {
                if let Err(err) = entity.set(column, &stamp) {
                    fill_err = Some(err);
                    break 'entities;
                }
            }
        }
    }
    if let Some(err) = fill_err {
        ctx.add_error(err);
    }
}

/// Fill in the ON CONFLICT defaults the clause model leaves to the schema:
/// conflict columns default to the primary key; `update_all` expands to
/// every writable, non-primary, non-generated column assigned from
/// `excluded`.
fn resolve_on_conflict(stmt: &mut Statement, schema: &Schema) {
    let Some(clause) = stmt.clauses.get_mut("ON CONFLICT") else {
        return;
    };
    let Some(on_conflict) = clause
        .expression
        .as_ref()
        .and_then(|e| e.as_any().downcast_ref::<OnConflict>())
        .cloned()
    else {
        return;
    };
    let mut on_conflict = on_conflict;

    if on_conflict.columns.is_empty() && on_conflict.on_constraint.is_empty() {
        on_conflict.columns = schema
            .primary_fields()
            .map(|f| ColumnRef::new(f.db_name.clone()))
            .collect();
    }
    if on_conflict.update_all {
        on_conflict.update_all = false;
        on_conflict.do_updates = Set(schema
            .fields
            .iter()
            .filter(|f| {
                f.writable && !f.primary_key && !f.auto_increment && !f.auto_create_time
            })
            .map(|f| {
                Assignment::new(
                    ColumnRef::new(f.db_name.clone()),
                    Operand::Column(ColumnRef::qualified("excluded", f.db_name.clone())),
                )
            })
            .collect());
    }

    clause.expression = Some(Box::new(on_conflict));
}
