//! Preloading: one follow-up query per relationship that populates the
//! relationship field on already-fetched parent records.

use crate::callbacks::{ExecCtx, HandlerFuture};
use crate::clause::{
    primary_column, ColumnRef, Expr, OrderBy, OrderByColumn, Where, CURRENT_TABLE,
};
use crate::error::{OrmError, OrmResult};
use crate::model::Entity;
use crate::pool::Rows;
use crate::schema::{RelationKind, Relationship};
use crate::statement::Statement;
use crate::value::Value;
use std::sync::Arc;

pub(super) fn preload(ctx: &mut ExecCtx) -> HandlerFuture<'_> {
    Box::pin(async move {
        if !ctx.ok() || ctx.stmt.preloads.is_empty() || ctx.config.dry_run {
            return;
        }
        let Some(schema) = ctx.stmt.schema.clone() else {
            ctx.add_error(OrmError::ModelValueRequired);
            return;
        };

        // BTreeMap iteration gives the sorted preload order.
        let names: Vec<(String, Vec<Value>)> = ctx
            .stmt
            .preloads
            .iter()
            .map(|(name, conds)| (name.clone(), conds.clone()))
            .collect();

        for (name, conds) in names {
            let relationship = match schema.relationship(&name) {
                Ok(relationship) => relationship,
                Err(err) => {
                    ctx.add_error(err);
                    continue;
                }
            };
            if let Err(err) = preload_relationship(ctx, &relationship, &conds).await {
                ctx.add_error(err);
                return;
            }
        }
    })
}

async fn preload_relationship(
    ctx: &mut ExecCtx,
    relationship: &Relationship,
    conds: &[Value],
) -> OrmResult<()> {
    let target = Arc::clone(&relationship.target);
    let target_pk = match relationship.kind {
        RelationKind::ManyToMany => relationship.references[1].primary.column.clone(),
        _ => relationship.references[0].primary.column.clone(),
    };

    match relationship.kind {
        RelationKind::BelongsTo => {
            // Parents hold the foreign key; children are looked up by
            // primary key.
            let fk_column = relationship.foreign_column().to_string();
            let pk_column = relationship.references[0].primary.column.clone();
            let keys = collect_keys(ctx, &fk_column)?;
            if keys.is_empty() {
                return Ok(());
            }
            let rows = preload_query(ctx, &target, &pk_column, keys, conds).await?;
            attach_rows(ctx, &relationship.name, &fk_column, &pk_column, &rows)
        }
        RelationKind::HasOne | RelationKind::HasMany => {
            let fk_column = relationship.foreign_column().to_string();
            let pk_column = relationship.references[0].primary.column.clone();
            let keys = collect_keys(ctx, &pk_column)?;
            if keys.is_empty() {
                return Ok(());
            }
            let rows = preload_query(ctx, &target, &fk_column, keys, conds).await?;
            attach_rows(ctx, &relationship.name, &pk_column, &fk_column, &rows)
        }
        RelationKind::ManyToMany => {
            let join_table = relationship
                .join_table
                .as_ref()
                .expect("many-to-many carries a join table");
            let owner_pk = relationship.references[0].primary.column.clone();
            let keys = collect_keys(ctx, &owner_pk)?;
            if keys.is_empty() {
                return Ok(());
            }

            // First hop: join rows for the parents on hand.
            let mut join_stmt = ctx.stmt.fresh();
            join_stmt.table = Some(join_table.table.clone());
            join_stmt.add_clause(Where::new(vec![Expr::in_list(
                ColumnRef::qualified(CURRENT_TABLE, join_table.owner_key.clone()),
                keys,
            )]));
            join_stmt.build_clauses = super::QUERY_CLAUSES.to_vec();
            join_stmt.build_query_sql(None, false);
            let join_rows = join_stmt
                .executor
                .query(&join_stmt.sql, &join_stmt.vars)
                .await?;

            let pairs: Vec<(Value, Value)> = join_rows
                .iter()
                .filter_map(|row| {
                    Some((
                        row.get(&join_table.owner_key)?.clone(),
                        row.get(&join_table.target_key)?.clone(),
                    ))
                })
                .collect();
            let mut target_keys: Vec<Value> = Vec::new();
            for (_, target_key) in &pairs {
                if !target_keys.contains(target_key) {
                    target_keys.push(target_key.clone());
                }
            }
            if target_keys.is_empty() {
                return Ok(());
            }

            // Second hop: the target records themselves.
            let rows = preload_query(ctx, &target, &target_pk, target_keys, conds).await?;

            let relation_name = relationship.name.clone();
            ctx.dest.for_each_entity(&mut |entity: &mut dyn Entity| {
                let Some(parent_key) = entity.get(&owner_pk) else {
                    return Ok(());
                };
                let linked: Vec<&Value> = pairs
                    .iter()
                    .filter(|(owner, _)| *owner == parent_key)
                    .map(|(_, target)| target)
                    .collect();
                let child_rows: Vec<_> = rows
                    .iter()
                    .filter(|row| {
                        row.get(&target_pk)
                            .map(|pk| linked.iter().any(|k| *k == pk))
                            .unwrap_or(false)
                    })
                    .collect();
                entity.attach(&relation_name, &child_rows)
            })
        }
    }
}

/// Distinct, non-zero key values across the destination entities.
fn collect_keys(ctx: &mut ExecCtx, column: &str) -> OrmResult<Vec<Value>> {
    let mut keys = Vec::new();
    ctx.dest.for_each_entity(&mut |entity: &mut dyn Entity| {
        if let Some(value) = entity.get(column).filter(|v| !v.is_zero()) {
            if !keys.contains(&value) {
                keys.push(value);
            }
        }
        Ok(())
    })?;
    Ok(keys)
}

/// One batched query for the related rows, ordered by primary key so every
/// parent's children come back sorted.
async fn preload_query(
    ctx: &mut ExecCtx,
    target: &Arc<crate::schema::Schema>,
    key_column: &str,
    keys: Vec<Value>,
    conds: &[Value],
) -> OrmResult<Rows> {
    let mut stmt: Statement = ctx.stmt.fresh();
    stmt.schema = Some(Arc::clone(target));
    stmt.table = Some(target.table.clone());

    let mut exprs = vec![Expr::in_list(
        ColumnRef::qualified(CURRENT_TABLE, key_column),
        keys,
    )];
    if let Some(extra) = conds.first() {
        if let Value::Text(sql) = extra {
            exprs.push(Expr::template(sql.clone(), conds[1..].to_vec()));
        }
    }
    stmt.add_clause(Where::new(exprs));
    stmt.add_clause(OrderBy {
        columns: vec![OrderByColumn {
            column: primary_column(),
            desc: false,
        }],
        expression: None,
    });
    stmt.build_clauses = super::QUERY_CLAUSES.to_vec();
    stmt.unscoped = ctx.stmt.unscoped;
    stmt.build_query_sql(None, false);

    stmt.executor.query(&stmt.sql, &stmt.vars).await
}

/// Hand each parent the related rows whose `child_key` column matches the
/// parent's `parent_key` column.
fn attach_rows(
    ctx: &mut ExecCtx,
    relation: &str,
    parent_key: &str,
    child_key: &str,
    rows: &Rows,
) -> OrmResult<()> {
    ctx.dest.for_each_entity(&mut |entity: &mut dyn Entity| {
        let Some(key) = entity.get(parent_key).filter(|v| !v.is_zero()) else {
            return Ok(());
        };
        let child_rows: Vec<_> = rows
            .iter()
            .filter(|row| row.get(child_key) == Some(&key))
            .collect();
        entity.attach(relation, &child_rows)
    })
}
