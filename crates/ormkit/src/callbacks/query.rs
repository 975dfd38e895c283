//! Query pipeline: build, execute, scan, run AfterFind.

use crate::callbacks::{Dest, ExecCtx, HandlerFuture};
use crate::clause::{Expr, Where};
use crate::model::{Entity, ScanSink};
use crate::scan::scan_rows;
use std::time::Instant;

pub(super) fn query(ctx: &mut ExecCtx) -> HandlerFuture<'_> {
    Box::pin(async move {
        if !ctx.ok() {
            return;
        }

        build_query_sql(ctx);
        ctx.take_statement_errors();

        if ctx.config.dry_run || !ctx.ok() {
            ctx.capture_sql();
            return;
        }

        let started = Instant::now();
        let result = ctx.stmt.executor.query(&ctx.stmt.sql, &ctx.stmt.vars).await;
        tracing::debug!(
            target: "ormkit",
            sql = %ctx.stmt.sql,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query"
        );
        match result {
            Ok(rows) => {
                ctx.rows_affected = scan_rows(ctx, &rows);
            }
            Err(err) => ctx.add_error(err),
        }
    })
}

/// Assemble the SELECT statement (spec'd in the statement module), adding
/// primary-key conditions when the destination is a populated record of
/// the model type.
pub(super) fn build_query_sql(ctx: &mut ExecCtx) {
    if let Dest::Entities(entities) = &ctx.dest {
        if let (Some(schema), [entity]) = (ctx.stmt.schema.clone(), &entities[..]) {
            if entity.descriptor_ref().name == schema.name {
                let conds: Vec<Expr> = schema
                    .primary_fields()
                    .filter_map(|field| {
                        entity
                            .get(&field.db_name)
                            .filter(|value| !value.is_zero())
                            .map(|value| {
                                Expr::eq(
                                    crate::clause::ColumnRef::qualified(
                                        crate::clause::CURRENT_TABLE,
                                        field.db_name.clone(),
                                    ),
                                    value,
                                )
                            })
                    })
                    .collect();
                if !conds.is_empty() {
                    ctx.stmt.add_clause(Where::new(conds));
                }
            }
        }
    }

    let dest_descriptor = match &ctx.dest {
        Dest::Sink(sink) => sink.descriptor(),
        _ => None,
    };
    ctx.stmt
        .build_query_sql(dest_descriptor, ctx.config.query_fields);
}

pub(super) fn after_query(ctx: &mut ExecCtx) -> HandlerFuture<'_> {
    Box::pin(async move {
        if !ctx.ok() || ctx.skip_hooks() || ctx.rows_affected == 0 {
            return;
        }
        let Some(schema) = ctx.stmt.schema.clone() else {
            return;
        };
        if !schema.hooks.after_find {
            return;
        }

        let mut hook_result = Ok(());
        let run = &mut |entity: &mut dyn Entity| entity.after_find();
        match &mut ctx.dest {
            Dest::Sink(sink) => {
                hook_result = sink.for_each_entity(run);
            }
            Dest::Entities(entities) => {
                for entity in entities.iter_mut() {
                    if let Err(err) = run(entity.as_mut()) {
                        hook_result = Err(err);
                        break;
                    }
                }
            }
            Dest::None => {}
        }
        if let Err(err) = hook_result {
            ctx.add_error(err);
        }
    })
}
