//! Row and Raw pipelines: single-handler chains for arbitrary SQL.

use crate::callbacks::{ExecCtx, HandlerFuture};
use crate::error::OrmError;
use crate::scan::scan_rows;

fn take_raw_sql(ctx: &mut ExecCtx) -> Option<(String, Vec<crate::value::Value>)> {
    match ctx.stmt.raw_sql.clone() {
        Some(raw) => Some(raw),
        None => {
            ctx.add_error(OrmError::InvalidData("raw statement without SQL".into()));
            None
        }
    }
}

/// Execute raw SQL on the query path and scan the result set into the
/// destination sink.
pub(super) fn row_query(ctx: &mut ExecCtx) -> HandlerFuture<'_> {
    Box::pin(async move {
        if !ctx.ok() {
            return;
        }
        let Some((sql, vars)) = take_raw_sql(ctx) else {
            return;
        };
        ctx.stmt.sql = sql;
        ctx.stmt.vars = vars;

        if ctx.config.dry_run {
            ctx.capture_sql();
            return;
        }
        match ctx.stmt.executor.query(&ctx.stmt.sql, &ctx.stmt.vars).await {
            Ok(rows) => {
                ctx.rows_affected = scan_rows(ctx, &rows);
            }
            Err(err) => ctx.add_error(err),
        }
    })
}

/// Execute raw SQL on the exec path.
pub(super) fn raw_exec(ctx: &mut ExecCtx) -> HandlerFuture<'_> {
    Box::pin(async move {
        if !ctx.ok() {
            return;
        }
        let Some((sql, vars)) = take_raw_sql(ctx) else {
            return;
        };
        ctx.stmt.sql = sql;
        ctx.stmt.vars = vars;

        if ctx.config.dry_run {
            ctx.capture_sql();
            return;
        }
        match ctx.stmt.executor.exec(&ctx.stmt.sql, &ctx.stmt.vars).await {
            Ok(result) => {
                ctx.rows_affected = result.rows_affected;
                ctx.last_insert_id = result.last_insert_id;
            }
            Err(err) => ctx.add_error(err),
        }
    })
}
