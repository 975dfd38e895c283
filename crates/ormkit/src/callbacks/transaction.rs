//! Default transaction bracket.
//!
//! Create/Update/Delete run inside a transaction unless
//! `skip_default_transaction` is set: `begin_transaction` opens one and
//! swaps it in as the statement's executor; `commit_or_rollback` resolves
//! it according to the error slot and restores the original executor.

use crate::callbacks::{ExecCtx, HandlerFuture};
use crate::error::OrmError;
use crate::pool::{Executor, TxHandle};
use std::sync::Arc;

pub(super) fn begin_transaction(ctx: &mut ExecCtx) -> HandlerFuture<'_> {
    Box::pin(async move {
        if !ctx.ok() {
            return;
        }
        // Already inside a user transaction; the bracket stays out.
        if ctx.stmt.executor.is_transaction() {
            return;
        }
        match ctx.stmt.executor.begin().await {
            Ok(tx) => {
                ctx.stmt.executor = Executor::Tx(Arc::clone(&tx));
                ctx.bracket_tx = Some(tx);
                ctx.started_transaction = true;
            }
            Err(OrmError::NotImplemented(_)) => {
                // Pool cannot open transactions; run unbracketed.
            }
            Err(err) => ctx.add_error(err),
        }
    })
}

pub(super) fn commit_or_rollback_transaction(ctx: &mut ExecCtx) -> HandlerFuture<'_> {
    Box::pin(async move {
        if !ctx.started_transaction {
            return;
        }
        let Some(tx) = ctx.bracket_tx.take() else {
            return;
        };
        let result = if ctx.ok() {
            tx.commit().await
        } else {
            tx.rollback().await
        };
        if let Err(err) = result {
            ctx.add_error(err);
        }
        ctx.started_transaction = false;
        // Return the original pool to the statement.
        ctx.stmt.executor = ctx.root_executor.clone();
    })
}
