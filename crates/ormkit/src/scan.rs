//! Column-to-field mapping.
//!
//! Writes driver rows back into the operation's destination: a sink
//! (records, primitives, raw rows) or the owned entities of a write-path
//! operation. Unknown columns are ignored; a type mismatch is an error;
//! integers never widen silently. `Parent__Child` aliased columns route
//! into nested association records.

use crate::callbacks::{Dest, ExecCtx};
use crate::model::{load_row, ScanSink};
use crate::pool::Rows;

/// Scan a result set into the context's destination, returning the number
/// of rows consumed.
pub fn scan_rows(ctx: &mut ExecCtx, rows: &Rows) -> u64 {
    let mut scanned = 0u64;
    match &mut ctx.dest {
        Dest::Sink(sink) => {
            for row in rows.iter() {
                if let Err(err) = sink.accept(&row) {
                    ctx.error = Some(match ctx.error.take() {
                        Some(prev) => err.chain(prev),
                        None => err,
                    });
                    return scanned;
                }
                scanned += 1;
            }
        }
        Dest::Entities(entities) => {
            // One row per entity, in order: the reload path and the
            // RETURNING backfill path.
            for (entity, row) in entities.iter_mut().zip(rows.iter()) {
                if let Err(err) = load_row(entity.as_mut(), &row) {
                    ctx.error = Some(match ctx.error.take() {
                        Some(prev) => err.chain(prev),
                        None => err,
                    });
                    return scanned;
                }
                scanned += 1;
            }
        }
        Dest::None => {
            scanned = rows.len() as u64;
        }
    }
    scanned
}
