//! LIMIT and OFFSET.

use crate::clause::{impl_expression_delegate, Builder, Clause, ClausePart};
use crate::value::Value;

/// The LIMIT fragment. Both halves are bound as parameters; merging keeps
/// whichever half the prior fragment already set when the new one is
/// absent, so `limit(10)` and a later `offset(5)` compose.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limit {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Limit {
    pub(crate) fn render(&self, builder: &mut dyn Builder) {
        if let Some(limit) = self.limit {
            builder.write_str("LIMIT ");
            builder.add_var(&[Value::Int(limit)]);
        }
        if let Some(offset) = self.offset {
            if self.limit.is_some() {
                builder.write_byte(' ');
            }
            builder.write_str("OFFSET ");
            builder.add_var(&[Value::Int(offset)]);
        }
    }
}

impl_expression_delegate!(Limit);

impl ClausePart for Limit {
    fn name(&self) -> &'static str {
        "LIMIT"
    }

    fn merge(self, clause: &mut Clause) {
        // The fragment writes its own keywords.
        clause.name = "";
        let mut merged = self;
        if let Some(existing) = clause.expression.take() {
            if let Some(prior) = existing.as_any().downcast_ref::<Limit>() {
                if merged.limit.is_none() {
                    merged.limit = prior.limit;
                }
                if merged.offset.is_none() {
                    merged.offset = prior.offset;
                }
            }
        }
        clause.expression = Some(Box::new(merged));
    }
}
