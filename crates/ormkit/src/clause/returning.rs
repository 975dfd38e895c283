//! RETURNING.

use crate::clause::{impl_expression_delegate, Builder, Clause, ClausePart, ColumnRef, QuoteTarget};

/// The optional trailing RETURNING fragment. An empty column list renders
/// `*`. Its presence switches execution from the exec path to the query
/// path so returned rows can be scanned.
#[derive(Debug, Clone, Default)]
pub struct Returning {
    pub columns: Vec<ColumnRef>,
}

impl Returning {
    pub(crate) fn render(&self, builder: &mut dyn Builder) {
        if self.columns.is_empty() {
            builder.write_byte('*');
            return;
        }
        for (idx, column) in self.columns.iter().enumerate() {
            if idx > 0 {
                builder.write_byte(',');
            }
            builder.write_quoted(&QuoteTarget::Column(column.clone()));
        }
    }
}

impl_expression_delegate!(Returning);

impl ClausePart for Returning {
    fn name(&self) -> &'static str {
        "RETURNING"
    }

    fn merge(self, clause: &mut Clause) {
        if let Some(existing) = clause.expression.take() {
            if let Some(prior) = existing.as_any().downcast_ref::<Returning>() {
                let mut columns = prior.columns.clone();
                columns.extend(self.columns);
                clause.expression = Some(Box::new(Returning { columns }));
                return;
            }
        }
        clause.expression = Some(Box::new(self));
    }
}
