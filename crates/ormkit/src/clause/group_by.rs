//! GROUP BY and HAVING.

use crate::clause::{
    impl_expression_delegate, Builder, Clause, ClausePart, ColumnRef, Expr, QuoteTarget,
};

/// The GROUP BY fragment, with HAVING folded in as trailing conditions.
#[derive(Debug, Clone, Default)]
pub struct GroupBy {
    pub columns: Vec<ColumnRef>,
    pub having: Vec<Expr>,
}

impl GroupBy {
    pub(crate) fn render(&self, builder: &mut dyn Builder) {
        for (idx, column) in self.columns.iter().enumerate() {
            if idx > 0 {
                builder.write_byte(',');
            }
            builder.write_quoted(&QuoteTarget::Column(column.clone()));
        }
        if self.having.iter().any(|e| !e.is_empty()) {
            builder.write_str(" HAVING ");
            Expr::And(self.having.clone()).render(builder);
        }
    }
}

impl_expression_delegate!(GroupBy);

impl ClausePart for GroupBy {
    fn name(&self) -> &'static str {
        "GROUP BY"
    }

    fn merge(self, clause: &mut Clause) {
        if let Some(existing) = clause.expression.take() {
            if let Some(prior) = existing.as_any().downcast_ref::<GroupBy>() {
                let mut merged = prior.clone();
                merged.columns.extend(self.columns);
                merged.having.extend(self.having);
                clause.expression = Some(Box::new(merged));
                return;
            }
        }
        clause.expression = Some(Box::new(self));
    }
}
