//! ORDER BY.

use crate::clause::{
    impl_expression_delegate, Builder, Clause, ClausePart, ColumnRef, Expression, QuoteTarget,
};

/// One ordering term.
#[derive(Debug, Clone, Default)]
pub struct OrderByColumn {
    pub column: ColumnRef,
    pub desc: bool,
}

/// The ORDER BY fragment. An explicit expression (raw ordering SQL)
/// overrides the column list.
#[derive(Clone, Default)]
pub struct OrderBy {
    pub columns: Vec<OrderByColumn>,
    pub expression: Option<Box<dyn Expression>>,
}

impl OrderBy {
    pub(crate) fn render(&self, builder: &mut dyn Builder) {
        if let Some(expression) = &self.expression {
            expression.build(builder);
            return;
        }
        for (idx, item) in self.columns.iter().enumerate() {
            if idx > 0 {
                builder.write_byte(',');
            }
            builder.write_quoted(&QuoteTarget::Column(item.column.clone()));
            if item.desc {
                builder.write_str(" DESC");
            }
        }
    }
}

impl_expression_delegate!(OrderBy);

impl ClausePart for OrderBy {
    fn name(&self) -> &'static str {
        "ORDER BY"
    }

    fn merge(self, clause: &mut Clause) {
        if self.expression.is_some() {
            clause.expression = Some(Box::new(self));
            return;
        }
        if let Some(existing) = clause.expression.take() {
            if let Some(prior) = existing.as_any().downcast_ref::<OrderBy>() {
                let mut merged = prior.clone();
                merged.columns.extend(self.columns);
                clause.expression = Some(Box::new(merged));
                return;
            }
        }
        clause.expression = Some(Box::new(self));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::tests::TestBuilder;
    use crate::clause::Expr;

    #[test]
    fn columns_accumulate() {
        let mut clause = Clause {
            name: "ORDER BY",
            ..Default::default()
        };
        OrderBy {
            columns: vec![OrderByColumn {
                column: ColumnRef::new("age"),
                desc: true,
            }],
            expression: None,
        }
        .merge(&mut clause);
        OrderBy {
            columns: vec![OrderByColumn {
                column: ColumnRef::new("name"),
                desc: false,
            }],
            expression: None,
        }
        .merge(&mut clause);

        let mut b = TestBuilder::default();
        clause.build(&mut b);
        assert_eq!(b.sql, "ORDER BY `age` DESC,`name`");
    }

    #[test]
    fn raw_expression_wins() {
        let mut clause = Clause {
            name: "ORDER BY",
            ..Default::default()
        };
        OrderBy {
            columns: vec![OrderByColumn {
                column: ColumnRef::new("age"),
                desc: false,
            }],
            expression: None,
        }
        .merge(&mut clause);
        OrderBy {
            columns: vec![],
            expression: Some(Box::new(Expr::raw("name ASC"))),
        }
        .merge(&mut clause);

        let mut b = TestBuilder::default();
        clause.build(&mut b);
        assert_eq!(b.sql, "ORDER BY name ASC");
    }
}
