//! SELECT column list.

use crate::clause::{
    impl_expression_delegate, Builder, Clause, ClausePart, ColumnRef, Expr, Expression,
    QuoteTarget,
};

/// The SELECT fragment: a column list, a DISTINCT flag, or an explicit
/// expression that overrides the column list entirely.
#[derive(Clone, Default)]
pub struct Select {
    pub distinct: bool,
    pub columns: Vec<ColumnRef>,
    pub expression: Option<Box<dyn Expression>>,
}

impl Select {
    pub(crate) fn render(&self, builder: &mut dyn Builder) {
        if self.columns.is_empty() {
            builder.write_byte('*');
            return;
        }
        if self.distinct {
            builder.write_str("DISTINCT ");
        }
        for (idx, column) in self.columns.iter().enumerate() {
            if idx > 0 {
                builder.write_byte(',');
            }
            builder.write_quoted(&QuoteTarget::Column(column.clone()));
        }
    }
}

impl_expression_delegate!(Select);

impl ClausePart for Select {
    fn name(&self) -> &'static str {
        "SELECT"
    }

    fn merge(self, clause: &mut Clause) {
        if let Some(expression) = self.expression {
            // An explicit expression wins over any column list.
            if self.distinct {
                if let Some(raw) = expression.as_any().downcast_ref::<Expr>() {
                    if let Expr::Raw { sql, vars } = raw {
                        clause.expression = Some(Box::new(Expr::Raw {
                            sql: format!("DISTINCT {sql}"),
                            vars: vars.clone(),
                        }));
                        return;
                    }
                }
            }
            clause.expression = Some(expression);
        } else {
            clause.expression = Some(Box::new(self));
        }
    }
}
