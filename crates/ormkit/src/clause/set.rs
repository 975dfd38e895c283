//! UPDATE assignments.

use crate::clause::{
    impl_expression_delegate, Builder, Clause, ClausePart, ColumnRef, Operand, QuoteTarget,
};
use crate::value::Value;

/// One `column = value` assignment. The right-hand side may be a bind
/// value or another column (`excluded.name` in upserts).
#[derive(Debug, Clone)]
pub struct Assignment {
    pub column: ColumnRef,
    pub value: Operand,
}

impl Assignment {
    pub fn new(column: impl Into<ColumnRef>, value: impl Into<Operand>) -> Self {
        Assignment {
            column: column.into(),
            value: value.into(),
        }
    }

    pub(crate) fn render(&self, builder: &mut dyn Builder) {
        builder.write_quoted(&QuoteTarget::Column(self.column.clone()));
        builder.write_byte('=');
        match &self.value {
            Operand::Value(v) => builder.add_var(std::slice::from_ref(v)),
            Operand::Column(c) => builder.write_quoted(&QuoteTarget::Column(c.clone())),
        }
    }
}

/// The SET fragment: comma-separated assignments; merging appends.
#[derive(Debug, Clone, Default)]
pub struct Set(pub Vec<Assignment>);

impl Set {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn render(&self, builder: &mut dyn Builder) {
        for (idx, assignment) in self.0.iter().enumerate() {
            if idx > 0 {
                builder.write_byte(',');
            }
            assignment.render(builder);
        }
    }
}

impl_expression_delegate!(Set);

impl ClausePart for Set {
    fn name(&self) -> &'static str {
        "SET"
    }

    fn merge(self, clause: &mut Clause) {
        if let Some(existing) = clause.expression.take() {
            if let Some(prior) = existing.as_any().downcast_ref::<Set>() {
                let mut assignments = prior.0.clone();
                assignments.extend(self.0);
                clause.expression = Some(Box::new(Set(assignments)));
                return;
            }
        }
        clause.expression = Some(Box::new(self));
    }
}

impl FromIterator<(String, Value)> for Set {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Set(iter
            .into_iter()
            .map(|(column, value)| Assignment::new(ColumnRef::new(column), value))
            .collect())
    }
}
