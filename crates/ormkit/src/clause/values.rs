//! INSERT column/value tuples.

use crate::clause::{impl_expression_delegate, Builder, Clause, ClausePart, ColumnRef, QuoteTarget};
use crate::value::Value;

/// The VALUES fragment: the column list followed by one parenthesized
/// tuple per row. With no columns it renders `DEFAULT VALUES`.
#[derive(Debug, Clone, Default)]
pub struct Values {
    pub columns: Vec<ColumnRef>,
    pub values: Vec<Vec<Value>>,
}

impl Values {
    pub(crate) fn render(&self, builder: &mut dyn Builder) {
        if self.columns.is_empty() {
            builder.write_str("DEFAULT VALUES");
            return;
        }

        builder.write_byte('(');
        for (idx, column) in self.columns.iter().enumerate() {
            if idx > 0 {
                builder.write_byte(',');
            }
            builder.write_quoted(&QuoteTarget::Column(column.clone()));
        }
        builder.write_byte(')');

        builder.write_str(" VALUES ");

        for (idx, row) in self.values.iter().enumerate() {
            if idx > 0 {
                builder.write_byte(',');
            }
            builder.write_byte('(');
            for (vidx, value) in row.iter().enumerate() {
                if vidx > 0 {
                    builder.write_byte(',');
                }
                builder.add_var(std::slice::from_ref(value));
            }
            builder.write_byte(')');
        }
    }
}

impl_expression_delegate!(Values);

impl ClausePart for Values {
    fn name(&self) -> &'static str {
        "VALUES"
    }

    fn merge(self, clause: &mut Clause) {
        // The fragment renders its own VALUES keyword; later installs replace.
        clause.name = "";
        clause.expression = Some(Box::new(self));
    }
}
