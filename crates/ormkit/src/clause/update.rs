//! UPDATE target.

use crate::clause::{
    current_table, impl_expression_delegate, Builder, Clause, ClausePart, QuoteTarget, TableRef,
};

/// The UPDATE fragment: the target table with an optional modifier
/// (`LOW_PRIORITY`, `IGNORE`). The clause name supplies the keyword.
#[derive(Debug, Clone, Default)]
pub struct Update {
    pub table: Option<TableRef>,
    pub modifier: String,
}

impl Update {
    pub(crate) fn render(&self, builder: &mut dyn Builder) {
        if !self.modifier.is_empty() {
            builder.write_str(&self.modifier);
            builder.write_byte(' ');
        }
        let table = self.table.clone().unwrap_or_else(current_table);
        builder.write_quoted(&QuoteTarget::Table(table));
    }
}

impl_expression_delegate!(Update);

impl ClausePart for Update {
    fn name(&self) -> &'static str {
        "UPDATE"
    }

    fn merge(self, clause: &mut Clause) {
        clause.expression = Some(Box::new(self));
    }
}
