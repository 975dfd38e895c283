//! INSERT INTO.

use crate::clause::{
    current_table, impl_expression_delegate, Builder, Clause, ClausePart, QuoteTarget, TableRef,
};

/// The INSERT fragment: target table with an optional modifier
/// (`OR IGNORE`, `LOW_PRIORITY`, …). The clause name supplies the
/// `INSERT` keyword; this fragment renders `INTO <table>`.
#[derive(Debug, Clone, Default)]
pub struct Insert {
    pub table: Option<TableRef>,
    pub modifier: String,
}

impl Insert {
    pub(crate) fn render(&self, builder: &mut dyn Builder) {
        if !self.modifier.is_empty() {
            builder.write_str(&self.modifier);
            builder.write_byte(' ');
        }
        builder.write_str("INTO ");
        let table = self.table.clone().unwrap_or_else(current_table);
        builder.write_quoted(&QuoteTarget::Table(table));
    }
}

impl_expression_delegate!(Insert);

impl ClausePart for Insert {
    fn name(&self) -> &'static str {
        "INSERT"
    }

    fn merge(self, clause: &mut Clause) {
        clause.expression = Some(Box::new(self));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::tests::TestBuilder;

    #[test]
    fn insert_into_current_table() {
        let mut clause = Clause {
            name: "INSERT",
            ..Default::default()
        };
        Insert::default().merge(&mut clause);

        let mut b = TestBuilder::default();
        clause.build(&mut b);
        assert_eq!(b.sql, "INSERT INTO `t`");
    }

    #[test]
    fn modifier_before_into() {
        let mut clause = Clause {
            name: "INSERT",
            ..Default::default()
        };
        Insert {
            modifier: "OR IGNORE".to_string(),
            ..Default::default()
        }
        .merge(&mut clause);

        let mut b = TestBuilder::default();
        clause.build(&mut b);
        assert_eq!(b.sql, "INSERT OR IGNORE INTO `t`");
    }
}
