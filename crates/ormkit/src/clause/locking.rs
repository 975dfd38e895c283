//! Row locking (`FOR UPDATE`, `FOR SHARE`).

use crate::clause::{impl_expression_delegate, Builder, Clause, ClausePart, QuoteTarget, TableRef};

/// The FOR fragment appended after LIMIT in query emission order.
#[derive(Debug, Clone, Default)]
pub struct Locking {
    /// `UPDATE` or `SHARE`.
    pub strength: String,
    /// Optional `OF <table>` restriction.
    pub table: Option<TableRef>,
    /// Trailing option such as `NOWAIT` or `SKIP LOCKED`.
    pub options: String,
}

impl Locking {
    pub fn update() -> Self {
        Locking {
            strength: "UPDATE".to_string(),
            ..Default::default()
        }
    }

    pub fn share() -> Self {
        Locking {
            strength: "SHARE".to_string(),
            ..Default::default()
        }
    }

    pub(crate) fn render(&self, builder: &mut dyn Builder) {
        builder.write_str(&self.strength);
        if let Some(table) = &self.table {
            builder.write_str(" OF ");
            builder.write_quoted(&QuoteTarget::Table(table.clone()));
        }
        if !self.options.is_empty() {
            builder.write_byte(' ');
            builder.write_str(&self.options);
        }
    }
}

impl_expression_delegate!(Locking);

impl ClausePart for Locking {
    fn name(&self) -> &'static str {
        "FOR"
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
    fn for_update_nowait() {
        let mut clause = Clause {
            name: "FOR",
            ..Default::default()
        };
        Locking {
            options: "NOWAIT".to_string(),
            ..Locking::update()
        }
        .merge(&mut clause);

        let mut b = TestBuilder::default();
        clause.build(&mut b);
        assert_eq!(b.sql, "FOR UPDATE NOWAIT");
    }
}
