//! DELETE keyword.

use crate::clause::{impl_expression_delegate, Builder, Clause, ClausePart};

/// The DELETE fragment. It renders its own keyword so a modifier
/// (`LOW_PRIORITY`, `QUICK`) can sit between `DELETE` and `FROM`.
#[derive(Debug, Clone, Default)]
pub struct Delete {
    pub modifier: String,
}

impl Delete {
    pub(crate) fn render(&self, builder: &mut dyn Builder) {
        builder.write_str("DELETE");
        if !self.modifier.is_empty() {
            builder.write_byte(' ');
            builder.write_str(&self.modifier);
        }
    }
}

impl_expression_delegate!(Delete);

impl ClausePart for Delete {
    fn name(&self) -> &'static str {
        "DELETE"
    }

    fn merge(self, clause: &mut Clause) {
        clause.name = "";
        clause.expression = Some(Box::new(self));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::tests::TestBuilder;

    #[test]
    fn bare_delete() {
        let mut clause = Clause {
            name: "DELETE",
            ..Default::default()
        };
        Delete::default().merge(&mut clause);

        let mut b = TestBuilder::default();
        clause.build(&mut b);
        assert_eq!(b.sql, "DELETE");
    }
}
