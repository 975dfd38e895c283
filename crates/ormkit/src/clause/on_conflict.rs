//! INSERT … ON CONFLICT.

use crate::clause::{
    impl_expression_delegate, Builder, Clause, ClausePart, ColumnRef, Expr, QuoteTarget, Set,
};

/// The ON CONFLICT fragment.
///
/// Conflict columns default to the primary key and the update set defaults
/// to every non-primary, non-auto column; both defaults are resolved by the
/// create pipeline, which knows the schema. `update_all` marks the latter
/// request until then.
#[derive(Debug, Clone, Default)]
pub struct OnConflict {
    pub columns: Vec<ColumnRef>,
    pub on_constraint: String,
    pub conflict_where: Vec<Expr>,
    pub do_nothing: bool,
    pub do_updates: Set,
    pub update_all: bool,
}

impl OnConflict {
    pub(crate) fn render(&self, builder: &mut dyn Builder) {
        if !self.on_constraint.is_empty() {
            builder.write_str("ON CONSTRAINT ");
            builder.write_str(&self.on_constraint);
            builder.write_byte(' ');
        } else if !self.columns.is_empty() {
            builder.write_byte('(');
            for (idx, column) in self.columns.iter().enumerate() {
                if idx > 0 {
                    builder.write_byte(',');
                }
                builder.write_quoted(&QuoteTarget::Column(column.clone()));
            }
            builder.write_str(") ");
        }
        if self.conflict_where.iter().any(|e| !e.is_empty()) {
            builder.write_str("WHERE ");
            Expr::And(self.conflict_where.clone()).render(builder);
            builder.write_byte(' ');
        }

        if self.do_nothing {
            builder.write_str("DO NOTHING");
        } else {
            builder.write_str("DO UPDATE SET ");
            self.do_updates.render(builder);
        }
    }
}

impl_expression_delegate!(OnConflict);

impl ClausePart for OnConflict {
    fn name(&self) -> &'static str {
        "ON CONFLICT"
    }

    fn merge(self, clause: &mut Clause) {
        clause.expression = Some(Box::new(self));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::tests::TestBuilder;
    use crate::clause::{Assignment, Operand};

    #[test]
    fn do_nothing() {
        let mut clause = Clause {
            name: "ON CONFLICT",
            ..Default::default()
        };
        OnConflict {
            do_nothing: true,
            ..Default::default()
        }
        .merge(&mut clause);

        let mut b = TestBuilder::default();
        clause.build(&mut b);
        assert_eq!(b.sql, "ON CONFLICT DO NOTHING");
    }

    #[test]
    fn do_update_with_conflict_target() {
        let mut clause = Clause {
            name: "ON CONFLICT",
            ..Default::default()
        };
        OnConflict {
            columns: vec![ColumnRef::new("id")],
            do_updates: Set(vec![Assignment::new(
                ColumnRef::new("name"),
                Operand::Column(ColumnRef::qualified("excluded", "name")),
            )]),
            ..Default::default()
        }
        .merge(&mut clause);

        let mut b = TestBuilder::default();
        clause.build(&mut b);
        assert_eq!(
            b.sql,
            "ON CONFLICT (`id`) DO UPDATE SET `name`=`excluded`.`name`"
        );
    }
}
