//! FROM tables and inline joins.

use crate::clause::{
    current_table, impl_expression_delegate, Builder, Clause, ClausePart, Expression, QuoteTarget,
    TableRef, Where,
};

/// Join type keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinType {
    Cross,
    Inner,
    #[default]
    Left,
    Right,
}

impl JoinType {
    pub fn keyword(self) -> &'static str {
        match self {
            JoinType::Cross => "CROSS",
            JoinType::Inner => "INNER",
            JoinType::Left => "LEFT",
            JoinType::Right => "RIGHT",
        }
    }
}

/// One join inside a FROM fragment.
///
/// A relationship-resolved join carries a table and an ON conjunction
/// composed from reference pairs; a raw join carries a free expression
/// with its own bind parameters.
#[derive(Clone, Default)]
pub struct Join {
    pub join_type: JoinType,
    pub table: TableRef,
    pub on: Where,
    pub using: Vec<String>,
    pub expression: Option<Box<dyn Expression>>,
}

impl Join {
    pub(crate) fn render(&self, builder: &mut dyn Builder) {
        if let Some(expression) = &self.expression {
            expression.build(builder);
            return;
        }

        builder.write_str(self.join_type.keyword());
        builder.write_str(" JOIN ");
        builder.write_quoted(&QuoteTarget::Table(self.table.clone()));

        if !self.on.is_empty() {
            builder.write_str(" ON ");
            self.on.render(builder);
        } else if !self.using.is_empty() {
            builder.write_str(" USING (");
            for (idx, column) in self.using.iter().enumerate() {
                if idx > 0 {
                    builder.write_byte(',');
                }
                builder.write_quoted(&QuoteTarget::Plain(column.clone()));
            }
            builder.write_byte(')');
        }
    }
}

impl_expression_delegate!(Join);

/// The FROM fragment: base tables plus inline joins.
#[derive(Clone, Default)]
pub struct From {
    pub tables: Vec<TableRef>,
    pub joins: Vec<Join>,
}

impl From {
    pub(crate) fn render(&self, builder: &mut dyn Builder) {
        if self.tables.is_empty() {
            builder.write_quoted(&QuoteTarget::Table(current_table()));
        } else {
            for (idx, table) in self.tables.iter().enumerate() {
                if idx > 0 {
                    builder.write_byte(',');
                }
                builder.write_quoted(&QuoteTarget::Table(table.clone()));
            }
        }
        for join in &self.joins {
            builder.write_byte(' ');
            join.render(builder);
        }
    }
}

impl_expression_delegate!(From);

impl ClausePart for From {
    fn name(&self) -> &'static str {
        "FROM"
    }

    fn merge(self, clause: &mut Clause) {
        clause.expression = Some(Box::new(self));
    }
}
