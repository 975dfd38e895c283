//! WHERE conditions.

use crate::clause::{impl_expression_delegate, Builder, Clause, ClausePart, Expr};

/// The WHERE fragment: a conjunction of expressions.
///
/// Merging is conjunctive — adding WHERE twice AND-appends the new
/// conditions to the existing ones. OR groups and NOT are explicit
/// expressions, never nested clauses.
#[derive(Debug, Clone, Default)]
pub struct Where {
    pub exprs: Vec<Expr>,
}

impl Where {
    pub fn new(exprs: Vec<Expr>) -> Self {
        Where { exprs }
    }

    /// Whether nothing would render (all conjuncts empty).
    pub fn is_empty(&self) -> bool {
        self.exprs.iter().all(Expr::is_empty)
    }

    pub(crate) fn render(&self, builder: &mut dyn Builder) {
        let mut non_empty = self.exprs.iter().filter(|e| !e.is_empty());
        match (non_empty.next(), non_empty.next()) {
            // A lone conjunct renders bare: a top-level OR group needs no
            // parentheses.
            (Some(only), None) => only.render(builder),
            _ => Expr::And(self.exprs.clone()).render(builder),
        }
    }
}

impl_expression_delegate!(Where);

impl ClausePart for Where {
    fn name(&self) -> &'static str {
        "WHERE"
    }

    fn merge(self, clause: &mut Clause) {
        let mut exprs = match clause.expression.take() {
            Some(existing) => match existing.as_any().downcast_ref::<Where>() {
                Some(prior) => prior.exprs.clone(),
                None => {
                    clause.expression = Some(existing);
                    return;
                }
            },
            None => Vec::new(),
        };
        exprs.extend(self.exprs);
        // Conjuncts that render nothing (empty IN, empty groups) are
        // dropped; a WHERE with nothing to say never reaches the SQL.
        exprs.retain(|e| !e.is_empty());
        if !exprs.is_empty() {
            clause.expression = Some(Box::new(Where { exprs }));
        }
    }
}
