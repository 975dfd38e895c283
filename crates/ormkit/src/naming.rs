//! Identifier naming strategy.
//!
//! Resolves record type names to table names and field names to column
//! names. The default maps `UserProfile` to `user_profiles` and
//! `CompanyID` to `company_id`; a table prefix and a singular-table mode
//! can be configured.

use heck::ToSnakeCase;

/// Naming policy applied while parsing schemas.
#[derive(Debug, Clone, Default)]
pub struct NamingStrategy {
    /// Prefix prepended to every resolved table name (e.g. `"t_"`).
    pub table_prefix: String,
    /// When set, table names are not pluralized.
    pub singular_table: bool,
}

impl NamingStrategy {
    /// Resolve a record type name to its table name.
    pub fn table_name(&self, type_name: &str) -> String {
        let snake = type_name.to_snake_case();
        if self.singular_table {
            format!("{}{}", self.table_prefix, snake)
        } else {
            format!("{}{}", self.table_prefix, pluralize(&snake))
        }
    }

    /// Resolve a record field name to its column name.
    pub fn column_name(&self, _table: &str, field: &str) -> String {
        field.to_snake_case()
    }

    /// Resolve the join table name for a many-to-many relationship when the
    /// record does not name one explicitly.
    pub fn join_table_name(&self, owner_table: &str, field: &str) -> String {
        format!("{}_{}", owner_table, field.to_snake_case())
    }

    /// Resolve the conventional foreign-key column for a relationship,
    /// e.g. (`company`, `id`) → `company_id`.
    pub fn foreign_key_name(&self, relation: &str, primary: &str) -> String {
        format!("{}_{}", relation.to_snake_case(), primary.to_snake_case())
    }
}

fn pluralize(word: &str) -> String {
    if word.ends_with('s')
        || word.ends_with('x')
        || word.ends_with('z')
        || word.ends_with("ch")
        || word.ends_with("sh")
    {
        format!("{word}es")
    } else if let Some(stem) = word.strip_suffix('y') {
        match stem.chars().last() {
            Some(c) if !matches!(c, 'a' | 'e' | 'i' | 'o' | 'u') => format!("{stem}ies"),
            _ => format!("{word}s"),
        }
    } else {
        format!("{word}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_names() {
        let n = NamingStrategy::default();
        assert_eq!(n.table_name("User"), "users");
        assert_eq!(n.table_name("UserProfile"), "user_profiles");
        assert_eq!(n.table_name("Company"), "companies");
        assert_eq!(n.table_name("Box"), "boxes");
        assert_eq!(n.table_name("Day"), "days");
    }

    #[test]
    fn prefix_and_singular() {
        let n = NamingStrategy {
            table_prefix: "t_".into(),
            singular_table: true,
        };
        assert_eq!(n.table_name("User"), "t_user");
    }

    #[test]
    fn column_and_foreign_key_names() {
        let n = NamingStrategy::default();
        assert_eq!(n.column_name("users", "createdAt"), "created_at");
        assert_eq!(n.foreign_key_name("company", "id"), "company_id");
    }

    #[test]
    fn join_table_name() {
        let n = NamingStrategy::default();
        assert_eq!(n.join_table_name("users", "languages"), "users_languages");
    }
}
