//! Relationship resolution.
//!
//! Relationships are stored on schemas as raw descriptions and resolved on
//! demand: resolving walks the registry for the target schema, derives the
//! conventional key columns the description does not override, and emits
//! the reference pairs join generation and preloading consume. Resolving
//! late keeps self-referential and mutually-referential record graphs free
//! of ownership cycles.

use crate::error::{OrmError, OrmResult};
use crate::schema::{cache, RelationDef, Schema};
use heck::ToSnakeCase;
use std::sync::Arc;

/// Relationship variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    BelongsTo,
    HasOne,
    HasMany,
    ManyToMany,
}

/// One side of a reference pair: a column on a concrete table.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldBinding {
    pub table: String,
    pub column: String,
}

/// A foreign/primary column pair.
///
/// Exactly one side of every reference owns the primary key: when
/// `own_primary_key` is set the owner's primary key feeds the target's
/// foreign key, otherwise the reverse. `primary_value` pins the foreign
/// column to a literal instead (polymorphic discriminators).
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub primary: FieldBinding,
    pub foreign: FieldBinding,
    pub own_primary_key: bool,
    pub primary_value: Option<String>,
}

/// The synthesized join table of a many-to-many relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinTable {
    pub table: String,
    /// Column referencing the owning schema's primary key.
    pub owner_key: String,
    /// Column referencing the target schema's primary key.
    pub target_key: String,
}

/// A fully resolved relationship.
#[derive(Debug, Clone)]
pub struct Relationship {
    pub name: String,
    pub kind: RelationKind,
    pub owner: Arc<Schema>,
    pub target: Arc<Schema>,
    pub references: Vec<Reference>,
    pub join_table: Option<JoinTable>,
}

impl Relationship {
    /// The foreign-key column driving a preload batch: on the owner for
    /// belongs-to, on the target for has-one/has-many.
    pub fn foreign_column(&self) -> &str {
        &self
            .references
            .first()
            .expect("relationship has at least one reference")
            .foreign
            .column
    }
}

impl Schema {
    /// Resolve a relationship by field name.
    pub fn relationship(self: &Arc<Schema>, name: &str) -> OrmResult<Relationship> {
        let def = self
            .relation_def(name)
            .ok_or_else(|| OrmError::UnsupportedRelation(format!("{}.{}", self.name, name)))?;
        resolve(self, def)
    }
}

fn resolve(owner: &Arc<Schema>, def: &RelationDef) -> OrmResult<Relationship> {
    let target = cache::parse((def.target)(), &owner.naming);

    let owner_pk = || {
        owner.prioritized_primary_field().ok_or_else(|| {
            OrmError::PrimaryKeyRequired(format!("{} has no primary key", owner.name))
        })
    };
    let target_pk = || {
        target.prioritized_primary_field().ok_or_else(|| {
            OrmError::PrimaryKeyRequired(format!("{} has no primary key", target.name))
        })
    };

    let relationship = match def.kind {
        RelationKind::BelongsTo => {
            let pk = target_pk()?;
            let pk_column = def
                .references
                .clone()
                .unwrap_or_else(|| pk.db_name.clone());
            let fk_column = def
                .foreign_key
                .clone()
                .unwrap_or_else(|| owner.naming.foreign_key_name(&def.name, &pk_column));
            if owner.look_up_field(&fk_column).is_none() {
                return Err(OrmError::invalid_field(format!(
                    "{} is missing foreign key column {fk_column} for relation {}",
                    owner.name, def.name
                )));
            }
            Relationship {
                name: def.name.clone(),
                kind: def.kind,
                owner: Arc::clone(owner),
                target: Arc::clone(&target),
                references: vec![Reference {
                    primary: FieldBinding {
                        table: target.table.clone(),
                        column: pk_column,
                    },
                    foreign: FieldBinding {
                        table: owner.table.clone(),
                        column: fk_column,
                    },
                    own_primary_key: false,
                    primary_value: None,
                }],
                join_table: None,
            }
        }
        RelationKind::HasOne | RelationKind::HasMany => {
            let pk = owner_pk()?;
            let pk_column = def
                .references
                .clone()
                .unwrap_or_else(|| pk.db_name.clone());
            let fk_column = def.foreign_key.clone().unwrap_or_else(|| {
                owner
                    .naming
                    .foreign_key_name(&owner.name.to_snake_case(), &pk_column)
            });
            if target.look_up_field(&fk_column).is_none() {
                return Err(OrmError::invalid_field(format!(
                    "{} is missing foreign key column {fk_column} for relation {}",
                    target.name, def.name
                )));
            }
            Relationship {
                name: def.name.clone(),
                kind: def.kind,
                owner: Arc::clone(owner),
                target: Arc::clone(&target),
                references: vec![Reference {
                    primary: FieldBinding {
                        table: owner.table.clone(),
                        column: pk_column,
                    },
                    foreign: FieldBinding {
                        table: target.table.clone(),
                        column: fk_column,
                    },
                    own_primary_key: true,
                    primary_value: None,
                }],
                join_table: None,
            }
        }
        RelationKind::ManyToMany => {
            let owner_key_col = owner_pk()?.db_name.clone();
            let target_key_col = target_pk()?.db_name.clone();
            let table = def
                .join_table
                .clone()
                .unwrap_or_else(|| owner.naming.join_table_name(&owner.table, &def.name));
            let owner_key = def.join_foreign_key.clone().unwrap_or_else(|| {
                owner
                    .naming
                    .foreign_key_name(&owner.name.to_snake_case(), &owner_key_col)
            });
            let target_key = def.join_references.clone().unwrap_or_else(|| {
                owner
                    .naming
                    .foreign_key_name(&target.name.to_snake_case(), &target_key_col)
            });
            Relationship {
                name: def.name.clone(),
                kind: def.kind,
                owner: Arc::clone(owner),
                target: Arc::clone(&target),
                references: vec![
                    Reference {
                        primary: FieldBinding {
                            table: owner.table.clone(),
                            column: owner_key_col,
                        },
                        foreign: FieldBinding {
                            table: table.clone(),
                            column: owner_key.clone(),
                        },
                        own_primary_key: true,
                        primary_value: None,
                    },
                    Reference {
                        primary: FieldBinding {
                            table: target.table.clone(),
                            column: target_key_col,
                        },
                        foreign: FieldBinding {
                            table: table.clone(),
                            column: target_key.clone(),
                        },
                        own_primary_key: false,
                        primary_value: None,
                    },
                ],
                join_table: Some(JoinTable {
                    table,
                    owner_key,
                    target_key,
                }),
            }
        }
    };

    Ok(relationship)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::NamingStrategy;
    use crate::schema::{DataType, Descriptor, FieldDef};
    use std::sync::OnceLock;

    fn company() -> &'static Descriptor {
        static D: OnceLock<Descriptor> = OnceLock::new();
        D.get_or_init(|| {
            Descriptor::new("Company")
                .field(FieldDef::new("id", DataType::Int).primary_key().auto_increment())
                .field(FieldDef::new("name", DataType::Text))
                .has_many("employees", employee)
        })
    }

    fn employee() -> &'static Descriptor {
        static D: OnceLock<Descriptor> = OnceLock::new();
        D.get_or_init(|| {
            Descriptor::new("Employee")
                .field(FieldDef::new("id", DataType::Int).primary_key().auto_increment())
                .field(FieldDef::new("company_id", DataType::Int))
                .belongs_to("company", company)
        })
    }

    fn parse_schema(d: &'static Descriptor) -> Arc<Schema> {
        cache::parse(d, &NamingStrategy::default())
    }

    #[test]
    fn belongs_to_reference_pair() {
        let rel = parse_schema(employee()).relationship("company").unwrap();
        assert_eq!(rel.kind, RelationKind::BelongsTo);
        let r = &rel.references[0];
        assert!(!r.own_primary_key);
        assert_eq!(r.primary.table, "companies");
        assert_eq!(r.primary.column, "id");
        assert_eq!(r.foreign.table, "employees");
        assert_eq!(r.foreign.column, "company_id");
    }

    #[test]
    fn has_many_reference_pair() {
        let rel = parse_schema(company()).relationship("employees").unwrap();
        assert_eq!(rel.kind, RelationKind::HasMany);
        let r = &rel.references[0];
        assert!(r.own_primary_key);
        assert_eq!(r.foreign.column, "company_id");
        assert_eq!(rel.foreign_column(), "company_id");
    }

    #[test]
    fn mutual_references_resolve_without_cycles() {
        // Both directions resolve; the registry breaks the ownership cycle.
        let company_schema = parse_schema(company());
        let employee_schema = parse_schema(employee());
        assert!(company_schema.relationship("employees").is_ok());
        assert!(employee_schema.relationship("company").is_ok());
    }

    #[test]
    fn unknown_relation_is_an_error() {
        let err = parse_schema(company()).relationship("missing").unwrap_err();
        assert!(matches!(err, OrmError::UnsupportedRelation(_)));
    }
}
