//! Record schemas.
//!
//! A record type describes itself once through a [`Descriptor`] — name,
//! fields, relationships, hook capabilities. [`parse`](cache::parse)
//! resolves that description against the configured naming strategy into a
//! [`Schema`] and caches it process-wide, so every later reference is a
//! lookup. Descriptors are typically written by hand or generated by a
//! derive layered on top of this crate.

mod cache;
mod relationship;

pub use cache::parse;
#[cfg(any(test, feature = "test-util"))]
pub use cache::reset_caches;
pub use relationship::{FieldBinding, JoinTable, Reference, RelationKind, Relationship};

use crate::clause::{ColumnRef, Expr};
use crate::naming::NamingStrategy;
use crate::value::Value;
use std::collections::HashMap;

/// Column data type, mapped to dialect-specific SQL by
/// [`Dialect::data_type_of`](crate::dialect::Dialect::data_type_of).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Bool,
    Int,
    Float,
    Text,
    Bytes,
    Time,
}

/// The static description of one record field.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub column: Option<String>,
    pub data_type: DataType,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub not_null: bool,
    pub unique: bool,
    pub default: Option<String>,
    pub size: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub readable: bool,
    pub writable: bool,
    pub ignored: bool,
    pub auto_create_time: bool,
    pub auto_update_time: bool,
    pub soft_delete: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        FieldDef {
            name: name.into(),
            column: None,
            data_type,
            primary_key: false,
            auto_increment: false,
            not_null: false,
            unique: false,
            default: None,
            size: None,
            precision: None,
            scale: None,
            readable: true,
            writable: true,
            ignored: false,
            auto_create_time: false,
            auto_update_time: false,
            soft_delete: false,
        }
    }

    /// Override the column name instead of deriving it from the strategy.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn scale(mut self, scale: u32) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Read mask: the column is scanned but never written.
    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    /// Write mask: the column is written but never selected.
    pub fn write_only(mut self) -> Self {
        self.readable = false;
        self
    }

    /// Skip this field entirely.
    pub fn ignore(mut self) -> Self {
        self.ignored = true;
        self.readable = false;
        self.writable = false;
        self
    }

    /// Fill with the session clock on INSERT.
    pub fn auto_create_time(mut self) -> Self {
        self.auto_create_time = true;
        self
    }

    /// Fill with the session clock on INSERT and UPDATE.
    pub fn auto_update_time(mut self) -> Self {
        self.auto_update_time = true;
        self
    }

    /// Marks the soft-delete timestamp column; queries then filter on
    /// `IS NULL` and deletes become updates of this column.
    pub fn soft_delete(mut self) -> Self {
        self.soft_delete = true;
        self
    }
}

/// Relationship description on a [`Descriptor`].
#[derive(Debug, Clone)]
pub struct RelationDef {
    pub name: String,
    pub kind: RelationKind,
    pub target: fn() -> &'static Descriptor,
    pub foreign_key: Option<String>,
    pub references: Option<String>,
    pub join_table: Option<String>,
    pub join_foreign_key: Option<String>,
    pub join_references: Option<String>,
}

/// Hook capabilities a record type declares.
///
/// The pipeline consults these flags before invoking the corresponding
/// [`Entity`](crate::model::Entity) method, so records without hooks cost
/// nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct HookFlags {
    pub before_create: bool,
    pub after_create: bool,
    pub before_save: bool,
    pub after_save: bool,
    pub before_update: bool,
    pub after_update: bool,
    pub before_delete: bool,
    pub after_delete: bool,
    pub after_find: bool,
}

/// The static description of a record type.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub name: String,
    pub table: Option<String>,
    pub fields: Vec<FieldDef>,
    pub relations: Vec<RelationDef>,
    pub hooks: HookFlags,
}

impl Descriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Descriptor {
            name: name.into(),
            table: None,
            fields: Vec::new(),
            relations: Vec::new(),
            hooks: HookFlags::default(),
        }
    }

    /// Override the table name instead of deriving it from the strategy.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn belongs_to(mut self, name: impl Into<String>, target: fn() -> &'static Descriptor) -> Self {
        self.relations.push(RelationDef {
            name: name.into(),
            kind: RelationKind::BelongsTo,
            target,
            foreign_key: None,
            references: None,
            join_table: None,
            join_foreign_key: None,
            join_references: None,
        });
        self
    }

    pub fn has_one(mut self, name: impl Into<String>, target: fn() -> &'static Descriptor) -> Self {
        self.relations.push(RelationDef {
            name: name.into(),
            kind: RelationKind::HasOne,
            target,
            foreign_key: None,
            references: None,
            join_table: None,
            join_foreign_key: None,
            join_references: None,
        });
        self
    }

    pub fn has_many(mut self, name: impl Into<String>, target: fn() -> &'static Descriptor) -> Self {
        self.relations.push(RelationDef {
            name: name.into(),
            kind: RelationKind::HasMany,
            target,
            foreign_key: None,
            references: None,
            join_table: None,
            join_foreign_key: None,
            join_references: None,
        });
        self
    }

    pub fn many_to_many(
        mut self,
        name: impl Into<String>,
        join_table: impl Into<String>,
        target: fn() -> &'static Descriptor,
    ) -> Self {
        self.relations.push(RelationDef {
            name: name.into(),
            kind: RelationKind::ManyToMany,
            target,
            foreign_key: None,
            references: None,
            join_table: Some(join_table.into()),
            join_foreign_key: None,
            join_references: None,
        });
        self
    }

    /// Install a fully specified relationship.
    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn hooks(mut self, hooks: HookFlags) -> Self {
        self.hooks = hooks;
        self
    }
}

/// A field resolved against the naming strategy.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub db_name: String,
    pub data_type: DataType,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub not_null: bool,
    pub unique: bool,
    pub default: Option<String>,
    pub size: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub readable: bool,
    pub writable: bool,
    pub auto_create_time: bool,
    pub auto_update_time: bool,
    pub soft_delete: bool,
}

/// The parsed, cached description of a record type.
#[derive(Debug, Clone)]
pub struct Schema {
    pub name: String,
    pub table: String,
    pub fields: Vec<Field>,
    pub relations: Vec<RelationDef>,
    pub hooks: HookFlags,
    /// Default WHERE conjuncts applied to every query (soft delete).
    pub query_clauses: Vec<Expr>,
    pub soft_delete_field: Option<usize>,
    pub(crate) naming: NamingStrategy,
    primary: Vec<usize>,
    by_name: HashMap<String, usize>,
    by_db_name: HashMap<String, usize>,
}

impl Schema {
    pub(crate) fn resolve(descriptor: &Descriptor, naming: &NamingStrategy) -> Schema {
        let table = descriptor
            .table
            .clone()
            .unwrap_or_else(|| naming.table_name(&descriptor.name));

        let mut fields = Vec::with_capacity(descriptor.fields.len());
        let mut primary = Vec::new();
        let mut by_name = HashMap::new();
        let mut by_db_name = HashMap::new();
        let mut soft_delete_field = None;

        for def in descriptor.fields.iter().filter(|f| !f.ignored) {
            let db_name = def
                .column
                .clone()
                .unwrap_or_else(|| naming.column_name(&table, &def.name));
            let idx = fields.len();
            if def.primary_key {
                primary.push(idx);
            }
            if def.soft_delete {
                soft_delete_field = Some(idx);
            }
            by_name.insert(def.name.clone(), idx);
            by_db_name.insert(db_name.clone(), idx);
            fields.push(Field {
                name: def.name.clone(),
                db_name,
                data_type: def.data_type,
                primary_key: def.primary_key,
                auto_increment: def.auto_increment,
                not_null: def.not_null,
                unique: def.unique,
                default: def.default.clone(),
                size: def.size,
                precision: def.precision,
                scale: def.scale,
                readable: def.readable,
                writable: def.writable,
                auto_create_time: def.auto_create_time,
                auto_update_time: def.auto_update_time,
                soft_delete: def.soft_delete,
            });
        }

        let query_clauses = soft_delete_field
            .map(|idx| {
                vec![Expr::eq(
                    ColumnRef::qualified(table.clone(), fields[idx].db_name.clone()),
                    Value::Null,
                )]
            })
            .unwrap_or_default();

        Schema {
            name: descriptor.name.clone(),
            table,
            fields,
            relations: descriptor.relations.clone(),
            hooks: descriptor.hooks,
            query_clauses,
            soft_delete_field,
            naming: naming.clone(),
            primary,
            by_name,
            by_db_name,
        }
    }

    /// Primary fields in declaration order.
    pub fn primary_fields(&self) -> impl Iterator<Item = &Field> {
        self.primary.iter().map(|&idx| &self.fields[idx])
    }

    /// The primary field used where a single key column is needed: the
    /// auto-increment one when present, else the first declared.
    pub fn prioritized_primary_field(&self) -> Option<&Field> {
        self.primary
            .iter()
            .map(|&idx| &self.fields[idx])
            .find(|f| f.auto_increment)
            .or_else(|| self.primary.first().map(|&idx| &self.fields[idx]))
    }

    /// Look a field up by record field name or column name.
    pub fn look_up_field(&self, name: &str) -> Option<&Field> {
        self.by_name
            .get(name)
            .or_else(|| self.by_db_name.get(name))
            .map(|&idx| &self.fields[idx])
    }

    /// Column names of every selectable field, in declaration order.
    pub fn db_names(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.readable)
            .map(|f| f.db_name.as_str())
    }

    /// The relationship description with the given field name.
    pub fn relation_def(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }
}
