//! Record traits.
//!
//! [`Record`] is the typed contract a mapped struct satisfies: a static
//! [`Descriptor`] plus hydration from a row. [`Entity`] is its object-safe
//! view — field access by column name, hook methods, association
//! attachment — which the pipeline manipulates without knowing the
//! concrete type. A derive can generate both; this crate keeps them
//! implementable by hand.
//!
//! # Example
//!
//! ```ignore
//! struct User {
//!     id: i64,
//!     name: String,
//! }
//!
//! impl Entity for User {
//!     fn descriptor_ref(&self) -> &'static Descriptor { User::descriptor() }
//!     fn get(&self, column: &str) -> Option<Value> {
//!         match column {
//!             "id" => Some(self.id.into()),
//!             "name" => Some(self.name.as_str().into()),
//!             _ => None,
//!         }
//!     }
//!     fn set(&mut self, column: &str, value: &Value) -> OrmResult<bool> {
//!         match column {
//!             "id" => self.id = i64::from_value(value)?,
//!             "name" => self.name = String::from_value(value)?,
//!             _ => return Ok(false),
//!         }
//!         Ok(true)
//!     }
//!     fn as_any(&self) -> &dyn Any { self }
//!     fn as_any_mut(&mut self) -> &mut dyn Any { self }
//! }
//!
//! impl Record for User {
//!     fn descriptor() -> &'static Descriptor { /* OnceLock-backed */ }
//! }
//! ```

use crate::error::{OrmError, OrmResult};
use crate::pool::Row;
use crate::schema::Descriptor;
use crate::value::{FromValue, Value};
use std::any::Any;

/// Object-safe view of a mapped record.
///
/// `get`/`set` are keyed by **column name**. `set` returns `Ok(false)` for
/// a column the record does not map (the scanner ignores it) and an error
/// only on a type mismatch.
pub trait Entity: Send + Any {
    fn descriptor_ref(&self) -> &'static Descriptor;

    fn get(&self, column: &str) -> Option<Value>;

    fn set(&mut self, column: &str, value: &Value) -> OrmResult<bool>;

    /// Route a `Parent__Child__column` scan path into a nested association
    /// record. The default handles only the single-segment case.
    fn set_path(&mut self, path: &[&str], value: &Value) -> OrmResult<bool> {
        match path {
            [column] => self.set(column, value),
            _ => Ok(false),
        }
    }

    /// Attach preloaded rows for a relationship. Records that expose
    /// association fields hydrate them here.
    fn attach(&mut self, relation: &str, rows: &[Row<'_>]) -> OrmResult<()> {
        let _ = rows;
        Err(OrmError::UnsupportedRelation(format!(
            "{} cannot attach {relation}",
            self.descriptor_ref().name
        )))
    }

    /// Detach association records for the save cascade, if any are loaded.
    /// The pipeline calls [`Entity::restore`] with the saved records after
    /// the cascade step completes.
    fn detach(&mut self, relation: &str) -> Vec<Box<dyn Entity>> {
        let _ = relation;
        Vec::new()
    }

    /// Put cascaded records back after a save. Pairs with
    /// [`Entity::detach`].
    fn restore(&mut self, relation: &str, entities: Vec<Box<dyn Entity>>) {
        let _ = (relation, entities);
    }

    // Hooks. Invoked only when the matching descriptor flag is set.

    fn before_save(&mut self) -> OrmResult<()> {
        Ok(())
    }

    fn after_save(&mut self) -> OrmResult<()> {
        Ok(())
    }

    fn before_create(&mut self) -> OrmResult<()> {
        Ok(())
    }

    fn after_create(&mut self) -> OrmResult<()> {
        Ok(())
    }

    fn before_update(&mut self) -> OrmResult<()> {
        Ok(())
    }

    fn after_update(&mut self) -> OrmResult<()> {
        Ok(())
    }

    fn before_delete(&mut self) -> OrmResult<()> {
        Ok(())
    }

    fn after_delete(&mut self) -> OrmResult<()> {
        Ok(())
    }

    fn after_find(&mut self) -> OrmResult<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A typed, mapped record.
pub trait Record: Entity + Default + Sized {
    /// The static description of this record type.
    fn descriptor() -> &'static Descriptor;

    /// Hydrate a fresh record from a result row. The default starts from
    /// `Default` and assigns column by column, ignoring unknown columns
    /// and routing `Parent__Child` aliases into nested records.
    fn from_row(row: &Row<'_>) -> OrmResult<Self> {
        let mut record = Self::default();
        load_row(&mut record, row)?;
        Ok(record)
    }
}

/// Assign every row column onto an entity.
pub fn load_row(entity: &mut dyn Entity, row: &Row<'_>) -> OrmResult<()> {
    for (column, value) in row.iter() {
        if column.contains("__") {
            let path: Vec<&str> = column.split("__").collect();
            entity.set_path(&path, value)?;
        } else {
            entity.set(column, value)?;
        }
    }
    Ok(())
}

/// An erased scan destination: collects rows, exposes hydrated entities to
/// the hook and preload stages, and is downcast back by the finisher.
pub trait ScanSink: Send {
    /// Consume one result row.
    fn accept(&mut self, row: &Row<'_>) -> OrmResult<()>;

    /// The record type this sink hydrates, when it hydrates one. Drives
    /// the smaller-struct select-list optimization.
    fn descriptor(&self) -> Option<&'static Descriptor> {
        None
    }

    /// Visit every hydrated entity (AfterFind hooks, preload attachment).
    fn for_each_entity(
        &mut self,
        f: &mut dyn FnMut(&mut dyn Entity) -> OrmResult<()>,
    ) -> OrmResult<()> {
        let _ = f;
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Sink producing `Vec<T>` for a record type.
pub struct RecordSink<T: Record> {
    pub items: Vec<T>,
}

impl<T: Record> Default for RecordSink<T> {
    fn default() -> Self {
        RecordSink { items: Vec::new() }
    }
}

impl<T: Record + 'static> ScanSink for RecordSink<T> {
    fn accept(&mut self, row: &Row<'_>) -> OrmResult<()> {
        self.items.push(T::from_row(row)?);
        Ok(())
    }

    fn descriptor(&self) -> Option<&'static Descriptor> {
        Some(T::descriptor())
    }

    fn for_each_entity(
        &mut self,
        f: &mut dyn FnMut(&mut dyn Entity) -> OrmResult<()>,
    ) -> OrmResult<()> {
        for item in &mut self.items {
            f(item)?;
        }
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Sink scanning the first column of every row into a primitive.
pub struct ValueSink<T: FromValue> {
    pub items: Vec<T>,
}

impl<T: FromValue> Default for ValueSink<T> {
    fn default() -> Self {
        ValueSink { items: Vec::new() }
    }
}

impl<T: FromValue + Send + 'static> ScanSink for ValueSink<T> {
    fn accept(&mut self, row: &Row<'_>) -> OrmResult<()> {
        let value = row
            .values
            .first()
            .ok_or_else(|| OrmError::InvalidData("empty row".to_string()))?;
        self.items.push(T::from_value(value)?);
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Sink retaining raw rows.
#[derive(Default)]
pub struct RowsSink {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ScanSink for RowsSink {
    fn accept(&mut self, row: &Row<'_>) -> OrmResult<()> {
        if self.columns.is_empty() {
            self.columns = row.columns.to_vec();
        }
        self.rows.push(row.values.to_vec());
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
