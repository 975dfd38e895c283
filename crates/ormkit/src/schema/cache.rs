//! Process-wide schema registry.
//!
//! Schemas are parsed once per descriptor and shared behind `Arc`. Cyclic
//! record graphs work because relationships resolve their target schemas
//! through this registry on demand instead of owning them.

use crate::naming::NamingStrategy;
use crate::schema::{Descriptor, Schema};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

static REGISTRY: Lazy<RwLock<HashMap<usize, Arc<Schema>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

fn key(descriptor: &'static Descriptor) -> usize {
    descriptor as *const Descriptor as usize
}

/// Parse a descriptor into a schema, or return the cached one.
///
/// Idempotent: parsing the same descriptor twice returns the same `Arc`
/// identity. The naming strategy of the first parse wins for the lifetime
/// of the process.
pub fn parse(descriptor: &'static Descriptor, naming: &NamingStrategy) -> Arc<Schema> {
    let k = key(descriptor);
    {
        let registry = REGISTRY.read().unwrap_or_else(|e| e.into_inner());
        if let Some(schema) = registry.get(&k) {
            return Arc::clone(schema);
        }
    }

    let schema = Arc::new(Schema::resolve(descriptor, naming));
    let mut registry = REGISTRY.write().unwrap_or_else(|e| e.into_inner());
    Arc::clone(registry.entry(k).or_insert(schema))
}

/// Drop every cached schema. Test harnesses only.
#[cfg(any(test, feature = "test-util"))]
pub fn reset_caches() {
    REGISTRY
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, FieldDef};
    use std::sync::OnceLock;

    fn descriptor() -> &'static Descriptor {
        static D: OnceLock<Descriptor> = OnceLock::new();
        D.get_or_init(|| {
            Descriptor::new("CacheProbe").field(FieldDef::new("id", DataType::Int).primary_key())
        })
    }

    #[test]
    fn parse_is_idempotent() {
        let naming = NamingStrategy::default();
        let a = parse(descriptor(), &naming);
        let b = parse(descriptor(), &naming);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
