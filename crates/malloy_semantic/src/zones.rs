use crate::model::StructDef;
use malloy_ast::Location;
use parking_lot::RwLock;
use std::collections::HashMap;

/// State of a name in a zone.
#[derive(Debug, Clone)]
pub enum ZoneEntry<T> {
    Present(T),
    Error(String),
    /// Referenced by a compilation but not yet supplied by the driver.
    Reference,
}

/// A process-scoped lookup table the driver fills between passes. The
/// compiler only reads within one pass; a missing entry suspends the pass
/// with a data request.
#[derive(Debug, Default)]
pub struct Zone<T> {
    entries: RwLock<HashMap<String, ZoneEntry<T>>>,
}

impl<T: Clone> Zone<T> {
    pub fn new() -> Self {
        Zone {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_entry(&self, name: &str) -> Option<ZoneEntry<T>> {
        self.entries.read().get(name).cloned()
    }

    /// Record that a compilation needs `name`. Idempotent; never downgrades
    /// a present entry.
    pub fn reference(&self, name: &str, _loc: &Location) {
        let mut entries = self.entries.write();
        entries
            .entry(name.to_string())
            .or_insert(ZoneEntry::Reference);
    }

    pub fn define(&self, name: impl Into<String>, value: T) {
        self.entries
            .write()
            .insert(name.into(), ZoneEntry::Present(value));
    }

    pub fn define_error(&self, name: impl Into<String>, message: impl Into<String>) {
        self.entries
            .write()
            .insert(name.into(), ZoneEntry::Error(message.into()));
    }

    /// Names referenced but not yet supplied, in arbitrary order.
    pub fn undefined(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .entries
            .read()
            .iter()
            .filter_map(|(name, entry)| match entry {
                ZoneEntry::Reference => Some(name.clone()),
                _ => None,
            })
            .collect();
        names.sort();
        names
    }
}

/// Table name → schema, supplied by the schema-fetch plumbing.
pub type SchemaZone = Zone<StructDef>;

/// SQL block name → schema of its select, supplied after the driver compiles
/// the block against the database.
pub type SqlZone = Zone<StructDef>;

/// A SQL block whose select must be compiled against the database to learn
/// its schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlCompileRequest {
    pub name: String,
    pub select: String,
}

/// Continuation token returned when a pass pauses for external data. The
/// driver fetches what is listed and re-invokes the pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelDataRequest {
    /// SQL blocks whose schemas must be compiled.
    pub compile_sql: Vec<SqlCompileRequest>,
    /// Table names whose schemas must be fetched.
    pub table_schemas: Vec<String>,
}

impl ModelDataRequest {
    pub fn is_empty(&self) -> bool {
        self.compile_sql.is_empty() && self.table_schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_then_define() {
        let zone: Zone<u32> = Zone::new();
        zone.reference("a", &Location::detached());
        assert_eq!(zone.undefined(), ["a"]);

        zone.define("a", 7);
        assert!(zone.undefined().is_empty());
        assert!(matches!(zone.get_entry("a"), Some(ZoneEntry::Present(7))));
    }

    #[test]
    fn reference_does_not_downgrade() {
        let zone: Zone<u32> = Zone::new();
        zone.define("a", 7);
        zone.reference("a", &Location::detached());
        assert!(matches!(zone.get_entry("a"), Some(ZoneEntry::Present(7))));
    }
}
