use crate::diagnostics::Diagnostics;
use crate::model::{Query, StructDef, StructRelationship, StructSource};
use crate::spaces::{SpaceRef, Spaces};
use crate::zones::{ModelDataRequest, SchemaZone, SqlCompileRequest, SqlZone};
use indexmap::IndexMap;
use malloy_ast::Location;

/// What a model-level name is bound to.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelValue {
    Source(StructDef),
    Query(Query),
    /// A SQL block; its schema lives in the sql zone.
    Sql,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelEntry {
    pub value: ModelValue,
    pub exported: bool,
}

/// Named sources and queries defined so far in the document, in definition
/// order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelEnvironment {
    entries: IndexMap<String, ModelEntry>,
}

impl ModelEnvironment {
    pub fn entry(&self, name: &str) -> Option<&ModelEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn define(&mut self, name: impl Into<String>, value: ModelValue, exported: bool) {
        self.entries
            .insert(name.into(), ModelEntry { value, exported });
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ModelEntry)> {
        self.entries.iter()
    }
}

/// Everything one compilation pass carries: the space arena, the diagnostic
/// sink, the read-only zones, and the model built so far. Dropped when the
/// pass ends; nothing persists across passes.
pub struct Analyzer<'a> {
    pub spaces: Spaces,
    pub diagnostics: Diagnostics,
    pub schema_zone: &'a SchemaZone,
    pub sql_zone: &'a SqlZone,
    pub model: ModelEnvironment,
    pub query_list: Vec<Query>,
    needs: ModelDataRequest,
    paused: bool,
}

impl<'a> Analyzer<'a> {
    pub fn new(schema_zone: &'a SchemaZone, sql_zone: &'a SqlZone) -> Self {
        Analyzer {
            spaces: Spaces::new(),
            diagnostics: Diagnostics::new(),
            schema_zone,
            sql_zone,
            model: ModelEnvironment::default(),
            query_list: Vec::new(),
            needs: ModelDataRequest::default(),
            paused: false,
        }
    }

    /// Suspend the pass until the driver fetches `name`'s schema.
    pub fn need_table(&mut self, name: &str, loc: &Location) {
        tracing::debug!(table = name, "pausing for table schema");
        self.schema_zone.reference(name, loc);
        if !self.needs.table_schemas.iter().any(|t| t == name) {
            self.needs.table_schemas.push(name.to_string());
        }
        self.paused = true;
    }

    /// Suspend the pass until the driver compiles a SQL block.
    pub fn need_sql(&mut self, name: &str, select: &str, loc: &Location) {
        tracing::debug!(block = name, "pausing for sql block schema");
        self.sql_zone.reference(name, loc);
        if !self.needs.compile_sql.iter().any(|r| r.name == name) {
            self.needs.compile_sql.push(SqlCompileRequest {
                name: name.to_string(),
                select: select.to_string(),
            });
        }
        self.paused = true;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn take_request(&mut self) -> Option<ModelDataRequest> {
        if self.needs.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.needs))
        }
    }

    /// A space for evaluating values with no input row, e.g. parameter
    /// defaults and bindings.
    pub fn constant_space(&mut self) -> SpaceRef {
        let constants = StructDef {
            name: "//constants//".to_string(),
            dialect: "standardsql".to_string(),
            fields: Vec::new(),
            parameters: Default::default(),
            filter_list: Vec::new(),
            primary_key: None,
            struct_source: StructSource::Nested,
            struct_relationship: StructRelationship::BaseTable,
            location: None,
        };
        self.spaces.new_query_space(&constants, None)
    }
}
