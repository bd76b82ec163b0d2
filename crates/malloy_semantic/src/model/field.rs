use crate::model::datatype::{AtomicFieldType, ExpressionKind};
use crate::model::expr::{FilterExpr, PlanExpr};
use crate::model::segment::{Pipeline, Query};
use indexmap::IndexMap;
use malloy_ast::Location;
use serde::{Deserialize, Serialize};

/// Where a struct's rows come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StructSource {
    Table { table: String },
    Sql { key: String },
    Query { query: Box<Query> },
    Nested,
}

/// How a struct relates to the struct containing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StructRelationship {
    BaseTable,
    /// A joined struct; `on` is resolved against the completed parent space.
    Join { on: Option<PlanExpr> },
    Nested,
    Inline,
}

/// A table-like schema: the unit sources resolve to and segments consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructDef {
    pub name: String,
    pub dialect: String,
    /// Order-stable: atomic fields in source order, then joins, then turtles.
    pub fields: Vec<FieldDef>,
    pub parameters: IndexMap<String, Parameter>,
    pub filter_list: Vec<FilterExpr>,
    pub primary_key: Option<String>,
    pub struct_source: StructSource,
    pub struct_relationship: StructRelationship,
    pub location: Option<Location>,
}

impl StructDef {
    /// A struct with no fields, preserving identity and dialect.
    pub fn empty_like(&self) -> StructDef {
        StructDef {
            fields: Vec::new(),
            ..self.clone()
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

/// An atomic (leaf) field: a physical column or an expression-defined one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicFieldDef {
    pub name: String,
    pub data_type: AtomicFieldType,
    /// Present for fields defined by an expression; physical columns have
    /// none.
    pub expr: Option<PlanExpr>,
    /// `Aggregate` for measures; `Scalar` for dimensions and columns.
    pub kind: ExpressionKind,
    pub location: Option<Location>,
}

impl AtomicFieldDef {
    pub fn column(name: impl Into<String>, data_type: AtomicFieldType) -> Self {
        AtomicFieldDef {
            name: name.into(),
            data_type,
            expr: None,
            kind: ExpressionKind::Scalar,
            location: None,
        }
    }
}

/// A named query stored as a field of its source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurtleDef {
    pub name: String,
    pub pipeline: Pipeline,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldDef {
    Atomic(AtomicFieldDef),
    /// A nested struct: a join or a repeated record.
    Struct(StructDef),
    Turtle(TurtleDef),
}

impl FieldDef {
    pub fn name(&self) -> &str {
        match self {
            Self::Atomic(f) => &f.name,
            Self::Struct(s) => &s.name,
            Self::Turtle(t) => &t.name,
        }
    }

    pub fn location(&self) -> Option<&Location> {
        match self {
            Self::Atomic(f) => f.location.as_ref(),
            Self::Struct(s) => s.location.as_ref(),
            Self::Turtle(t) => t.location.as_ref(),
        }
    }
}

/// A declared source parameter. Required when it has no value; `constant`
/// value parameters cannot be overridden at use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Parameter {
    Value {
        name: String,
        data_type: AtomicFieldType,
        value: Option<PlanExpr>,
        constant: bool,
    },
    Condition {
        name: String,
        data_type: AtomicFieldType,
        condition: Option<PlanExpr>,
    },
}

impl Parameter {
    pub fn name(&self) -> &str {
        match self {
            Self::Value { name, .. } | Self::Condition { name, .. } => name,
        }
    }

    pub fn data_type(&self) -> AtomicFieldType {
        match self {
            Self::Value { data_type, .. } | Self::Condition { data_type, .. } => *data_type,
        }
    }

    pub fn is_required(&self) -> bool {
        match self {
            Self::Value { value, .. } => value.is_none(),
            Self::Condition { condition, .. } => condition.is_none(),
        }
    }
}
