use crate::expr::{ExprNode, TypeName};
use crate::location::Location;
use crate::query::{FieldDecl, JoinDecl, QopDesc, QueryDef};
use serde::{Deserialize, Serialize};

/// A parameter declared on a source definition.
///
/// `p::number` declares a required value parameter; a default makes it
/// optional; `constant` forbids overriding; `condition` declares a
/// condition parameter (bound to a partial comparison, not a value).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDecl {
    pub name: String,
    pub ty: TypeName,
    pub default: Option<ExprNode>,
    pub constant: bool,
    pub condition: bool,
    pub loc: Location,
}

/// A parameter value supplied at use, e.g. the `p is 10` in `s(p is 10)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterValue {
    pub name: String,
    pub value: ExprNode,
    pub loc: Location,
}

/// `rename: new_name is old_name`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameDecl {
    pub name: String,
    pub from: String,
    pub loc: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldListEditKind {
    Accept,
    Except,
}

/// `accept: a, b` / `except: c`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldListEdit {
    pub kind: FieldListEditKind,
    pub names: Vec<String>,
    pub loc: Location,
}

/// A named query defined as a field of a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurtleDecl {
    pub name: String,
    /// Turtle this one refines, e.g. `t2 is t + { ... }`.
    pub base: Option<String>,
    pub refinement: Option<QopDesc>,
    pub segments: Vec<QopDesc>,
    pub loc: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeclareKind {
    Dimension,
    Measure,
}

/// One property inside an explore refinement block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExploreProperty {
    PrimaryKey {
        name: String,
        loc: Location,
    },
    FieldListEdit(FieldListEdit),
    Join {
        joins: Vec<JoinDecl>,
        loc: Location,
    },
    Rename {
        renames: Vec<RenameDecl>,
        loc: Location,
    },
    Declare {
        kind: DeclareKind,
        fields: Vec<FieldDecl>,
        loc: Location,
    },
    Turtle {
        turtles: Vec<TurtleDecl>,
        loc: Location,
    },
    Filter {
        clauses: Vec<ExprNode>,
        loc: Location,
    },
    Parameters {
        decls: Vec<ParameterDecl>,
        loc: Location,
    },
}

impl ExploreProperty {
    pub fn loc(&self) -> &Location {
        match self {
            Self::PrimaryKey { loc, .. }
            | Self::Join { loc, .. }
            | Self::Rename { loc, .. }
            | Self::Declare { loc, .. }
            | Self::Turtle { loc, .. }
            | Self::Filter { loc, .. }
            | Self::Parameters { loc, .. } => loc,
            Self::FieldListEdit(e) => &e.loc,
        }
    }
}

/// Where a source's schema comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SourceDesc {
    /// `table('schema.name')`
    Table { name: String, loc: Location },
    /// `from_sql(sql_block_name)`
    Sql { name: String, loc: Location },
    /// A named source from the model, with optional parameter bindings.
    Named {
        name: String,
        params: Vec<ParameterValue>,
        loc: Location,
    },
    /// `from(<query>)` — a source built from a query's output.
    FromQuery { query: Box<QueryDef>, loc: Location },
    /// A source with an explore refinement block applied.
    Refined {
        base: Box<SourceDesc>,
        props: Vec<ExploreProperty>,
        loc: Location,
    },
}

impl SourceDesc {
    pub fn loc(&self) -> &Location {
        match self {
            Self::Table { loc, .. }
            | Self::Sql { loc, .. }
            | Self::Named { loc, .. }
            | Self::FromQuery { loc, .. }
            | Self::Refined { loc, .. } => loc,
        }
    }
}
