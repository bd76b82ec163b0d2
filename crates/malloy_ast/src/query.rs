use crate::expr::ExprNode;
use crate::location::Location;
use crate::source::SourceDesc;
use serde::{Deserialize, Serialize};

/// A field defined inline by an expression, e.g. `total is sum(amount)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub expr: ExprNode,
    pub loc: Location,
}

/// `*`, `**`, or `join.*`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WildSpec {
    /// Join path the wildcard applies to; empty for a bare `*`.
    pub prefix: Vec<String>,
    /// `**` recurses into joined structs.
    pub deep: bool,
    pub loc: Location,
}

/// One element of a field list (group_by / aggregate / project / index).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryItem {
    Ref { path: Vec<String>, loc: Location },
    Wild(WildSpec),
    Def(FieldDecl),
}

impl QueryItem {
    pub fn loc(&self) -> &Location {
        match self {
            Self::Ref { loc, .. } => loc,
            Self::Wild(w) => &w.loc,
            Self::Def(d) => &d.loc,
        }
    }
}

/// A `nest:` entry. Either a reference to an existing turtle or an inline
/// definition (optionally refining a turtle).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NestEntry {
    Ref {
        path: Vec<String>,
        loc: Location,
    },
    Def {
        name: String,
        /// Turtle this definition starts from, e.g. `n is t + { ... }`.
        base: Option<String>,
        refinement: Option<QopDesc>,
        segments: Vec<QopDesc>,
        loc: Location,
    },
}

impl NestEntry {
    pub fn loc(&self) -> &Location {
        match self {
            Self::Ref { loc, .. } => loc,
            Self::Def { loc, .. } => loc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderRef {
    Name(String),
    Ordinal(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub field: OrderRef,
    pub dir: Option<OrderDirection>,
    pub loc: Location,
}

/// The `by` part of `top: 5 by <name|expr>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TopBy {
    Name { name: String, loc: Location },
    Expr(Box<ExprNode>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SampleSpec {
    Enable(bool),
    Rows(u64),
    Percent(f64),
}

/// `join_name is <source> on <key>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinDecl {
    pub name: String,
    pub source: SourceDesc,
    /// Join key expression, resolved against the completed space.
    pub key: Option<ExprNode>,
    pub loc: Location,
}

/// One statement inside a query segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryProperty {
    GroupBy {
        items: Vec<QueryItem>,
        loc: Location,
    },
    Aggregate {
        items: Vec<QueryItem>,
        loc: Location,
    },
    Project {
        items: Vec<QueryItem>,
        loc: Location,
    },
    Index {
        fields: Vec<QueryItem>,
        weight_by: Option<Vec<String>>,
        loc: Location,
    },
    Nest {
        entries: Vec<NestEntry>,
        loc: Location,
    },
    /// `where:` by default; `having: true` for post-aggregation filters.
    Filter {
        clauses: Vec<ExprNode>,
        having: bool,
        loc: Location,
    },
    Top {
        n: u64,
        by: Option<TopBy>,
        loc: Location,
    },
    Limit {
        n: u64,
        loc: Location,
    },
    Ordering {
        items: Vec<OrderItem>,
        loc: Location,
    },
    Join {
        joins: Vec<JoinDecl>,
        loc: Location,
    },
    Declare {
        fields: Vec<FieldDecl>,
        loc: Location,
    },
    Sample {
        spec: SampleSpec,
        loc: Location,
    },
}

impl QueryProperty {
    pub fn loc(&self) -> &Location {
        match self {
            Self::GroupBy { loc, .. }
            | Self::Aggregate { loc, .. }
            | Self::Project { loc, .. }
            | Self::Index { loc, .. }
            | Self::Nest { loc, .. }
            | Self::Filter { loc, .. }
            | Self::Top { loc, .. }
            | Self::Limit { loc, .. }
            | Self::Ordering { loc, .. }
            | Self::Join { loc, .. }
            | Self::Declare { loc, .. }
            | Self::Sample { loc, .. } => loc,
        }
    }
}

/// Explicit segment labels, e.g. `reduce:` vs `project:`. Unlabeled segments
/// are classified from their properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentKindHint {
    Reduce,
    Project,
    Index,
}

/// One pipeline segment as parsed: an optional explicit kind plus the
/// property bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QopDesc {
    pub kind: Option<SegmentKindHint>,
    pub properties: Vec<QueryProperty>,
    pub loc: Location,
}

impl QopDesc {
    pub fn new(properties: Vec<QueryProperty>, loc: Location) -> Self {
        QopDesc {
            kind: None,
            properties,
            loc,
        }
    }
}

/// What a query pipeline starts from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryHead {
    /// An inline source, e.g. `table('x') -> ...`.
    Source(SourceDesc),
    /// A previously defined named query, e.g. `q + { limit: 10 }`.
    Query { name: String, loc: Location },
}

/// `-> turtle_name` or `-> turtle_name + { ... }` at the head of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurtleHead {
    pub name: String,
    pub refinement: Option<QopDesc>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDef {
    pub head: QueryHead,
    /// Refinement applied to the head query's first segment.
    pub refinement: Option<QopDesc>,
    /// Turtle reference heading the pipeline.
    pub turtle: Option<TurtleHead>,
    pub segments: Vec<QopDesc>,
    pub loc: Location,
}
