use crate::location::Location;
use crate::query::QueryDef;
use crate::source::SourceDesc;
use serde::{Deserialize, Serialize};

/// A top-level statement in a Malloy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    /// `export define name is <source>`
    DefineSource {
        name: String,
        source: SourceDesc,
        exported: bool,
        loc: Location,
    },
    /// `query: name is <query>`
    DefineQuery {
        name: String,
        query: QueryDef,
        exported: bool,
        loc: Location,
    },
    /// An anonymous top-level query; its plan lands in the document's query
    /// list.
    RunQuery { query: QueryDef, loc: Location },
    /// `sql: name is || select ... ;;` — the select text is compiled by the
    /// driver, which deposits the resulting schema in the sql zone.
    DefineSql {
        name: String,
        select: String,
        loc: Location,
    },
}

impl Statement {
    pub fn loc(&self) -> &Location {
        match self {
            Self::DefineSource { loc, .. }
            | Self::DefineQuery { loc, .. }
            | Self::RunQuery { loc, .. }
            | Self::DefineSql { loc, .. } => loc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Document {
    pub statements: Vec<Statement>,
}
