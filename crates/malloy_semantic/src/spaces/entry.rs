use crate::model::{
    AtomicFieldDef, AtomicFieldType, ExpressionKind, Parameter, StructDef, TurtleDef,
};
use malloy_ast as ast;
use serde::{Deserialize, Serialize};

/// The resolved type shape of a space entry, as seen by lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeDesc {
    pub data_type: AtomicFieldType,
    pub kind: ExpressionKind,
}

/// A join waiting for its `on` expression to be resolved against the
/// completed space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingJoin {
    pub struct_def: StructDef,
    pub key: Option<ast::ExprNode>,
}

/// An unexpanded `*` / `**` / `join.*` reference held by a result space
/// until finalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WildEntry {
    pub prefix: Vec<String>,
    pub deep: bool,
}

impl WildEntry {
    /// The exact reference string used for deduplication.
    pub fn reference_string(&self) -> String {
        let star = if self.deep { "**" } else { "*" };
        if self.prefix.is_empty() {
            star.to_string()
        } else {
            format!("{}.{star}", self.prefix.join("."))
        }
    }
}

/// One named thing a field space knows about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SpaceEntry {
    /// A physical column from the wrapped schema.
    Column(AtomicFieldDef),
    /// A field defined by an expression (dimension or measure).
    Expression(AtomicFieldDef),
    /// A name-only passthrough for a projected reference; carries the
    /// resolved definition for typing.
    Reference { path: String, def: AtomicFieldDef },
    /// A nested struct: a join from the schema or a repeated record.
    Struct(StructDef),
    /// A join added during this compilation, `on` not yet resolved.
    Join(PendingJoin),
    /// A turtle: a named query stored as a field.
    Query(TurtleDef),
    /// An alias for another entry under a new name.
    Rename {
        from: String,
        entry: Box<SpaceEntry>,
    },
    Wild(WildEntry),
    Parameter {
        param: Parameter,
        /// Whether a binding has been supplied (defined) or only declared
        /// (abstract).
        defined: bool,
    },
}

impl SpaceEntry {
    /// The type shape lookups report, `None` for entries that are not
    /// expression-addressable (structs, turtles, wildcards).
    pub fn type_desc(&self) -> Option<TypeDesc> {
        match self {
            Self::Column(def) | Self::Expression(def) | Self::Reference { def, .. } => {
                Some(TypeDesc {
                    data_type: def.data_type,
                    kind: def.kind,
                })
            }
            Self::Rename { entry, .. } => entry.type_desc(),
            Self::Parameter { param, .. } => Some(TypeDesc {
                data_type: param.data_type(),
                kind: ExpressionKind::Scalar,
            }),
            Self::Struct(_) | Self::Join(_) | Self::Query(_) | Self::Wild(_) => None,
        }
    }

    pub const fn is_struct_like(&self) -> bool {
        matches!(self, Self::Struct(_) | Self::Join(_))
    }

    /// Entries a `rename:` may target. Parameters and wildcards are not
    /// renamable.
    pub const fn is_renamable(&self) -> bool {
        !matches!(self, Self::Parameter { .. } | Self::Wild(_))
    }
}
