use crate::model::datatype::{AtomicFieldType, ExpressionKind};
use malloy_ast::{AggregateFunc, TimeUnit, UngroupKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary operators that survive into the plan.
///
/// `/` is absent: division becomes [`PlanExpr::Div`] so dialects can decide
/// how to guard the zero divisor. Matching/likeness become dedicated nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanBinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    Modulo,
    And,
    Or,
}

impl fmt::Display for PlanBinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Multiply => "*",
            Self::Modulo => "%",
            Self::And => "and",
            Self::Or => "or",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeOffsetOp {
    Add,
    Subtract,
}

/// A language-independent expression fragment. The downstream SQL writer
/// renders these per dialect; the semantic layer never stringifies them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanExpr {
    /// Reference to an input column, possibly through a join path.
    Column { path: Vec<String> },
    /// Reference to an output (grouped) column of the current segment.
    OutputColumn { name: String },
    Parameter { name: String },
    StringLit(String),
    /// Number literals stay as source text; the writer renders them.
    NumberLit(String),
    BooleanLit(bool),
    RegexLit(String),
    Null,
    /// A date or timestamp literal.
    TimeLit {
        text: String,
        ty: AtomicFieldType,
    },
    Now,
    Binary {
        left: Box<PlanExpr>,
        op: PlanBinaryOp,
        right: Box<PlanExpr>,
    },
    Not(Box<PlanExpr>),
    Negate(Box<PlanExpr>),
    IsNull {
        expr: Box<PlanExpr>,
        not: bool,
    },
    Like {
        expr: Box<PlanExpr>,
        pattern: Box<PlanExpr>,
        not: bool,
    },
    /// Regular-expression match; rendered with the dialect's regexp function.
    RegexpMatch {
        expr: Box<PlanExpr>,
        pattern: Box<PlanExpr>,
        not: bool,
    },
    /// Division; rendered with the dialect's safe-divide treatment rather
    /// than a raw `/`.
    Div {
        numerator: Box<PlanExpr>,
        denominator: Box<PlanExpr>,
    },
    Cast {
        expr: Box<PlanExpr>,
        to: AtomicFieldType,
        safe: bool,
    },
    TimeTrunc {
        expr: Box<PlanExpr>,
        unit: TimeUnit,
    },
    /// `seconds(a to b)` and friends; floor semantics.
    TimeDiff {
        unit: TimeUnit,
        start: Box<PlanExpr>,
        end: Box<PlanExpr>,
    },
    /// Time plus/minus a duration of `unit`.
    TimeOffset {
        base: Box<PlanExpr>,
        op: TimeOffsetOp,
        magnitude: Box<PlanExpr>,
        unit: TimeUnit,
    },
    Aggregate {
        func: AggregateFunc,
        expr: Option<Box<PlanExpr>>,
        distinct: bool,
        /// Join path prefix for asymmetric aggregates, e.g. `orders.sum(x)`.
        source: Option<Vec<String>>,
    },
    /// `all(...)` / `exclude(...)` ungrouping around an aggregate.
    Ungrouped {
        kind: UngroupKind,
        expr: Box<PlanExpr>,
        fields: Vec<String>,
    },
    Filtered {
        expr: Box<PlanExpr>,
        filters: Vec<FilterExpr>,
    },
    /// Poisoned fragment standing in for an expression that failed to
    /// compile. Rendering one is a bug; it exists so later stages see a
    /// well-formed shape.
    ErrorSentinel,
}

impl PlanExpr {
    pub fn column(path: impl IntoIterator<Item = impl Into<String>>) -> Self {
        PlanExpr::Column {
            path: path.into_iter().map(Into::into).collect(),
        }
    }

    pub fn binary(left: PlanExpr, op: PlanBinaryOp, right: PlanExpr) -> Self {
        PlanExpr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn not(expr: PlanExpr) -> Self {
        PlanExpr::Not(Box::new(expr))
    }

    pub const fn is_error(&self) -> bool {
        matches!(self, PlanExpr::ErrorSentinel)
    }
}

/// A filter attached to a segment, source, or filtered expression. The kind
/// records whether the condition aggregates, which decides WHERE vs HAVING
/// placement downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterExpr {
    pub expr: PlanExpr,
    pub kind: ExpressionKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn division_is_not_a_binary_op() {
        // The plan operator set intentionally has no raw divide.
        let div = PlanExpr::Div {
            numerator: Box::new(PlanExpr::NumberLit("1".into())),
            denominator: Box::new(PlanExpr::NumberLit("0".into())),
        };
        assert!(matches!(div, PlanExpr::Div { .. }));
    }
}
