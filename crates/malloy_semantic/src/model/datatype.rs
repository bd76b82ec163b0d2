use crate::model::expr::PlanExpr;
use malloy_ast::TimeUnit;
use serde::{Deserialize, Serialize};
use std::fmt;

/// All field types a plan value can carry.
///
/// `Duration`, `Unknown` and `Error` are internal to the pass and never
/// appear in a finalized `StructDef`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AtomicFieldType {
    String,
    Number,
    Boolean,
    Date,
    Timestamp,
    Regex,
    Null,
    /// A dialect type the language cannot operate on. Values of this type may
    /// only be carried through and null-checked.
    Unsupported,
    Duration,
    Unknown,
    Error,
}

impl AtomicFieldType {
    pub const fn is_time(&self) -> bool {
        matches!(self, Self::Date | Self::Timestamp)
    }

    /// Types that never show up in output schemas.
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Duration | Self::Unknown | Self::Error)
    }
}

impl From<malloy_ast::TypeName> for AtomicFieldType {
    fn from(value: malloy_ast::TypeName) -> Self {
        match value {
            malloy_ast::TypeName::String => Self::String,
            malloy_ast::TypeName::Number => Self::Number,
            malloy_ast::TypeName::Boolean => Self::Boolean,
            malloy_ast::TypeName::Date => Self::Date,
            malloy_ast::TypeName::Timestamp => Self::Timestamp,
        }
    }
}

impl fmt::Display for AtomicFieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
            Self::Regex => "regular expression",
            Self::Null => "null",
            Self::Unsupported => "unsupported",
            Self::Duration => "duration",
            Self::Unknown => "unknown",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Type equality for checking purposes: an error type compares equal to
/// anything so poisoned values never produce follow-on mismatch reports.
pub fn type_eq(a: AtomicFieldType, b: AtomicFieldType) -> bool {
    a == b || a == AtomicFieldType::Error || b == AtomicFieldType::Error
}

/// Whether a value is one of the given types.
pub fn value_in(ty: AtomicFieldType, allowed: &[AtomicFieldType]) -> bool {
    allowed.contains(&ty)
}

/// What it takes to compute a value.
///
/// Combining expressions takes the most-derived kind: anything mixed with an
/// aggregate is an aggregate, an aggregate mixed with an analytic is
/// analytic, and ungrouped aggregates dominate everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExpressionKind {
    Scalar,
    Aggregate,
    Analytic,
    UngroupedAggregate,
}

impl ExpressionKind {
    /// Anything that isn't a plain scalar.
    pub const fn is_calculation(&self) -> bool {
        !matches!(self, Self::Scalar)
    }

    pub const fn is_aggregate_like(&self) -> bool {
        matches!(self, Self::Aggregate | Self::UngroupedAggregate)
    }
}

impl fmt::Display for ExpressionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Scalar => "scalar",
            Self::Aggregate => "aggregate",
            Self::Analytic => "analytic",
            Self::UngroupedAggregate => "ungrouped aggregate",
        };
        write!(f, "{s}")
    }
}

pub fn max_expression_type(a: ExpressionKind, b: ExpressionKind) -> ExpressionKind {
    a.max(b)
}

pub fn max_of_expression_types(
    kinds: impl IntoIterator<Item = ExpressionKind>,
) -> ExpressionKind {
    kinds
        .into_iter()
        .fold(ExpressionKind::Scalar, max_expression_type)
}

/// The scope a value can be evaluated in, least-derived first. Merging takes
/// the most-derived member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EvalSpace {
    Constant,
    Literal,
    Input,
    Output,
}

pub fn merge_eval_spaces(a: EvalSpace, b: EvalSpace) -> EvalSpace {
    a.max(b)
}

/// Alternate renderings of a value under other types, e.g. a date literal
/// carries its rendering as a timestamp.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MorphicMap {
    pub as_date: Option<PlanExpr>,
    pub as_timestamp: Option<PlanExpr>,
}

impl MorphicMap {
    pub fn get(&self, ty: AtomicFieldType) -> Option<&PlanExpr> {
        match ty {
            AtomicFieldType::Date => self.as_date.as_ref(),
            AtomicFieldType::Timestamp => self.as_timestamp.as_ref(),
            _ => None,
        }
    }
}

/// The tuple carried through expression evaluation: a typed plan fragment
/// plus kind, eval space, and the optional morphic / granularity sidecars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprValue {
    pub data_type: AtomicFieldType,
    pub kind: ExpressionKind,
    pub eval_space: EvalSpace,
    pub value: PlanExpr,
    pub morphic: Option<Box<MorphicMap>>,
    /// Set when the value is a time truncated to a unit, e.g. `now.month`.
    pub timeframe: Option<TimeUnit>,
}

impl ExprValue {
    pub fn new(
        data_type: AtomicFieldType,
        kind: ExpressionKind,
        eval_space: EvalSpace,
        value: PlanExpr,
    ) -> Self {
        ExprValue {
            data_type,
            kind,
            eval_space,
            value,
            morphic: None,
            timeframe: None,
        }
    }

    /// A scalar value computable without reading any input row.
    pub fn constant(data_type: AtomicFieldType, value: PlanExpr) -> Self {
        Self::new(data_type, ExpressionKind::Scalar, EvalSpace::Constant, value)
    }

    pub fn literal(data_type: AtomicFieldType, value: PlanExpr) -> Self {
        Self::new(data_type, ExpressionKind::Scalar, EvalSpace::Literal, value)
    }

    /// An error-typed value. Downstream operators combine with it silently so
    /// one bad subexpression produces exactly one diagnostic.
    pub fn error(kind: ExpressionKind) -> Self {
        Self::new(
            AtomicFieldType::Error,
            kind,
            EvalSpace::Constant,
            PlanExpr::ErrorSentinel,
        )
    }

    pub fn is_error(&self) -> bool {
        self.data_type == AtomicFieldType::Error
    }

    pub fn with_timeframe(mut self, unit: TimeUnit) -> Self {
        self.timeframe = Some(unit);
        self
    }

    pub fn with_morphic(mut self, morphic: MorphicMap) -> Self {
        self.morphic = Some(Box::new(morphic));
        self
    }

    /// The value rendered as `ty`, consulting the morphic map.
    pub fn rendered_as(&self, ty: AtomicFieldType) -> Option<PlanExpr> {
        if self.data_type == ty {
            return Some(self.value.clone());
        }
        self.morphic.as_ref().and_then(|m| m.get(ty).cloned())
    }

    /// Short human description, for diagnostics.
    pub fn inspect(&self) -> String {
        format!("{} {}", self.kind, self.data_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expression_kind_lattice() {
        use ExpressionKind::*;
        assert_eq!(max_expression_type(Scalar, Aggregate), Aggregate);
        assert_eq!(max_expression_type(Aggregate, Analytic), Analytic);
        assert_eq!(
            max_expression_type(Analytic, UngroupedAggregate),
            UngroupedAggregate
        );
        assert_eq!(
            max_expression_type(Scalar, UngroupedAggregate),
            UngroupedAggregate
        );
        // scalar is the identity
        for k in [Scalar, Aggregate, Analytic, UngroupedAggregate] {
            assert_eq!(max_expression_type(k, Scalar), k);
        }
    }

    #[test]
    fn eval_space_lattice() {
        use EvalSpace::*;
        assert_eq!(merge_eval_spaces(Constant, Literal), Literal);
        assert_eq!(merge_eval_spaces(Literal, Input), Input);
        assert_eq!(merge_eval_spaces(Input, Output), Output);
        assert_eq!(merge_eval_spaces(Output, Constant), Output);
    }

    #[test]
    fn max_of_kinds_folds_from_scalar() {
        use ExpressionKind::*;
        assert_eq!(max_of_expression_types([]), Scalar);
        assert_eq!(max_of_expression_types([Scalar, Aggregate, Scalar]), Aggregate);
    }

    #[test]
    fn error_type_compares_equal_to_anything() {
        assert!(type_eq(AtomicFieldType::String, AtomicFieldType::String));
        assert!(!type_eq(AtomicFieldType::String, AtomicFieldType::Number));
        assert!(type_eq(AtomicFieldType::Error, AtomicFieldType::Number));
        assert!(type_eq(AtomicFieldType::Date, AtomicFieldType::Error));
    }

    #[test]
    fn error_values_compare() {
        let v = ExprValue::error(ExpressionKind::Aggregate);
        assert!(v.is_error());
        assert_eq!(v.kind, ExpressionKind::Aggregate);
    }
}
