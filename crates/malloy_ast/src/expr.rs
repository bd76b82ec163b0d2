use crate::location::Location;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Implements `Display` by lowercasing the `Debug` name. Only usable for
/// fieldless enums.
macro_rules! fmt_lowercase_debug {
    () => {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", format!("{self:?}").to_lowercase())
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOperator {
    /// Equal, e.g. `a = b`
    Eq,
    /// Not equal, e.g. `a != b`
    NotEq,
    /// Match, e.g. `name ~ 'a%'`
    Match,
    /// Negated match, e.g. `name !~ 'a%'`
    NotMatch,
    /// Less than, e.g. `a < b`
    Lt,
    /// Less equal, e.g. `a <= b`
    LtEq,
    /// Greater than, e.g. `a > b`
    Gt,
    /// Greater equal, e.g. `a >= b`
    GtEq,
    /// Plus, e.g. `a + b`
    Plus,
    /// Minus, e.g. `a - b`
    Minus,
    /// Multiply, e.g. `a * b`
    Multiply,
    /// Divide, e.g. `a / b`
    Divide,
    /// Modulo, e.g. `a % b`
    Modulo,
    /// And, e.g. `a and b`
    And,
    /// Or, e.g. `a or b`
    Or,
}

/// Operator classes the binary dispatcher routes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorClass {
    Equality,
    Comparison,
    Additive,
    Multiplicative,
    Boolean,
}

impl BinaryOperator {
    pub fn class(self) -> OperatorClass {
        match self {
            Self::Eq | Self::NotEq | Self::Match | Self::NotMatch => OperatorClass::Equality,
            Self::Lt | Self::LtEq | Self::Gt | Self::GtEq => OperatorClass::Comparison,
            Self::Plus | Self::Minus => OperatorClass::Additive,
            Self::Multiply | Self::Divide | Self::Modulo => OperatorClass::Multiplicative,
            Self::And | Self::Or => OperatorClass::Boolean,
        }
    }

    /// Whether this is the negative member of its operator pair.
    pub fn is_negated(self) -> bool {
        matches!(self, Self::NotEq | Self::NotMatch)
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Match => "~",
            Self::NotMatch => "!~",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::And => "and",
            Self::Or => "or",
        };
        write!(f, "{s}")
    }
}

/// Truncation / duration units, finest to coarsest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeUnit {
    /// Units coarse enough to apply to a `date` value.
    pub fn is_date_unit(self) -> bool {
        self >= TimeUnit::Day
    }

    /// Units with a fixed length in seconds.
    pub fn fixed_seconds(self) -> Option<u64> {
        match self {
            Self::Second => Some(1),
            Self::Minute => Some(60),
            Self::Hour => Some(3600),
            Self::Day => Some(86400),
            _ => None,
        }
    }
}

impl fmt::Display for TimeUnit {
    fmt_lowercase_debug!();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl fmt::Display for AggregateFunc {
    fmt_lowercase_debug!();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UngroupKind {
    /// `all(expr)` — remove all grouping.
    All,
    /// `exclude(expr, dims...)` — remove the named grouping dimensions.
    Exclude,
}

/// Time-range measurement functions, e.g. `seconds(a to b)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeFunc {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Quarters,
    Years,
}

impl RangeFunc {
    pub fn unit(self) -> TimeUnit {
        match self {
            Self::Seconds => TimeUnit::Second,
            Self::Minutes => TimeUnit::Minute,
            Self::Hours => TimeUnit::Hour,
            Self::Days => TimeUnit::Day,
            Self::Weeks => TimeUnit::Week,
            Self::Months => TimeUnit::Month,
            Self::Quarters => TimeUnit::Quarter,
            Self::Years => TimeUnit::Year,
        }
    }
}

impl fmt::Display for RangeFunc {
    fmt_lowercase_debug!();
}

/// Declared type names, e.g. the `number` in `price::number`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeName {
    String,
    Number,
    Boolean,
    Date,
    Timestamp,
}

impl fmt::Display for TypeName {
    fmt_lowercase_debug!();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlternationConj {
    Or,
    And,
}

/// An expression node with its source location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprNode {
    pub kind: ExprKind,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    /// Field or parameter reference, possibly a dotted join path.
    Id { path: Vec<String> },
    StringLit(String),
    /// Unparsed number literal.
    NumberLit(String),
    BooleanLit(bool),
    /// `r'pattern'`
    RegexLit(String),
    Null,
    /// `@2020-01-01` or `@2020-01-01 10:30:00`. `unit` is the granularity
    /// implied by the literal's shape.
    TimeLit {
        text: String,
        timestamp: bool,
        unit: Option<TimeUnit>,
    },
    Now,
    Binary {
        left: Box<ExprNode>,
        op: BinaryOperator,
        right: Box<ExprNode>,
    },
    Not(Box<ExprNode>),
    Negate(Box<ExprNode>),
    /// `3 days`
    Duration {
        magnitude: Box<ExprNode>,
        unit: TimeUnit,
    },
    /// `event_time.month`
    Trunc {
        expr: Box<ExprNode>,
        unit: TimeUnit,
    },
    /// `value::number`
    Cast {
        expr: Box<ExprNode>,
        ty: TypeName,
        safe: bool,
    },
    /// `sum(amount)`, `count()`, `orders.sum(amount)`
    Aggregate {
        func: AggregateFunc,
        source: Option<Vec<String>>,
        expr: Option<Box<ExprNode>>,
        distinct: bool,
    },
    /// `all(m)` / `exclude(m, state)`
    Ungrouped {
        kind: UngroupKind,
        expr: Box<ExprNode>,
        fields: Vec<String>,
    },
    /// `seconds(a to b)`
    TimeSpan {
        func: RangeFunc,
        start: Box<ExprNode>,
        end: Box<ExprNode>,
    },
    /// A comparison missing its left side, e.g. the `> 3` in `x ? > 3`.
    Partial {
        op: BinaryOperator,
        rhs: Box<ExprNode>,
    },
    /// `> 3 | < 1` — alternation trees applied against a left side.
    Alternation {
        conj: AlternationConj,
        members: Vec<ExprNode>,
    },
    /// Filtered expression, e.g. `sum(amount) { where: shipped }`.
    Filtered {
        expr: Box<ExprNode>,
        filters: Vec<ExprNode>,
    },
}

impl ExprNode {
    pub fn new(kind: ExprKind, loc: Location) -> Self {
        ExprNode { kind, loc }
    }

    /// Detached-location constructor, for synthesized nodes and tests.
    pub fn synth(kind: ExprKind) -> Self {
        ExprNode::new(kind, Location::detached())
    }

    pub fn id(path: &[&str]) -> Self {
        ExprNode::synth(ExprKind::Id {
            path: path.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn number(text: &str) -> Self {
        ExprNode::synth(ExprKind::NumberLit(text.to_string()))
    }

    pub fn string(text: &str) -> Self {
        ExprNode::synth(ExprKind::StringLit(text.to_string()))
    }

    pub fn binary(left: ExprNode, op: BinaryOperator, right: ExprNode) -> Self {
        ExprNode::synth(ExprKind::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        })
    }
}
