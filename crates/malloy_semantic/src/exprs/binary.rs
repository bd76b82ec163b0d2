//! The binary-operator dispatcher: equality, comparison, additive and
//! multiplicative routing, with null-safe equality, regex/LIKE rewrites,
//! date↔timestamp morphing, and temporal-offset granularity rules.

use super::ExprEvaluator;
use crate::model::{
    max_expression_type, merge_eval_spaces, AtomicFieldType, EvalSpace, ExprValue,
    ExpressionKind, PlanBinaryOp, PlanExpr, TimeOffsetOp,
};
use malloy_ast::{BinaryOperator, Location, OperatorClass, TimeUnit};

/// The negative form of a null-safe equality.
pub fn nullsafe_not(expr: PlanExpr) -> PlanExpr {
    PlanExpr::not(expr)
}

/// Renders both sides of a time pair under a common type, consulting the
/// morphic map when the sides disagree.
fn morph_time_pair(left: &ExprValue, right: &ExprValue) -> (PlanExpr, PlanExpr) {
    if left.data_type == right.data_type {
        return (left.value.clone(), right.value.clone());
    }
    let as_timestamp = |v: &ExprValue| {
        v.rendered_as(AtomicFieldType::Timestamp)
            .unwrap_or_else(|| PlanExpr::Cast {
                expr: Box::new(v.value.clone()),
                to: AtomicFieldType::Timestamp,
                safe: false,
            })
    };
    (as_timestamp(left), as_timestamp(right))
}

impl ExprEvaluator<'_> {
    /// `(left op right)` for already-evaluated sides. If either side is
    /// error-typed the result is an error-typed value and nothing further is
    /// reported.
    pub fn binary(
        &mut self,
        left: ExprValue,
        op: BinaryOperator,
        right: ExprValue,
        loc: &Location,
    ) -> ExprValue {
        if left.is_error() || right.is_error() {
            return ExprValue::error(max_expression_type(left.kind, right.kind));
        }

        let kind = max_expression_type(left.kind, right.kind);
        let eval_space = merge_eval_spaces(left.eval_space, right.eval_space);

        match op.class() {
            OperatorClass::Equality => self.equality(left, op, right, kind, eval_space, loc),
            OperatorClass::Comparison => self.comparison(left, op, right, kind, eval_space, loc),
            OperatorClass::Additive => self.additive(left, op, right, kind, eval_space, loc),
            OperatorClass::Multiplicative => {
                self.multiplicative(left, op, right, kind, eval_space, loc)
            }
            OperatorClass::Boolean => self.boolean_op(left, op, right, kind, eval_space, loc),
        }
    }

    fn equality(
        &mut self,
        left: ExprValue,
        op: BinaryOperator,
        right: ExprValue,
        kind: ExpressionKind,
        eval_space: EvalSpace,
        loc: &Location,
    ) -> ExprValue {
        let not = op.is_negated();
        let boolean = |value| ExprValue::new(AtomicFieldType::Boolean, kind, eval_space, value);

        // Comparing against a null literal is a null check.
        if right.data_type == AtomicFieldType::Null {
            return boolean(PlanExpr::IsNull {
                expr: Box::new(left.value),
                not,
            });
        }
        if left.data_type == AtomicFieldType::Null {
            return boolean(PlanExpr::IsNull {
                expr: Box::new(right.value),
                not,
            });
        }

        // Unsupported values may only be null-checked or compared to each
        // other.
        let unsupported = AtomicFieldType::Unsupported;
        if left.data_type == unsupported || right.data_type == unsupported {
            if left.data_type == unsupported
                && right.data_type == unsupported
                && matches!(op, BinaryOperator::Eq | BinaryOperator::NotEq)
            {
                let eq = PlanExpr::binary(left.value, PlanBinaryOp::Eq, right.value);
                return boolean(if not { nullsafe_not(eq) } else { eq });
            }
            self.diagnostics
                .log(loc, "Unsupported type not allowed in expression");
            return ExprValue::error(kind);
        }

        // Regex on either side is a dialect regexp match.
        let regex = AtomicFieldType::Regex;
        if right.data_type == regex && left.data_type == AtomicFieldType::String {
            return boolean(PlanExpr::RegexpMatch {
                expr: Box::new(left.value),
                pattern: Box::new(right.value),
                not,
            });
        }
        if left.data_type == regex && right.data_type == AtomicFieldType::String {
            return boolean(PlanExpr::RegexpMatch {
                expr: Box::new(right.value),
                pattern: Box::new(left.value),
                not,
            });
        }

        // String matching is LIKE.
        if left.data_type == AtomicFieldType::String
            && right.data_type == AtomicFieldType::String
            && matches!(op, BinaryOperator::Match | BinaryOperator::NotMatch)
        {
            return boolean(PlanExpr::Like {
                expr: Box::new(left.value),
                pattern: Box::new(right.value),
                not,
            });
        }

        // Times compare after morphing to a common type.
        if left.data_type.is_time() && right.data_type.is_time() {
            let (l, r) = morph_time_pair(&left, &right);
            let eq = PlanExpr::binary(l, PlanBinaryOp::Eq, r);
            return boolean(if not { nullsafe_not(eq) } else { eq });
        }

        let eq = PlanExpr::binary(left.value, PlanBinaryOp::Eq, right.value);
        boolean(if not { nullsafe_not(eq) } else { eq })
    }

    fn comparison(
        &mut self,
        left: ExprValue,
        op: BinaryOperator,
        right: ExprValue,
        kind: ExpressionKind,
        eval_space: EvalSpace,
        loc: &Location,
    ) -> ExprValue {
        let plan_op = match op {
            BinaryOperator::Lt => PlanBinaryOp::Lt,
            BinaryOperator::LtEq => PlanBinaryOp::LtEq,
            BinaryOperator::Gt => PlanBinaryOp::Gt,
            BinaryOperator::GtEq => PlanBinaryOp::GtEq,
            _ => unreachable!("comparison class"),
        };
        let boolean = |value| ExprValue::new(AtomicFieldType::Boolean, kind, eval_space, value);

        if left.data_type.is_time() && right.data_type.is_time() {
            let (l, r) = morph_time_pair(&left, &right);
            return boolean(PlanExpr::binary(l, plan_op, r));
        }

        let one_time = left.data_type.is_time() || right.data_type.is_time();
        let one_null = left.data_type == AtomicFieldType::Null
            || right.data_type == AtomicFieldType::Null;
        if one_time && !one_null {
            let other = if left.data_type.is_time() {
                right.data_type
            } else {
                left.data_type
            };
            self.diagnostics
                .log(loc, format!("Cannot compare a time to a {other}"));
            return boolean(PlanExpr::BooleanLit(false));
        }

        boolean(PlanExpr::binary(left.value, plan_op, right.value))
    }

    fn additive(
        &mut self,
        left: ExprValue,
        op: BinaryOperator,
        right: ExprValue,
        kind: ExpressionKind,
        eval_space: EvalSpace,
        loc: &Location,
    ) -> ExprValue {
        if left.data_type.is_time() {
            if right.data_type == AtomicFieldType::Duration {
                let unit = right.timeframe.unwrap_or(TimeUnit::Second);
                return self.offset_value(left, op, right.value, unit, kind, eval_space);
            }
            if right.data_type == AtomicFieldType::Number {
                // A bare number promotes to a duration of the left side's
                // granularity, or day for a date.
                let unit = left.timeframe.unwrap_or(
                    if left.data_type == AtomicFieldType::Date {
                        TimeUnit::Day
                    } else {
                        TimeUnit::Second
                    },
                );
                return self.offset_value(left, op, right.value, unit, kind, eval_space);
            }
            self.diagnostics.log(
                loc,
                format!(
                    "Time offset requires a duration, not a {}",
                    right.data_type
                ),
            );
            return ExprValue::error(kind);
        }

        if left.data_type == AtomicFieldType::Number
            && right.data_type == AtomicFieldType::Number
        {
            let plan_op = match op {
                BinaryOperator::Plus => PlanBinaryOp::Plus,
                _ => PlanBinaryOp::Minus,
            };
            return ExprValue::new(
                AtomicFieldType::Number,
                kind,
                eval_space,
                PlanExpr::binary(left.value, plan_op, right.value),
            );
        }

        self.diagnostics.log(
            loc,
            format!(
                "The '{op}' operator requires numeric operands, not {} and {}",
                left.data_type, right.data_type
            ),
        );
        ExprValue::error(kind)
    }

    /// `time ± duration`. The result keeps the left side's granularity only
    /// when the duration's unit matches it.
    fn offset_value(
        &mut self,
        left: ExprValue,
        op: BinaryOperator,
        magnitude: PlanExpr,
        unit: TimeUnit,
        kind: ExpressionKind,
        eval_space: EvalSpace,
    ) -> ExprValue {
        let offset_op = match op {
            BinaryOperator::Plus => TimeOffsetOp::Add,
            _ => TimeOffsetOp::Subtract,
        };

        // A sub-day offset against a date needs its timestamp rendering.
        let (base, data_type) =
            if left.data_type == AtomicFieldType::Date && !unit.is_date_unit() {
                (
                    left.rendered_as(AtomicFieldType::Timestamp)
                        .unwrap_or_else(|| PlanExpr::Cast {
                            expr: Box::new(left.value.clone()),
                            to: AtomicFieldType::Timestamp,
                            safe: false,
                        }),
                    AtomicFieldType::Timestamp,
                )
            } else {
                (left.value.clone(), left.data_type)
            };

        let mut out = ExprValue::new(
            data_type,
            kind,
            eval_space,
            PlanExpr::TimeOffset {
                base: Box::new(base),
                op: offset_op,
                magnitude: Box::new(magnitude),
                unit,
            },
        );
        if left.timeframe == Some(unit) {
            out = out.with_timeframe(unit);
        }
        out
    }

    /// `time ± <duration node>` routed here from the apply hook.
    pub(super) fn time_offset(
        &mut self,
        left: ExprValue,
        op: BinaryOperator,
        magnitude: ExprValue,
        unit: TimeUnit,
        loc: &Location,
    ) -> ExprValue {
        if left.is_error() || magnitude.is_error() {
            return ExprValue::error(max_expression_type(left.kind, magnitude.kind));
        }
        let kind = max_expression_type(left.kind, magnitude.kind);
        let eval_space = merge_eval_spaces(left.eval_space, magnitude.eval_space);

        if !left.data_type.is_time() {
            self.diagnostics.log(
                loc,
                format!("Cannot offset a {} by a duration", left.data_type),
            );
            return ExprValue::error(kind);
        }
        if magnitude.data_type != AtomicFieldType::Number {
            self.diagnostics
                .log(loc, "Duration magnitude must be a number");
            return ExprValue::error(kind);
        }

        self.offset_value(left, op, magnitude.value, unit, kind, eval_space)
    }

    fn multiplicative(
        &mut self,
        left: ExprValue,
        op: BinaryOperator,
        right: ExprValue,
        kind: ExpressionKind,
        eval_space: EvalSpace,
        loc: &Location,
    ) -> ExprValue {
        if left.data_type != AtomicFieldType::Number
            || right.data_type != AtomicFieldType::Number
        {
            self.diagnostics.log(
                loc,
                format!(
                    "The '{op}' operator requires numeric operands, not {} and {}",
                    left.data_type, right.data_type
                ),
            );
            return ExprValue::error(kind);
        }

        let value = match op {
            // Dialects own the divide-by-zero story, so division is its own
            // fragment rather than a raw operator.
            BinaryOperator::Divide => PlanExpr::Div {
                numerator: Box::new(left.value),
                denominator: Box::new(right.value),
            },
            BinaryOperator::Multiply => {
                PlanExpr::binary(left.value, PlanBinaryOp::Multiply, right.value)
            }
            _ => PlanExpr::binary(left.value, PlanBinaryOp::Modulo, right.value),
        };

        ExprValue::new(AtomicFieldType::Number, kind, eval_space, value)
    }

    fn boolean_op(
        &mut self,
        left: ExprValue,
        op: BinaryOperator,
        right: ExprValue,
        kind: ExpressionKind,
        eval_space: EvalSpace,
        loc: &Location,
    ) -> ExprValue {
        for side in [&left, &right] {
            if side.data_type != AtomicFieldType::Boolean {
                self.diagnostics.log(
                    loc,
                    format!("The '{op}' operator requires boolean operands"),
                );
                return ExprValue::error(kind);
            }
        }

        let plan_op = match op {
            BinaryOperator::And => PlanBinaryOp::And,
            _ => PlanBinaryOp::Or,
        };
        ExprValue::new(
            AtomicFieldType::Boolean,
            kind,
            eval_space,
            PlanExpr::binary(left.value, plan_op, right.value),
        )
    }
}
