//! Expression evaluation: AST expression nodes in, [`ExprValue`]s out.
//!
//! The evaluator resolves names against a field space and produces typed
//! plan fragments. Type problems are diagnostics plus error-typed values;
//! an error-typed operand silences every operator applied to it so one bad
//! subexpression yields exactly one message.

mod binary;

pub use binary::nullsafe_not;

use crate::diagnostics::Diagnostics;
use crate::model::{
    AtomicFieldType, EvalSpace, ExprValue, ExpressionKind, FilterExpr, MorphicMap, PlanExpr,
    merge_eval_spaces,
};
use crate::spaces::{Lookup, SpaceEntry, SpaceRef, Spaces};
use malloy_ast as ast;
use malloy_ast::{AggregateFunc, ExprKind, ExprNode, Location, TimeUnit, UngroupKind};
use std::cell::RefCell;
use std::rc::Rc;

/// Watches for the field currently being defined appearing in its own
/// definition. The hit flag lets the definer suppress follow-on messages.
#[derive(Debug)]
pub struct DefGuard {
    pub name: String,
    pub hit: bool,
}

pub struct ExprEvaluator<'a> {
    pub spaces: &'a mut Spaces,
    pub space: SpaceRef,
    pub diagnostics: &'a mut Diagnostics,
    pub def_guard: Option<DefGuard>,
}

impl<'a> ExprEvaluator<'a> {
    pub fn new(
        spaces: &'a mut Spaces,
        space: SpaceRef,
        diagnostics: &'a mut Diagnostics,
    ) -> Self {
        ExprEvaluator {
            spaces,
            space,
            diagnostics,
            def_guard: None,
        }
    }

    pub fn with_guard(mut self, name: impl Into<String>) -> Self {
        self.def_guard = Some(DefGuard {
            name: name.into(),
            hit: false,
        });
        self
    }

    pub fn guard_hit(&self) -> bool {
        self.def_guard.as_ref().is_some_and(|g| g.hit)
    }

    pub fn eval(&mut self, node: &ExprNode) -> ExprValue {
        let loc = &node.loc;
        match &node.kind {
            ExprKind::Id { path } => self.eval_id(path, loc),
            ExprKind::StringLit(s) => {
                ExprValue::literal(AtomicFieldType::String, PlanExpr::StringLit(s.clone()))
            }
            ExprKind::NumberLit(n) => {
                ExprValue::literal(AtomicFieldType::Number, PlanExpr::NumberLit(n.clone()))
            }
            ExprKind::BooleanLit(b) => {
                ExprValue::literal(AtomicFieldType::Boolean, PlanExpr::BooleanLit(*b))
            }
            ExprKind::RegexLit(r) => {
                ExprValue::literal(AtomicFieldType::Regex, PlanExpr::RegexLit(r.clone()))
            }
            ExprKind::Null => ExprValue::constant(AtomicFieldType::Null, PlanExpr::Null),
            ExprKind::TimeLit {
                text,
                timestamp,
                unit,
            } => {
                let ty = if *timestamp {
                    AtomicFieldType::Timestamp
                } else {
                    AtomicFieldType::Date
                };
                let mut value = ExprValue::literal(
                    ty,
                    PlanExpr::TimeLit {
                        text: text.clone(),
                        ty,
                    },
                );
                if let Some(unit) = unit {
                    value = value.with_timeframe(*unit);
                }
                if !*timestamp {
                    value = value.with_morphic(MorphicMap {
                        as_date: None,
                        as_timestamp: Some(PlanExpr::TimeLit {
                            text: text.clone(),
                            ty: AtomicFieldType::Timestamp,
                        }),
                    });
                }
                value
            }
            ExprKind::Now => ExprValue::literal(AtomicFieldType::Timestamp, PlanExpr::Now),
            ExprKind::Binary { left, op, right } => {
                let left = self.eval(left);
                self.apply(left, *op, right)
            }
            ExprKind::Not(inner) => {
                let value = self.eval(inner);
                if value.is_error() {
                    return ExprValue::error(value.kind);
                }
                if !matches!(
                    value.data_type,
                    AtomicFieldType::Boolean | AtomicFieldType::Null
                ) {
                    self.diagnostics
                        .log(loc, format!("'not' requires a boolean, not a {}", value.data_type));
                    return ExprValue::error(value.kind);
                }
                ExprValue::new(
                    AtomicFieldType::Boolean,
                    value.kind,
                    value.eval_space,
                    PlanExpr::not(value.value),
                )
            }
            ExprKind::Negate(inner) => {
                let value = self.eval(inner);
                if value.is_error() {
                    return ExprValue::error(value.kind);
                }
                if value.data_type != AtomicFieldType::Number {
                    self.diagnostics
                        .log(loc, format!("Cannot negate a {}", value.data_type));
                    return ExprValue::error(value.kind);
                }
                ExprValue::new(
                    AtomicFieldType::Number,
                    value.kind,
                    value.eval_space,
                    PlanExpr::Negate(Box::new(value.value)),
                )
            }
            ExprKind::Duration { magnitude, unit } => {
                let magnitude = self.eval(magnitude);
                if magnitude.is_error() {
                    return ExprValue::error(magnitude.kind);
                }
                if magnitude.data_type != AtomicFieldType::Number {
                    self.diagnostics
                        .log(loc, "Duration magnitude must be a number");
                    return ExprValue::error(magnitude.kind);
                }
                ExprValue {
                    data_type: AtomicFieldType::Duration,
                    ..magnitude
                }
                .with_timeframe(*unit)
            }
            ExprKind::Trunc { expr, unit } => self.eval_trunc(expr, *unit, loc),
            ExprKind::Cast { expr, ty, safe } => {
                let value = self.eval(expr);
                if value.is_error() {
                    return ExprValue::error(value.kind);
                }
                let to = AtomicFieldType::from(*ty);
                ExprValue {
                    data_type: to,
                    value: PlanExpr::Cast {
                        expr: Box::new(value.value.clone()),
                        to,
                        safe: *safe,
                    },
                    morphic: None,
                    timeframe: None,
                    ..value
                }
            }
            ExprKind::Aggregate {
                func,
                source,
                expr,
                distinct,
            } => self.eval_aggregate(*func, source.as_deref(), expr.as_deref(), *distinct, loc),
            ExprKind::Ungrouped { kind, expr, fields } => {
                self.eval_ungrouped(*kind, expr, fields, loc)
            }
            ExprKind::TimeSpan { func, start, end } => self.eval_time_span(*func, start, end, loc),
            ExprKind::Partial { .. } | ExprKind::Alternation { .. } => {
                self.diagnostics.log(
                    loc,
                    "Partial comparison must be applied to a value",
                );
                ExprValue::error(ExpressionKind::Scalar)
            }
            ExprKind::Filtered { expr, filters } => self.eval_filtered(expr, filters, loc),
        }
    }

    /// Applies `right` to an already-evaluated left side. Durations,
    /// alternation trees and partial comparisons rewrite the application;
    /// everything else evaluates and goes through the binary dispatcher.
    pub fn apply(
        &mut self,
        left: ExprValue,
        op: ast::BinaryOperator,
        right: &ExprNode,
    ) -> ExprValue {
        match &right.kind {
            ExprKind::Duration { magnitude, unit }
                if matches!(op.class(), ast::OperatorClass::Additive) =>
            {
                let magnitude = self.eval(magnitude);
                self.time_offset(left, op, magnitude, *unit, &right.loc)
            }
            ExprKind::Partial { op: partial_op, rhs } => self.apply(left, *partial_op, rhs),
            ExprKind::Alternation { conj, members } => {
                let mut combined: Option<ExprValue> = None;
                for member in members {
                    let applied = self.apply(left.clone(), op, member);
                    combined = Some(match combined {
                        None => applied,
                        Some(prev) => self.combine_alternation(prev, *conj, applied, &right.loc),
                    });
                }
                combined.unwrap_or_else(|| {
                    self.diagnostics.log(&right.loc, "Empty alternation");
                    ExprValue::error(left.kind)
                })
            }
            _ => {
                let right_value = self.eval(right);
                self.binary(left, op, right_value, &right.loc)
            }
        }
    }

    fn combine_alternation(
        &mut self,
        left: ExprValue,
        conj: ast::AlternationConj,
        right: ExprValue,
        loc: &Location,
    ) -> ExprValue {
        let op = match conj {
            ast::AlternationConj::Or => ast::BinaryOperator::Or,
            ast::AlternationConj::And => ast::BinaryOperator::And,
        };
        self.binary(left, op, right, loc)
    }

    fn eval_id(&mut self, path: &[String], loc: &Location) -> ExprValue {
        if let Some(guard) = self.def_guard.as_mut() {
            if path.first().map(String::as_str) == Some(guard.name.as_str()) {
                guard.hit = true;
                let name = guard.name.clone();
                self.diagnostics
                    .log(loc, format!("Circular reference to '{name}' in definition"));
                return ExprValue::error(ExpressionKind::Scalar);
            }
        }

        match self.spaces.lookup(self.space, path, loc) {
            Lookup::Error(msg) => {
                self.diagnostics.log(loc, msg);
                ExprValue::error(ExpressionKind::Scalar)
            }
            Lookup::Found(entry) => match &entry {
                SpaceEntry::Parameter { param, .. } => ExprValue::new(
                    param.data_type(),
                    ExpressionKind::Scalar,
                    EvalSpace::Constant,
                    PlanExpr::Parameter {
                        name: param.name().to_string(),
                    },
                ),
                _ => match entry.type_desc() {
                    Some(td) => {
                        let mut value = ExprValue::new(
                            td.data_type,
                            td.kind,
                            EvalSpace::Input,
                            PlanExpr::Column {
                                path: path.to_vec(),
                            },
                        );
                        if td.data_type == AtomicFieldType::Date {
                            let cast_expr = value.value.clone();
                            value = value.with_morphic(MorphicMap {
                                as_date: None,
                                as_timestamp: Some(PlanExpr::Cast {
                                    expr: Box::new(cast_expr),
                                    to: AtomicFieldType::Timestamp,
                                    safe: false,
                                }),
                            });
                        }
                        value
                    }
                    None => {
                        self.diagnostics.log(
                            loc,
                            format!("Cannot use '{}' as an expression", path.join(".")),
                        );
                        ExprValue::error(ExpressionKind::Scalar)
                    }
                },
            },
        }
    }

    fn eval_trunc(&mut self, expr: &ExprNode, unit: TimeUnit, loc: &Location) -> ExprValue {
        let value = self.eval(expr);
        if value.is_error() {
            return ExprValue::error(value.kind);
        }
        if !value.data_type.is_time() {
            self.diagnostics
                .log(loc, format!("Cannot truncate a {}", value.data_type));
            return ExprValue::error(value.kind);
        }

        // Truncating a date below day granularity needs its timestamp
        // rendering.
        let (base, data_type) = if value.data_type == AtomicFieldType::Date && !unit.is_date_unit()
        {
            match value.rendered_as(AtomicFieldType::Timestamp) {
                Some(ts) => (ts, AtomicFieldType::Timestamp),
                None => {
                    self.diagnostics
                        .log(loc, format!("Cannot truncate a date by {unit}"));
                    return ExprValue::error(value.kind);
                }
            }
        } else {
            (value.value.clone(), value.data_type)
        };

        ExprValue {
            data_type,
            value: PlanExpr::TimeTrunc {
                expr: Box::new(base),
                unit,
            },
            morphic: None,
            timeframe: None,
            ..value
        }
        .with_timeframe(unit)
    }

    fn eval_aggregate(
        &mut self,
        func: AggregateFunc,
        source: Option<&[String]>,
        expr: Option<&ExprNode>,
        distinct: bool,
        loc: &Location,
    ) -> ExprValue {
        if let Some(path) = source {
            match self.spaces.lookup(self.space, path, loc) {
                Lookup::Found(entry) if entry.is_struct_like() => {}
                Lookup::Found(_) => {
                    self.diagnostics.log(
                        loc,
                        format!("Aggregate source '{}' must be a join", path.join(".")),
                    );
                    return ExprValue::error(ExpressionKind::Aggregate);
                }
                Lookup::Error(msg) => {
                    self.diagnostics.log(loc, msg);
                    return ExprValue::error(ExpressionKind::Aggregate);
                }
            }
        }

        let operand = match expr {
            Some(node) => Some(self.eval(node)),
            None => None,
        };

        if let Some(op) = &operand {
            if op.is_error() {
                return ExprValue::error(ExpressionKind::Aggregate);
            }
            if op.kind.is_calculation() {
                self.diagnostics
                    .log(loc, "Aggregate expressions cannot be nested");
                return ExprValue::error(ExpressionKind::Aggregate);
            }
        }

        let data_type = match func {
            AggregateFunc::Count => AtomicFieldType::Number,
            AggregateFunc::Sum | AggregateFunc::Avg => match &operand {
                Some(op) if op.data_type == AtomicFieldType::Number => AtomicFieldType::Number,
                Some(op) => {
                    self.diagnostics
                        .log(loc, format!("{func}() requires a number, not a {}", op.data_type));
                    return ExprValue::error(ExpressionKind::Aggregate);
                }
                None => {
                    self.diagnostics
                        .log(loc, format!("{func}() requires an expression"));
                    return ExprValue::error(ExpressionKind::Aggregate);
                }
            },
            AggregateFunc::Min | AggregateFunc::Max => match &operand {
                Some(op) => op.data_type,
                None => {
                    self.diagnostics
                        .log(loc, format!("{func}() requires an expression"));
                    return ExprValue::error(ExpressionKind::Aggregate);
                }
            },
        };

        if distinct && operand.is_none() {
            self.diagnostics
                .log(loc, "count(distinct) requires an expression");
            return ExprValue::error(ExpressionKind::Aggregate);
        }

        ExprValue::new(
            data_type,
            ExpressionKind::Aggregate,
            EvalSpace::Output,
            PlanExpr::Aggregate {
                func,
                expr: operand.map(|op| Box::new(op.value)),
                distinct,
                source: source.map(<[String]>::to_vec),
            },
        )
    }

    fn eval_ungrouped(
        &mut self,
        kind: UngroupKind,
        expr: &ExprNode,
        fields: &[String],
        loc: &Location,
    ) -> ExprValue {
        let fn_name = match kind {
            UngroupKind::All => "all",
            UngroupKind::Exclude => "exclude",
        };

        let inner = self.eval(expr);
        if inner.is_error() {
            return ExprValue::error(ExpressionKind::UngroupedAggregate);
        }
        if !inner.kind.is_aggregate_like() {
            self.diagnostics
                .log(loc, format!("{fn_name}() requires an aggregate expression"));
            return ExprValue::error(ExpressionKind::UngroupedAggregate);
        }

        for field in fields {
            self.register_ungroup_check(fn_name, field, loc);
        }

        ExprValue::new(
            inner.data_type,
            ExpressionKind::UngroupedAggregate,
            EvalSpace::Output,
            PlanExpr::Ungrouped {
                kind,
                expr: Box::new(inner.value),
                fields: fields.to_vec(),
            },
        )
    }

    /// An ungrouping dimension name must appear in the output of some
    /// enclosing query. Every candidate level gets a completion; the check
    /// reports once, at the reference site, if no level satisfied it.
    fn register_ungroup_check(&mut self, fn_name: &str, field: &str, loc: &Location) {
        let mut levels = vec![self.space];
        let mut current = self.space;
        while let Some(parent) = self.spaces.nest_parent(current) {
            levels.push(parent);
            current = parent;
        }

        let check = Rc::new(RefCell::new(UngroupCheck {
            fn_name: fn_name.to_string(),
            field: field.to_string(),
            location: loc.clone(),
            pending: levels.len(),
            satisfied: false,
        }));

        for level in levels {
            let check = Rc::clone(&check);
            // Completion registration failing means the arena is gone; that
            // cannot happen within a pass.
            let _ = self.spaces.when_complete(
                level,
                Box::new(move |def, diagnostics| {
                    check.borrow_mut().observe(def, diagnostics);
                }),
                self.diagnostics,
            );
        }
    }

    fn eval_filtered(
        &mut self,
        expr: &ExprNode,
        filters: &[ExprNode],
        loc: &Location,
    ) -> ExprValue {
        let inner = self.eval(expr);
        if inner.is_error() {
            return ExprValue::error(inner.kind);
        }
        if !inner.kind.is_calculation() {
            self.diagnostics
                .log(loc, "Filtered expressions require an aggregate");
            return ExprValue::error(inner.kind);
        }

        let mut filter_list = Vec::new();
        for clause in filters {
            let cond = self.eval(clause);
            if cond.is_error() {
                continue;
            }
            if cond.kind.is_calculation() {
                self.diagnostics.log(
                    &clause.loc,
                    "Aggregate expressions are not allowed in `where:`",
                );
                continue;
            }
            if cond.data_type != AtomicFieldType::Boolean {
                self.diagnostics
                    .log(&clause.loc, "Filter must be a boolean expression");
                continue;
            }
            filter_list.push(FilterExpr {
                expr: cond.value,
                kind: cond.kind,
            });
        }

        ExprValue {
            value: PlanExpr::Filtered {
                expr: Box::new(inner.value.clone()),
                filters: filter_list,
            },
            morphic: None,
            timeframe: None,
            ..inner
        }
    }

    /// Condition-parameter binding: the supplied partial (or plain value)
    /// applied against the parameter itself.
    pub fn eval_condition(
        &mut self,
        name: &str,
        decl_type: AtomicFieldType,
        node: &ExprNode,
    ) -> ExprValue {
        let target = ExprValue::new(
            decl_type,
            ExpressionKind::Scalar,
            EvalSpace::Constant,
            PlanExpr::Parameter {
                name: name.to_string(),
            },
        );
        self.apply(target, ast::BinaryOperator::Eq, node)
    }

    fn eval_time_span(
        &mut self,
        func: ast::RangeFunc,
        start: &ExprNode,
        end: &ExprNode,
        loc: &Location,
    ) -> ExprValue {
        let start = self.eval(start);
        let end = self.eval(end);

        if start.is_error() || end.is_error() {
            return ExprValue::error(crate::model::max_expression_type(start.kind, end.kind));
        }

        let unit = func.unit();
        if unit.fixed_seconds().is_none() {
            // Calendar units need boundary semantics this layer does not
            // define.
            self.diagnostics
                .log(loc, format!("Cannot measure a range in {func}"));
            return ExprValue::error(crate::model::max_expression_type(start.kind, end.kind));
        }

        let mut ok = true;
        for (side, value) in [("start", &start), ("end", &end)] {
            if !value.data_type.is_time() {
                self.diagnostics.log(
                    loc,
                    format!("{func}() {side} must be a time, not a {}", value.data_type),
                );
                ok = false;
            }
        }
        if !ok {
            return ExprValue::error(crate::model::max_expression_type(start.kind, end.kind));
        }

        let start_expr = start
            .rendered_as(AtomicFieldType::Timestamp)
            .unwrap_or_else(|| start.value.clone());
        let end_expr = end
            .rendered_as(AtomicFieldType::Timestamp)
            .unwrap_or_else(|| end.value.clone());

        ExprValue::new(
            AtomicFieldType::Number,
            crate::model::max_expression_type(start.kind, end.kind),
            merge_eval_spaces(start.eval_space, end.eval_space),
            PlanExpr::TimeDiff {
                unit,
                start: Box::new(start_expr),
                end: Box::new(end_expr),
            },
        )
    }
}

#[derive(Debug)]
struct UngroupCheck {
    fn_name: String,
    field: String,
    location: Location,
    pending: usize,
    satisfied: bool,
}

impl UngroupCheck {
    fn observe(&mut self, def: &crate::model::StructDef, diagnostics: &mut Diagnostics) {
        if def.has_field(&self.field) {
            self.satisfied = true;
        }
        self.pending = self.pending.saturating_sub(1);
        if self.pending == 0 && !self.satisfied {
            diagnostics.log(
                &self.location,
                format!(
                    "{}() '{}' is missing from query output",
                    self.fn_name, self.field
                ),
            );
        }
    }
}
