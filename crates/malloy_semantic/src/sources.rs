//! Source resolution: tables, SQL blocks, named sources with parameter
//! binding, query sources, and refined explores. Every resolver returns a
//! [`StructDef`] by value; failures log and return the error sentinel so
//! downstream stages keep checking.

use crate::context::{Analyzer, ModelValue};
use crate::dialect::get_dialect;
use crate::exprs::ExprEvaluator;
use crate::model::{
    AtomicFieldDef, AtomicFieldType, FilterExpr, Parameter, PlanExpr, StructDef, StructRef,
    StructSource, TurtleDef,
};
use crate::sentinel::ErrorFactory;
use crate::spaces::{Lookup, PendingJoin, SpaceEntry, SpaceRef};
use crate::zones::ZoneEntry;
use malloy_ast as ast;
use malloy_ast::{DeclareKind, ExploreProperty, Location, ParameterDecl, ParameterValue};

pub fn resolve_source(an: &mut Analyzer<'_>, sd: &ast::SourceDesc) -> StructDef {
    match sd {
        ast::SourceDesc::Table { name, loc } => resolve_table(an, name, loc),
        ast::SourceDesc::Sql { name, loc } => resolve_sql(an, name, loc),
        ast::SourceDesc::Named { name, params, loc } => resolve_named(an, name, params, loc),
        ast::SourceDesc::FromQuery { query, loc } => resolve_from_query(an, query, loc),
        ast::SourceDesc::Refined { base, props, loc } => {
            let base_struct = resolve_source(an, base);
            if ErrorFactory::is_error_struct_def(&base_struct) || an.is_paused() {
                return base_struct;
            }
            apply_refinement(an, &base_struct, props, loc)
        }
    }
}

/// A bare model reference when the source is exported and unparameterized;
/// otherwise the struct inlined into the plan.
pub fn struct_ref_for(
    an: &Analyzer<'_>,
    sd: &ast::SourceDesc,
    resolved: &StructDef,
) -> StructRef {
    if let ast::SourceDesc::Named { name, params, .. } = sd {
        if params.is_empty() && resolved.parameters.is_empty() {
            if let Some(entry) = an.model.entry(name) {
                if entry.exported {
                    return StructRef::Ref(name.clone());
                }
            }
        }
    }
    StructRef::Inline(Box::new(resolved.clone()))
}

fn resolve_table(an: &mut Analyzer<'_>, name: &str, loc: &Location) -> StructDef {
    match an.schema_zone.get_entry(name) {
        Some(ZoneEntry::Present(mut def)) => {
            def.location = Some(loc.clone());
            if get_dialect(&def.dialect).is_none() {
                an.diagnostics
                    .log(loc, format!("Unknown dialect '{}'", def.dialect));
            }
            def
        }
        Some(ZoneEntry::Error(msg)) => {
            let msg = if msg.is_empty() {
                "Schema read failure".to_string()
            } else {
                msg
            };
            an.diagnostics.log(loc, msg);
            ErrorFactory::struct_def()
        }
        Some(ZoneEntry::Reference) | None => {
            an.need_table(name, loc);
            ErrorFactory::struct_def()
        }
    }
}

fn resolve_sql(an: &mut Analyzer<'_>, name: &str, loc: &Location) -> StructDef {
    match an.model.entry(name).map(|e| &e.value) {
        Some(ModelValue::Sql) => {}
        Some(_) => {
            an.diagnostics
                .log(loc, format!("'{name}' is not a SQL block"));
            return ErrorFactory::struct_def();
        }
        None => {
            an.diagnostics
                .log(loc, format!("Undefined SQL block '{name}'"));
            return ErrorFactory::struct_def();
        }
    }

    match an.sql_zone.get_entry(name) {
        Some(ZoneEntry::Present(mut def)) => {
            def.location = Some(loc.clone());
            if get_dialect(&def.dialect).is_none() {
                an.diagnostics
                    .log(loc, format!("Unknown dialect '{}'", def.dialect));
            }
            def
        }
        Some(ZoneEntry::Error(msg)) => {
            let msg = if msg.is_empty() {
                "Schema read failure".to_string()
            } else {
                msg
            };
            an.diagnostics.log(loc, msg);
            ErrorFactory::struct_def()
        }
        Some(ZoneEntry::Reference) | None => {
            // The defining statement paused for this schema already; landing
            // here means the block was never defined in this document.
            an.diagnostics
                .log(loc, format!("Undefined SQL block '{name}'"));
            ErrorFactory::struct_def()
        }
    }
}

fn resolve_named(
    an: &mut Analyzer<'_>,
    name: &str,
    params: &[ParameterValue],
    loc: &Location,
) -> StructDef {
    let mut def = match an.model.entry(name).map(|e| e.value.clone()) {
        Some(ModelValue::Source(def)) => def,
        Some(ModelValue::Query(_)) => {
            an.diagnostics
                .log(loc, "Must use from() to explore a query");
            return ErrorFactory::struct_def();
        }
        Some(ModelValue::Sql) => {
            an.diagnostics
                .log(loc, "Must use from_sql() to explore a SQL block");
            return ErrorFactory::struct_def();
        }
        None => {
            an.diagnostics
                .log(loc, format!("Undefined source '{name}'"));
            return ErrorFactory::struct_def();
        }
    };

    for pv in params {
        let Some(decl) = def.parameters.get(&pv.name).cloned() else {
            an.diagnostics
                .log(&pv.loc, format!("Undeclared parameter '{}'", pv.name));
            continue;
        };
        match decl {
            Parameter::Value {
                constant: true, ..
            } => {
                an.diagnostics.log(
                    &pv.loc,
                    format!("Cannot override constant parameter '{}'", pv.name),
                );
            }
            Parameter::Value {
                data_type,
                constant,
                ..
            } => {
                let space = an.constant_space();
                let value =
                    ExprEvaluator::new(&mut an.spaces, space, &mut an.diagnostics)
                        .eval(&pv.value);
                if value.is_error() {
                    continue;
                }
                let expr = if value.data_type != data_type {
                    PlanExpr::Cast {
                        expr: Box::new(value.value),
                        to: data_type,
                        safe: true,
                    }
                } else {
                    value.value
                };
                def.parameters.insert(
                    pv.name.clone(),
                    Parameter::Value {
                        name: pv.name.clone(),
                        data_type,
                        value: Some(expr),
                        constant,
                    },
                );
            }
            Parameter::Condition { data_type, .. } => {
                let space = an.constant_space();
                let value = ExprEvaluator::new(&mut an.spaces, space, &mut an.diagnostics)
                    .eval_condition(&pv.name, data_type, &pv.value);
                if value.is_error() {
                    continue;
                }
                def.parameters.insert(
                    pv.name.clone(),
                    Parameter::Condition {
                        name: pv.name.clone(),
                        data_type,
                        condition: Some(value.value),
                    },
                );
            }
        }
    }

    for (pname, param) in &def.parameters {
        if param.is_required() {
            an.diagnostics
                .log(loc, format!("Required parameter '{pname}' not provided"));
        }
    }

    def
}

fn resolve_from_query(
    an: &mut Analyzer<'_>,
    query: &ast::QueryDef,
    loc: &Location,
) -> StructDef {
    let compiled = match crate::pipeline::compile_query(an, query) {
        Ok(compiled) => compiled,
        Err(err) => {
            an.diagnostics
                .log(loc, format!("Internal error: {err}"));
            return ErrorFactory::struct_def();
        }
    };
    if ErrorFactory::is_error_struct_def(&compiled.output) {
        return compiled.output;
    }

    StructDef {
        struct_source: StructSource::Query {
            query: Box::new(compiled.query),
        },
        location: Some(loc.clone()),
        ..compiled.output
    }
}

fn apply_refinement(
    an: &mut Analyzer<'_>,
    base: &StructDef,
    props: &[ExploreProperty],
    loc: &Location,
) -> StructDef {
    // At most one accept/except per explore.
    let mut edit: Option<&ast::FieldListEdit> = None;
    for prop in props {
        if let ExploreProperty::FieldListEdit(e) = prop {
            if edit.is_some() {
                an.diagnostics
                    .log(&e.loc, "accept: and except: can only be used once");
            } else {
                edit = Some(e);
            }
        }
    }

    let space = an.spaces.filtered_from(base, edit);
    let mut pk_first_loc: Option<Location> = None;
    let mut pk_checks: Vec<(String, Location)> = Vec::new();

    for prop in props {
        match prop {
            ExploreProperty::FieldListEdit(_) => {}
            ExploreProperty::PrimaryKey { name, loc } => {
                if an
                    .spaces
                    .set_primary_key(space, name, loc, &mut an.diagnostics, &mut pk_first_loc)
                    .is_ok()
                {
                    pk_checks.push((name.clone(), loc.clone()));
                }
            }
            ExploreProperty::Parameters { decls, .. } => {
                let params: Vec<Parameter> = decls
                    .iter()
                    .map(|decl| build_parameter(an, decl))
                    .collect();
                if let Err(err) = an.spaces.add_parameters(space, params) {
                    an.diagnostics.log(loc, format!("Internal error: {err}"));
                }
            }
            ExploreProperty::Join { joins, .. } => {
                for join in joins {
                    let struct_def = resolve_source(an, &join.source);
                    let _ = an.spaces.add_entry(
                        space,
                        &join.name,
                        SpaceEntry::Join(PendingJoin {
                            struct_def,
                            key: join.key.clone(),
                        }),
                        &join.loc,
                        &mut an.diagnostics,
                    );
                }
            }
            ExploreProperty::Rename { renames, .. } => {
                for rename in renames {
                    let _ = an.spaces.rename_field(
                        space,
                        &rename.name,
                        &rename.from,
                        &rename.loc,
                        &mut an.diagnostics,
                    );
                }
            }
            ExploreProperty::Declare { kind, fields, .. } => {
                for decl in fields {
                    declare_field(an, space, *kind, decl);
                }
            }
            ExploreProperty::Turtle { turtles, .. } => {
                for turtle in turtles {
                    let pipeline = match crate::pipeline::compile_turtle_pipeline(
                        an,
                        space,
                        false,
                        turtle.base.as_deref(),
                        turtle.refinement.as_ref(),
                        &turtle.segments,
                        &turtle.loc,
                    ) {
                        Ok(pipeline) => pipeline,
                        Err(err) => {
                            an.diagnostics
                                .log(&turtle.loc, format!("Internal error: {err}"));
                            continue;
                        }
                    };
                    let _ = an.spaces.add_entry(
                        space,
                        &turtle.name,
                        SpaceEntry::Query(TurtleDef {
                            name: turtle.name.clone(),
                            pipeline,
                            location: Some(turtle.loc.clone()),
                        }),
                        &turtle.loc,
                        &mut an.diagnostics,
                    );
                }
            }
            ExploreProperty::Filter { clauses, .. } => {
                for clause in clauses {
                    let value =
                        ExprEvaluator::new(&mut an.spaces, space, &mut an.diagnostics)
                            .eval(clause);
                    if value.is_error() {
                        continue;
                    }
                    if value.data_type != AtomicFieldType::Boolean {
                        an.diagnostics
                            .log(&clause.loc, "Filter must be a boolean expression");
                        continue;
                    }
                    if value.kind.is_calculation() {
                        an.diagnostics.log(
                            &clause.loc,
                            "Can't use aggregate computations in top level filters",
                        );
                        continue;
                    }
                    let _ = an.spaces.add_filter(
                        space,
                        FilterExpr {
                            expr: value.value,
                            kind: value.kind,
                        },
                    );
                }
            }
        }
    }

    // Primary keys must resolve within the refined space, including declared
    // dimensions.
    for (name, pk_loc) in pk_checks {
        if let Lookup::Error(_) = an.spaces.lookup(space, &[name.clone()], &pk_loc) {
            an.diagnostics
                .log(&pk_loc, format!("Primary key '{name}' is not defined"));
        }
    }

    match an.spaces.struct_def(space, &mut an.diagnostics) {
        Ok(def) => def,
        Err(err) => {
            an.diagnostics.log(loc, format!("Internal error: {err}"));
            ErrorFactory::struct_def()
        }
    }
}

fn declare_field(an: &mut Analyzer<'_>, space: SpaceRef, kind: DeclareKind, decl: &ast::FieldDecl) {
    let mut evaluator =
        ExprEvaluator::new(&mut an.spaces, space, &mut an.diagnostics).with_guard(&decl.name);
    let value = evaluator.eval(&decl.expr);

    let mut def = AtomicFieldDef {
        name: decl.name.clone(),
        data_type: value.data_type,
        expr: Some(value.value),
        kind: value.kind,
        location: Some(decl.loc.clone()),
    };

    if !value.data_type.is_internal() {
        match kind {
            DeclareKind::Measure if !def.kind.is_calculation() => {
                an.diagnostics.log(
                    &decl.loc,
                    format!("'{}' is not an aggregate expression", decl.name),
                );
                def.data_type = AtomicFieldType::Error;
                def.expr = Some(PlanExpr::ErrorSentinel);
            }
            DeclareKind::Dimension if def.kind.is_calculation() => {
                an.diagnostics.log(
                    &decl.loc,
                    format!("Cannot use an aggregate as the dimension '{}'", decl.name),
                );
                def.data_type = AtomicFieldType::Error;
                def.expr = Some(PlanExpr::ErrorSentinel);
            }
            _ => {}
        }
    } else if value.data_type == AtomicFieldType::Unknown {
        an.diagnostics.log(
            &decl.loc,
            format!("Cannot define '{}', unexpected type", decl.name),
        );
    }

    let _ = an.spaces.add_entry(
        space,
        &decl.name,
        SpaceEntry::Expression(def),
        &decl.loc,
        &mut an.diagnostics,
    );
}

fn build_parameter(an: &mut Analyzer<'_>, decl: &ParameterDecl) -> Parameter {
    let data_type = AtomicFieldType::from(decl.ty);

    if decl.condition {
        let condition = decl.default.as_ref().map(|node| {
            let space = an.constant_space();
            ExprEvaluator::new(&mut an.spaces, space, &mut an.diagnostics)
                .eval_condition(&decl.name, data_type, node)
                .value
        });
        return Parameter::Condition {
            name: decl.name.clone(),
            data_type,
            condition,
        };
    }

    let value = decl.default.as_ref().map(|node| {
        let space = an.constant_space();
        let v = ExprEvaluator::new(&mut an.spaces, space, &mut an.diagnostics).eval(node);
        if v.data_type != data_type && !v.is_error() {
            PlanExpr::Cast {
                expr: Box::new(v.value),
                to: data_type,
                safe: true,
            }
        } else {
            v.value
        }
    });
    Parameter::Value {
        name: decl.name.clone(),
        data_type,
        value,
        constant: decl.constant,
    }
}
