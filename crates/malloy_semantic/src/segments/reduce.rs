use crate::context::Analyzer;
use crate::exprs::ExprEvaluator;
use crate::model::{
    AtomicFieldDef, AtomicFieldType, BySpec, ExprValue, FilterExpr, NestDef, OrderBySpec,
    OrderField, PipeSegment, ReduceSegment, SegmentField, SortDirection, StructDef, TurtleDef,
};
use crate::spaces::{Lookup, PendingJoin, ResultShape, SpaceEntry, SpaceRef, WildEntry};
use malloy_ast::{
    FieldDecl, JoinDecl, Location, NestEntry, OrderItem, OrderRef, QueryItem, QueryProperty,
    TopBy,
};
use malloy_error::Result;

/// Shared machinery for the reduce and project executors: an input query
/// space, a result space for output names, and the order/limit/filter
/// refinement state.
pub(super) struct QuerySegmentCore {
    pub input: SpaceRef,
    pub result: SpaceRef,
    pub shape: ResultShape,
    pub order_by: Option<Vec<OrderBySpec>>,
    pub by: Option<BySpec>,
    pub limit: Option<u64>,
    pub filters: Vec<FilterExpr>,
}

impl QuerySegmentCore {
    pub fn new(
        an: &mut Analyzer<'_>,
        input_struct: &StructDef,
        nest_parent: Option<SpaceRef>,
        shape: ResultShape,
    ) -> Result<Self> {
        let input = an.spaces.new_query_space(input_struct, nest_parent);
        let result = an.spaces.new_result_space(shape, input)?;
        Ok(QuerySegmentCore {
            input,
            result,
            shape,
            order_by: None,
            by: None,
            limit: None,
            filters: Vec::new(),
        })
    }

    /// Seed the result space from an existing segment's fields so a
    /// refinement extends it and duplicate names are caught.
    pub fn seed_fields(&mut self, an: &mut Analyzer<'_>, fields: &[SegmentField], loc: &Location) {
        for field in fields {
            let entry = match field {
                SegmentField::Reference(path) => {
                    let parts: Vec<String> = path.split('.').map(str::to_string).collect();
                    let def = match an.spaces.lookup(self.input, &parts, loc) {
                        Lookup::Found(found) => match found.type_desc() {
                            Some(td) => AtomicFieldDef {
                                name: field.output_name().to_string(),
                                data_type: td.data_type,
                                expr: None,
                                kind: td.kind,
                                location: None,
                            },
                            None => AtomicFieldDef::column(
                                field.output_name(),
                                AtomicFieldType::Error,
                            ),
                        },
                        Lookup::Error(_) => {
                            AtomicFieldDef::column(field.output_name(), AtomicFieldType::Error)
                        }
                    };
                    SpaceEntry::Reference {
                        path: path.clone(),
                        def,
                    }
                }
                SegmentField::Atomic(def) => SpaceEntry::Expression(def.clone()),
                SegmentField::Nested(nest) => SpaceEntry::Query(TurtleDef {
                    name: nest.name.clone(),
                    pipeline: nest.pipeline.clone(),
                    location: None,
                }),
            };
            // Seeding a well-formed segment never collides; errors here go
            // through the usual duplicate reporting.
            let _ = an.spaces.add_entry(
                self.result,
                field.output_name(),
                entry,
                loc,
                &mut an.diagnostics,
            );
        }
    }

    fn define_field(&mut self, an: &mut Analyzer<'_>, decl: &FieldDecl) -> AtomicFieldDef {
        let mut evaluator =
            ExprEvaluator::new(&mut an.spaces, self.input, &mut an.diagnostics)
                .with_guard(&decl.name);
        let value = evaluator.eval(&decl.expr);

        if value.data_type == AtomicFieldType::Unknown && !value.is_error() {
            an.diagnostics.log(
                &decl.loc,
                format!("Cannot define '{}', unexpected type", decl.name),
            );
        }

        AtomicFieldDef {
            name: decl.name.clone(),
            data_type: value.data_type,
            expr: Some(value.value),
            kind: value.kind,
            location: Some(decl.loc.clone()),
        }
    }

    fn error_field(name: &str, loc: &Location) -> AtomicFieldDef {
        AtomicFieldDef {
            name: name.to_string(),
            data_type: AtomicFieldType::Error,
            expr: Some(crate::model::PlanExpr::ErrorSentinel),
            kind: crate::model::ExpressionKind::Scalar,
            location: Some(loc.clone()),
        }
    }

    fn add_result_entry(
        &mut self,
        an: &mut Analyzer<'_>,
        name: &str,
        entry: SpaceEntry,
        loc: &Location,
    ) -> Result<()> {
        an.spaces
            .add_entry(self.result, name, entry, loc, &mut an.diagnostics)?;
        Ok(())
    }

    fn add_reference(
        &mut self,
        an: &mut Analyzer<'_>,
        path: &[String],
        loc: &Location,
        want_aggregate: bool,
    ) -> Result<()> {
        let joined = path.join(".");
        let output_name = path.last().cloned().unwrap_or_default();

        match an.spaces.lookup(self.input, path, loc) {
            Lookup::Error(msg) => {
                an.diagnostics.log(loc, msg);
                Ok(())
            }
            Lookup::Found(entry) => match entry.type_desc() {
                None => {
                    let what = if matches!(entry, SpaceEntry::Query(_)) {
                        "a query"
                    } else {
                        "a join"
                    };
                    an.diagnostics
                        .log(loc, format!("Cannot use {what} '{joined}' as a field"));
                    Ok(())
                }
                Some(td) => {
                    if want_aggregate && !td.kind.is_aggregate_like() {
                        an.diagnostics
                            .log(loc, format!("'{joined}' is not an aggregate value"));
                        return Ok(());
                    }
                    if !want_aggregate && td.kind.is_calculation() {
                        let msg = match self.shape {
                            ResultShape::Project => {
                                "Cannot add aggregate measures to project".to_string()
                            }
                            _ => format!("Cannot group by aggregate field '{joined}'"),
                        };
                        an.diagnostics.log(loc, msg);
                        if self.shape == ResultShape::Project {
                            let def = Self::error_field(&output_name, loc);
                            return self.add_result_entry(
                                an,
                                &output_name,
                                SpaceEntry::Expression(def),
                                loc,
                            );
                        }
                        return Ok(());
                    }
                    let def = AtomicFieldDef {
                        name: output_name.clone(),
                        data_type: td.data_type,
                        expr: None,
                        kind: td.kind,
                        location: Some(loc.clone()),
                    };
                    self.add_result_entry(
                        an,
                        &output_name,
                        SpaceEntry::Reference { path: joined, def },
                        loc,
                    )
                }
            },
        }
    }

    pub fn add_group_by(&mut self, an: &mut Analyzer<'_>, items: &[QueryItem]) -> Result<()> {
        for item in items {
            match item {
                QueryItem::Ref { path, loc } => self.add_reference(an, path, loc, false)?,
                QueryItem::Def(decl) => {
                    let mut def = self.define_field(an, decl);
                    if def.kind.is_calculation() && def.data_type != AtomicFieldType::Error {
                        an.diagnostics.log(
                            &decl.loc,
                            format!("Cannot group by aggregate expression '{}'", decl.name),
                        );
                        def = Self::error_field(&decl.name, &decl.loc);
                    }
                    let name = def.name.clone();
                    self.add_result_entry(an, &name, SpaceEntry::Expression(def), &decl.loc)?;
                }
                QueryItem::Wild(wild) => {
                    an.diagnostics
                        .log(&wild.loc, "Wildcards cannot be used in group_by");
                }
            }
        }
        Ok(())
    }

    pub fn add_aggregate(&mut self, an: &mut Analyzer<'_>, items: &[QueryItem]) -> Result<()> {
        for item in items {
            match item {
                QueryItem::Ref { path, loc } => self.add_reference(an, path, loc, true)?,
                QueryItem::Def(decl) => {
                    let mut def = self.define_field(an, decl);
                    if !def.kind.is_calculation() && def.data_type != AtomicFieldType::Error {
                        an.diagnostics.log(
                            &decl.loc,
                            format!("'{}' is not an aggregate expression", decl.name),
                        );
                        def = Self::error_field(&decl.name, &decl.loc);
                    }
                    let name = def.name.clone();
                    self.add_result_entry(an, &name, SpaceEntry::Expression(def), &decl.loc)?;
                }
                QueryItem::Wild(wild) => {
                    an.diagnostics
                        .log(&wild.loc, "Wildcards cannot be used in aggregate");
                }
            }
        }
        Ok(())
    }

    pub fn add_project(&mut self, an: &mut Analyzer<'_>, items: &[QueryItem]) -> Result<()> {
        for item in items {
            match item {
                QueryItem::Ref { path, loc } => self.add_reference(an, path, loc, false)?,
                QueryItem::Def(decl) => {
                    let mut def = self.define_field(an, decl);
                    if def.kind.is_calculation() && def.data_type != AtomicFieldType::Error {
                        an.diagnostics
                            .log(&decl.loc, "Cannot add aggregate measures to project");
                        def = Self::error_field(&decl.name, &decl.loc);
                    }
                    let name = def.name.clone();
                    self.add_result_entry(an, &name, SpaceEntry::Expression(def), &decl.loc)?;
                }
                QueryItem::Wild(wild) => {
                    let entry = WildEntry {
                        prefix: wild.prefix.clone(),
                        deep: wild.deep,
                    };
                    let name = entry.reference_string();
                    self.add_result_entry(an, &name, SpaceEntry::Wild(entry), &wild.loc)?;
                }
            }
        }
        Ok(())
    }

    pub fn add_nest(&mut self, an: &mut Analyzer<'_>, entries: &[NestEntry]) -> Result<()> {
        for entry in entries {
            match entry {
                NestEntry::Ref { path, loc } => {
                    let name = path.last().cloned().unwrap_or_default();
                    match an.spaces.lookup(self.input, path, loc) {
                        Lookup::Found(SpaceEntry::Query(turtle)) => {
                            self.add_result_entry(
                                an,
                                &name,
                                SpaceEntry::Query(TurtleDef {
                                    name: name.clone(),
                                    location: Some(loc.clone()),
                                    ..turtle
                                }),
                                loc,
                            )?;
                        }
                        Lookup::Found(_) => {
                            an.diagnostics
                                .log(loc, format!("'{}' is not a query", path.join(".")));
                        }
                        Lookup::Error(msg) => an.diagnostics.log(loc, msg),
                    }
                }
                NestEntry::Def {
                    name,
                    base,
                    refinement,
                    segments,
                    loc,
                } => {
                    let pipeline = crate::pipeline::compile_turtle_pipeline(
                        an,
                        self.input,
                        true,
                        base.as_deref(),
                        refinement.as_ref(),
                        segments,
                        loc,
                    )?;
                    self.add_result_entry(
                        an,
                        name,
                        SpaceEntry::Query(TurtleDef {
                            name: name.clone(),
                            pipeline,
                            location: Some(loc.clone()),
                        }),
                        loc,
                    )?;
                }
            }
        }
        Ok(())
    }

    pub fn add_filters(
        &mut self,
        an: &mut Analyzer<'_>,
        clauses: &[malloy_ast::ExprNode],
        having: bool,
    ) {
        for clause in clauses {
            let value: ExprValue =
                ExprEvaluator::new(&mut an.spaces, self.input, &mut an.diagnostics).eval(clause);
            if value.is_error() {
                continue;
            }
            if value.data_type != AtomicFieldType::Boolean {
                an.diagnostics
                    .log(&clause.loc, "Filter must be a boolean expression");
                continue;
            }
            if having && !value.kind.is_calculation() {
                an.diagnostics
                    .log(&clause.loc, "`having:` requires an aggregate expression");
                continue;
            }
            if !having && value.kind.is_calculation() {
                an.diagnostics.log(
                    &clause.loc,
                    "Aggregate expressions are not allowed in `where:`",
                );
                continue;
            }
            self.filters.push(FilterExpr {
                expr: value.value,
                kind: value.kind,
            });
        }
    }

    pub fn set_top(
        &mut self,
        an: &mut Analyzer<'_>,
        n: u64,
        by: Option<&TopBy>,
        loc: &Location,
    ) {
        if self.order_by.is_some() || self.by.is_some() {
            an.diagnostics.log(loc, "Query is already sorted");
        } else if let Some(by) = by {
            match by {
                TopBy::Name { name, .. } => {
                    self.by = Some(BySpec::Name(name.clone()));
                }
                TopBy::Expr(expr) => {
                    let value = ExprEvaluator::new(
                        &mut an.spaces,
                        self.input,
                        &mut an.diagnostics,
                    )
                    .eval(expr);
                    if value.is_error() {
                        // already reported
                    } else if !value.kind.is_aggregate_like() {
                        an.diagnostics
                            .log(&expr.loc, "top by expression must be an aggregate");
                    } else {
                        self.by = Some(BySpec::Expression(value.value));
                    }
                }
            }
        }

        if self.limit.is_some() {
            an.diagnostics.log(loc, "Query is already limited");
        } else {
            self.limit = Some(n);
        }
    }

    pub fn set_limit(&mut self, an: &mut Analyzer<'_>, n: u64, loc: &Location) {
        if self.limit.is_some() {
            an.diagnostics.log(loc, "Query is already limited");
        } else {
            self.limit = Some(n);
        }
    }

    pub fn set_ordering(&mut self, an: &mut Analyzer<'_>, items: &[OrderItem], loc: &Location) {
        if self.order_by.is_some() || self.by.is_some() {
            an.diagnostics.log(loc, "Query is already sorted");
            return;
        }
        let order = items
            .iter()
            .map(|item| OrderBySpec {
                field: match &item.field {
                    OrderRef::Name(name) => OrderField::Name(name.clone()),
                    OrderRef::Ordinal(n) => OrderField::Ordinal(*n),
                },
                dir: item.dir.map(|d| match d {
                    malloy_ast::OrderDirection::Asc => SortDirection::Asc,
                    malloy_ast::OrderDirection::Desc => SortDirection::Desc,
                }),
            })
            .collect();
        self.order_by = Some(order);
    }

    pub fn add_joins(&mut self, an: &mut Analyzer<'_>, joins: &[JoinDecl]) -> Result<()> {
        for join in joins {
            let struct_def = crate::sources::resolve_source(an, &join.source);
            an.spaces.extend_entry(
                self.input,
                &join.name,
                SpaceEntry::Join(PendingJoin {
                    struct_def,
                    key: join.key.clone(),
                }),
                &join.loc,
                &mut an.diagnostics,
            )?;
        }
        Ok(())
    }

    pub fn add_declares(&mut self, an: &mut Analyzer<'_>, fields: &[FieldDecl]) -> Result<()> {
        for decl in fields {
            let def = self.define_field(an, decl);
            an.spaces.extend_entry(
                self.input,
                &decl.name,
                SpaceEntry::Expression(def),
                &decl.loc,
                &mut an.diagnostics,
            )?;
        }
        Ok(())
    }

    /// Turn the result entries into ordered segment fields, expanding
    /// wildcards against the input space.
    fn collect_fields(&mut self, an: &mut Analyzer<'_>, loc: &Location) -> Result<Vec<SegmentField>> {
        let entries: Vec<(String, SpaceEntry)> = an
            .spaces
            .entries(self.result)?
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut fields = Vec::new();
        for (name, entry) in entries {
            match entry {
                SpaceEntry::Reference { path, .. } => {
                    fields.push(SegmentField::Reference(path));
                }
                SpaceEntry::Column(def) | SpaceEntry::Expression(def) => {
                    fields.push(SegmentField::Atomic(AtomicFieldDef { name, ..def }));
                }
                SpaceEntry::Query(turtle) => fields.push(SegmentField::Nested(NestDef {
                    name,
                    pipeline: turtle.pipeline,
                })),
                SpaceEntry::Wild(wild) => {
                    for path in
                        an.spaces
                            .expand_wild(self.input, &wild, loc, &mut an.diagnostics)
                    {
                        fields.push(SegmentField::Reference(path));
                    }
                }
                _ => {}
            }
        }
        Ok(fields)
    }

    fn validate_ordering(
        &self,
        an: &mut Analyzer<'_>,
        fields: &[SegmentField],
        loc: &Location,
    ) {
        if let Some(BySpec::Name(name)) = &self.by {
            if !fields.iter().any(|f| f.output_name() == name) {
                an.diagnostics
                    .log(loc, format!("Unknown top by field '{name}'"));
            }
        }
        if let Some(order) = &self.order_by {
            for spec in order {
                match &spec.field {
                    OrderField::Name(name) => {
                        if !fields.iter().any(|f| f.output_name() == name) {
                            an.diagnostics
                                .log(loc, format!("Unknown order by field '{name}'"));
                        }
                    }
                    OrderField::Ordinal(n) => {
                        if *n == 0 || *n as usize > fields.len() {
                            an.diagnostics
                                .log(loc, format!("Order by ordinal {n} out of range"));
                        }
                    }
                }
            }
        }
    }

    /// Produce the reduce-shaped segment, inheriting anything an existing
    /// segment set that this one did not override. New filters concatenate
    /// after existing ones.
    pub fn finalize_reduce(
        mut self,
        an: &mut Analyzer<'_>,
        refine_from: Option<&ReduceSegment>,
        loc: &Location,
    ) -> Result<ReduceSegment> {
        let fields = self.collect_fields(an, loc)?;
        self.validate_ordering(an, &fields, loc);

        let extend_source = an.spaces.extended_fields(self.input, &mut an.diagnostics)?;

        let mut filter_list = refine_from.map(|f| f.filter_list.clone()).unwrap_or_default();
        filter_list.append(&mut self.filters);

        let segment = ReduceSegment {
            fields,
            order_by: self
                .order_by
                .or_else(|| refine_from.and_then(|f| f.order_by.clone())),
            by: self.by.or_else(|| refine_from.and_then(|f| f.by.clone())),
            limit: self.limit.or_else(|| refine_from.and_then(|f| f.limit)),
            filter_list,
            extend_source,
        };

        // Freeze the result space; completion callbacks (nested back
        // references, exclude checks) run against this output.
        an.spaces.struct_def(self.result, &mut an.diagnostics)?;
        Ok(segment)
    }
}

impl QuerySegmentCore {
    pub fn finalize_project(
        mut self,
        an: &mut Analyzer<'_>,
        refine_from: Option<&crate::model::ProjectSegment>,
        loc: &Location,
    ) -> Result<crate::model::ProjectSegment> {
        let fields = self.collect_fields(an, loc)?;
        self.validate_ordering(an, &fields, loc);

        let extend_source = an.spaces.extended_fields(self.input, &mut an.diagnostics)?;

        let mut filter_list = refine_from.map(|f| f.filter_list.clone()).unwrap_or_default();
        filter_list.append(&mut self.filters);

        let segment = crate::model::ProjectSegment {
            fields,
            order_by: self
                .order_by
                .or_else(|| refine_from.and_then(|f| f.order_by.clone())),
            by: self.by.or_else(|| refine_from.and_then(|f| f.by.clone())),
            limit: self.limit.or_else(|| refine_from.and_then(|f| f.limit)),
            filter_list,
            extend_source,
        };

        an.spaces.struct_def(self.result, &mut an.diagnostics)?;
        Ok(segment)
    }
}

/// Executor for reduce (grouping / aggregate) segments.
pub struct ReduceExecutor {
    core: QuerySegmentCore,
}

impl ReduceExecutor {
    pub fn new(
        an: &mut Analyzer<'_>,
        input_struct: &StructDef,
        nest_parent: Option<SpaceRef>,
    ) -> Result<Self> {
        Ok(ReduceExecutor {
            core: QuerySegmentCore::new(an, input_struct, nest_parent, ResultShape::Reduce)?,
        })
    }

    pub fn input_space(&self) -> SpaceRef {
        self.core.input
    }

    pub fn seed_from(&mut self, an: &mut Analyzer<'_>, from: &ReduceSegment, loc: &Location) {
        self.core.seed_fields(an, &from.fields, loc);
    }

    pub fn execute(&mut self, an: &mut Analyzer<'_>, prop: &QueryProperty) -> Result<()> {
        match prop {
            QueryProperty::GroupBy { items, .. } => self.core.add_group_by(an, items),
            QueryProperty::Aggregate { items, .. } => self.core.add_aggregate(an, items),
            QueryProperty::Nest { entries, .. } => self.core.add_nest(an, entries),
            QueryProperty::Filter {
                clauses, having, ..
            } => {
                self.core.add_filters(an, clauses, *having);
                Ok(())
            }
            QueryProperty::Top { n, by, loc } => {
                self.core.set_top(an, *n, by.as_ref(), loc);
                Ok(())
            }
            QueryProperty::Limit { n, loc } => {
                self.core.set_limit(an, *n, loc);
                Ok(())
            }
            QueryProperty::Ordering { items, loc } => {
                self.core.set_ordering(an, items, loc);
                Ok(())
            }
            QueryProperty::Join { joins, .. } => self.core.add_joins(an, joins),
            QueryProperty::Declare { fields, .. } => self.core.add_declares(an, fields),
            // Kind contradictions were reported during classification.
            QueryProperty::Project { .. } | QueryProperty::Index { .. } => Ok(()),
            QueryProperty::Sample { spec: _, loc } => {
                an.diagnostics
                    .log(loc, "sample: not legal in a grouping segment");
                Ok(())
            }
        }
    }

    pub fn finalize(
        self,
        an: &mut Analyzer<'_>,
        refine_from: Option<&PipeSegment>,
        loc: &Location,
    ) -> Result<PipeSegment> {
        let from = match refine_from {
            Some(PipeSegment::Reduce(seg)) => Some(seg),
            Some(other) => {
                an.diagnostics.log(
                    loc,
                    format!("Cannot refine a {} segment with a reduce", other.kind_name()),
                );
                None
            }
            None => None,
        };
        Ok(PipeSegment::Reduce(self.core.finalize_reduce(an, from, loc)?))
    }
}
