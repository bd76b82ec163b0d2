use crate::context::Analyzer;
use crate::exprs::ExprEvaluator;
use crate::model::{AtomicFieldType, FilterExpr, IndexSegment, PipeSegment, Sampling, StructDef};
use crate::spaces::{Lookup, ResultShape, SpaceRef, WildEntry};
use malloy_ast::{Location, QueryItem, QueryProperty, SampleSpec};
use malloy_error::Result;
use std::collections::HashSet;

/// Executor for index segments: a deduplicated ordered set of column and
/// wildcard references, an optional weight measure, sampling, and scalar
/// filters.
pub struct IndexExecutor {
    input: SpaceRef,
    result: SpaceRef,
    fields: Vec<String>,
    seen: HashSet<String>,
    weight_measure: Option<String>,
    sample: Option<Sampling>,
    filters: Vec<FilterExpr>,
    limit: Option<u64>,
}

impl IndexExecutor {
    pub fn new(
        an: &mut Analyzer<'_>,
        input_struct: &StructDef,
        nest_parent: Option<SpaceRef>,
    ) -> Result<Self> {
        let input = an.spaces.new_query_space(input_struct, nest_parent);
        let result = an.spaces.new_result_space(ResultShape::Index, input)?;
        Ok(IndexExecutor {
            input,
            result,
            fields: Vec::new(),
            seen: HashSet::new(),
            weight_measure: None,
            sample: None,
            filters: Vec::new(),
            limit: None,
        })
    }

    pub fn input_space(&self) -> SpaceRef {
        self.input
    }

    fn push_field(&mut self, reference: String) {
        if self.seen.insert(reference.clone()) {
            self.fields.push(reference);
        }
    }

    fn add_index_fields(
        &mut self,
        an: &mut Analyzer<'_>,
        items: &[QueryItem],
        weight_by: Option<&[String]>,
        loc: &Location,
    ) {
        for item in items {
            match item {
                QueryItem::Ref { path, loc } => match an.spaces.lookup(self.input, path, loc) {
                    Lookup::Found(entry) => {
                        if entry.type_desc().is_none() {
                            an.diagnostics.log(
                                loc,
                                format!("Cannot index '{}', not a column", path.join(".")),
                            );
                        } else {
                            self.push_field(path.join("."));
                        }
                    }
                    Lookup::Error(msg) => an.diagnostics.log(loc, msg),
                },
                QueryItem::Wild(wild) => {
                    let entry = WildEntry {
                        prefix: wild.prefix.clone(),
                        deep: wild.deep,
                    };
                    self.push_field(entry.reference_string());
                }
                QueryItem::Def(decl) => {
                    an.diagnostics
                        .log(&decl.loc, "Cannot define fields in an index");
                }
            }
        }

        if let Some(path) = weight_by {
            match an.spaces.lookup(self.input, path, loc) {
                Lookup::Found(entry) => match entry.type_desc() {
                    Some(td) if td.kind.is_aggregate_like() => {
                        self.weight_measure = Some(path.join("."));
                    }
                    _ => an.diagnostics.log(loc, "Weight must be a measure"),
                },
                Lookup::Error(msg) => an.diagnostics.log(loc, msg),
            }
        }
    }

    pub fn execute(&mut self, an: &mut Analyzer<'_>, prop: &QueryProperty) -> Result<()> {
        match prop {
            QueryProperty::Index {
                fields,
                weight_by,
                loc,
            } => {
                self.add_index_fields(an, fields, weight_by.as_deref(), loc);
                Ok(())
            }
            QueryProperty::Filter {
                clauses,
                having: false,
                ..
            } => {
                for clause in clauses {
                    let value =
                        ExprEvaluator::new(&mut an.spaces, self.input, &mut an.diagnostics)
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
                            "Aggregate expressions are not allowed in `where:`",
                        );
                        continue;
                    }
                    self.filters.push(FilterExpr {
                        expr: value.value,
                        kind: value.kind,
                    });
                }
                Ok(())
            }
            QueryProperty::Filter {
                having: true, loc, ..
            } => {
                an.diagnostics
                    .log(loc, "having: not legal in an index segment");
                Ok(())
            }
            QueryProperty::Limit { n, loc } => {
                if self.limit.is_some() {
                    an.diagnostics.log(loc, "Query is already limited");
                } else {
                    self.limit = Some(*n);
                }
                Ok(())
            }
            QueryProperty::Sample { spec, loc } => {
                let dialect_name = an
                    .spaces
                    .dialect_name(self.input)
                    .unwrap_or_default()
                    .to_string();
                if let Some(dialect) = crate::dialect::get_dialect(&dialect_name) {
                    if !dialect.supports_sampling {
                        an.diagnostics.log(
                            loc,
                            format!("Sampling is not supported by the {dialect_name} dialect"),
                        );
                        return Ok(());
                    }
                }
                self.sample = Some(match spec {
                    SampleSpec::Enable(on) => Sampling::Enable(*on),
                    SampleSpec::Rows(n) => Sampling::Rows(*n),
                    SampleSpec::Percent(p) => Sampling::Percent(*p),
                });
                Ok(())
            }
            // Kind contradictions were reported during classification.
            QueryProperty::GroupBy { .. }
            | QueryProperty::Aggregate { .. }
            | QueryProperty::Project { .. }
            | QueryProperty::Nest { .. } => Ok(()),
            other => {
                an.diagnostics.log(
                    other.loc(),
                    format!("{}: not legal in an index segment", super::prop_name(other)),
                );
                Ok(())
            }
        }
    }

    pub fn finalize(
        mut self,
        an: &mut Analyzer<'_>,
        refine_from: Option<&PipeSegment>,
        loc: &Location,
    ) -> Result<PipeSegment> {
        let from = match refine_from {
            Some(PipeSegment::Index(seg)) => Some(seg),
            Some(other) => {
                an.diagnostics.log(
                    loc,
                    format!(
                        "Cannot refine a {} segment with an index",
                        other.kind_name()
                    ),
                );
                None
            }
            None => None,
        };

        let mut fields = from.map(|f| f.fields.clone()).unwrap_or_default();
        let existing: HashSet<String> = fields.iter().cloned().collect();
        for field in self.fields.drain(..) {
            if !existing.contains(&field) {
                fields.push(field);
            }
        }

        let mut filter_list = from.map(|f| f.filter_list.clone()).unwrap_or_default();
        filter_list.append(&mut self.filters);

        let segment = IndexSegment {
            fields,
            weight_measure: self
                .weight_measure
                .or_else(|| from.and_then(|f| f.weight_measure.clone())),
            sample: self.sample.or_else(|| from.and_then(|f| f.sample.clone())),
            filter_list,
            limit: self.limit.or_else(|| from.and_then(|f| f.limit)),
        };

        an.spaces.struct_def(self.result, &mut an.diagnostics)?;
        Ok(PipeSegment::Index(segment))
    }
}
