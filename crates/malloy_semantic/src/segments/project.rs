use super::reduce::QuerySegmentCore;
use crate::context::Analyzer;
use crate::model::{PipeSegment, ProjectSegment, StructDef};
use crate::spaces::{ResultShape, SpaceRef};
use malloy_ast::{Location, QueryProperty};
use malloy_error::Result;

/// Executor for project segments: the reduce machinery with aggregates,
/// nests and `having:` refused.
pub struct ProjectExecutor {
    core: QuerySegmentCore,
}

impl ProjectExecutor {
    pub fn new(
        an: &mut Analyzer<'_>,
        input_struct: &StructDef,
        nest_parent: Option<SpaceRef>,
    ) -> Result<Self> {
        Ok(ProjectExecutor {
            core: QuerySegmentCore::new(an, input_struct, nest_parent, ResultShape::Project)?,
        })
    }

    pub fn input_space(&self) -> SpaceRef {
        self.core.input
    }

    pub fn seed_from(&mut self, an: &mut Analyzer<'_>, from: &ProjectSegment, loc: &Location) {
        self.core.seed_fields(an, &from.fields, loc);
    }

    pub fn execute(&mut self, an: &mut Analyzer<'_>, prop: &QueryProperty) -> Result<()> {
        match prop {
            QueryProperty::Project { items, .. } => self.core.add_project(an, items),
            QueryProperty::Filter {
                clauses,
                having: false,
                ..
            } => {
                self.core.add_filters(an, clauses, false);
                Ok(())
            }
            QueryProperty::Filter {
                having: true, loc, ..
            } => {
                an.diagnostics
                    .log(loc, "having: not legal in a project segment");
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
            QueryProperty::GroupBy { .. }
            | QueryProperty::Aggregate { .. }
            | QueryProperty::Nest { .. }
            | QueryProperty::Index { .. } => Ok(()),
            QueryProperty::Sample { spec: _, loc } => {
                an.diagnostics
                    .log(loc, "sample: not legal in a project segment");
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
            Some(PipeSegment::Project(seg)) => Some(seg),
            Some(other) => {
                an.diagnostics.log(
                    loc,
                    format!(
                        "Cannot refine a {} segment with a project",
                        other.kind_name()
                    ),
                );
                None
            }
            None => None,
        };
        Ok(PipeSegment::Project(
            self.core.finalize_project(an, from, loc)?,
        ))
    }
}
