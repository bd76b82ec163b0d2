//! Pipeline composition: head resolution, refinement, turtle expansion, and
//! output-struct propagation between segments.

use crate::context::{Analyzer, ModelValue};
use crate::model::{
    next_struct_def, FieldDef, PipeHead, PipeSegment, Pipeline, Query, StructDef, StructRef,
};
use crate::segments::{classify, IndexExecutor, ProjectExecutor, ReduceExecutor, SegmentType};
use crate::sentinel::ErrorFactory;
use crate::spaces::{Lookup, SpaceEntry, SpaceRef};
use malloy_ast as ast;
use malloy_ast::{Location, QopDesc};
use malloy_error::Result;

/// A compiled query plus the schema of its final output.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub query: Query,
    pub output: StructDef,
}

impl CompiledQuery {
    fn sentinel(loc: &Location) -> Self {
        CompiledQuery {
            query: Query {
                location: Some(loc.clone()),
                ..ErrorFactory::query()
            },
            output: ErrorFactory::struct_def(),
        }
    }
}

pub fn compile_query(an: &mut Analyzer<'_>, qd: &ast::QueryDef) -> Result<CompiledQuery> {
    let (struct_ref, input_struct, base_pipeline) = match &qd.head {
        ast::QueryHead::Source(sd) => {
            let def = crate::sources::resolve_source(an, sd);
            let struct_ref = crate::sources::struct_ref_for(an, sd, &def);
            (struct_ref, def, Pipeline::default())
        }
        ast::QueryHead::Query { name, loc } => match an.model.entry(name).cloned() {
            Some(entry) => match entry.value {
                ModelValue::Query(q) => {
                    let input = resolve_struct_ref(an, &q.struct_ref, loc);
                    (q.struct_ref, input, q.pipeline)
                }
                _ => {
                    an.diagnostics
                        .log(loc, format!("'{name}' is not a query"));
                    return Ok(CompiledQuery::sentinel(&qd.loc));
                }
            },
            None => {
                an.diagnostics
                    .log(loc, format!("Undefined query '{name}'"));
                return Ok(CompiledQuery::sentinel(&qd.loc));
            }
        },
    };

    if an.is_paused() || ErrorFactory::is_error_struct_def(&input_struct) {
        return Ok(CompiledQuery::sentinel(&qd.loc));
    }

    let mut segments: Vec<PipeSegment> = Vec::new();
    let mut pipe_head: Option<PipeHead> = None;
    let mut current = input_struct.clone();

    // A named-query head carries its compiled pipeline forward; refinement
    // materializes it so the first segment can be overlaid.
    let has_base =
        base_pipeline.pipe_head.is_some() || !base_pipeline.segments.is_empty();
    if has_base {
        if let Some(refinement) = &qd.refinement {
            let mut base_segments =
                materialize_pipeline(an, &input_struct, &base_pipeline, &qd.loc);
            if base_segments.is_empty() {
                an.diagnostics.log(&qd.loc, "Cannot refine an empty query");
            } else {
                let first = base_segments.remove(0);
                let (seg, out) = run_op(an, &current, refinement, None, Some(&first));
                segments.push(seg);
                current = out;
                for seg in base_segments {
                    current = advance(an, &current, &seg, &qd.loc);
                    segments.push(seg);
                }
            }
        } else {
            pipe_head = base_pipeline.pipe_head.clone();
            for seg in materialize_pipeline(an, &input_struct, &base_pipeline, &qd.loc) {
                current = advance(an, &current, &seg, &qd.loc);
                if pipe_head.is_none() {
                    segments.push(seg);
                }
            }
            if pipe_head.is_some() {
                // Head turtle plus its own trailing segments; both stay
                // referenced, nothing is duplicated inline.
                segments.extend(base_pipeline.segments.iter().cloned());
            }
        }
    } else if qd.refinement.is_some() {
        an.diagnostics
            .log(&qd.loc, "Refinement requires a query to refine");
    }

    // `source -> turtle_name` heads.
    if let Some(turtle) = &qd.turtle {
        match input_struct.field(&turtle.name) {
            Some(FieldDef::Turtle(t)) => {
                let t = t.clone();
                if let Some(refinement) = &turtle.refinement {
                    // Refinement materializes the turtle in place of a head
                    // reference.
                    let mut turtle_segments = t.pipeline.segments.clone();
                    if turtle_segments.is_empty() {
                        an.diagnostics
                            .log(&turtle.loc, "Cannot refine an empty query");
                    } else {
                        let first = turtle_segments.remove(0);
                        let (seg, out) = run_op(an, &current, refinement, None, Some(&first));
                        segments.push(seg);
                        current = out;
                        for seg in turtle_segments {
                            current = advance(an, &current, &seg, &turtle.loc);
                            segments.push(seg);
                        }
                    }
                } else {
                    pipe_head = Some(PipeHead {
                        name: turtle.name.clone(),
                    });
                    for seg in &t.pipeline.segments {
                        current = advance(an, &current, seg, &turtle.loc);
                    }
                }
            }
            Some(_) => {
                an.diagnostics.log(
                    &turtle.loc,
                    format!("'{}' is not a query field", turtle.name),
                );
            }
            None => {
                an.diagnostics.log(
                    &turtle.loc,
                    format!("'{}' is not defined", turtle.name),
                );
            }
        }
    }

    for desc in &qd.segments {
        let (seg, out) = run_op(an, &current, desc, None, None);
        segments.push(seg);
        current = out;
    }

    Ok(CompiledQuery {
        query: Query {
            struct_ref,
            pipeline: Pipeline {
                pipe_head,
                segments,
            },
            location: Some(qd.loc.clone()),
        },
        output: current,
    })
}

/// Compile a turtle or nest body into a pipeline. `space` supplies the
/// base-turtle lookup and the input schema (without finalizing it); when
/// `nested`, the first executed segment's input space points back at the
/// enclosing query.
pub fn compile_turtle_pipeline(
    an: &mut Analyzer<'_>,
    space: SpaceRef,
    nested: bool,
    base: Option<&str>,
    refinement: Option<&QopDesc>,
    segments: &[QopDesc],
    loc: &Location,
) -> Result<Pipeline> {
    let input_struct = an.spaces.provisional_struct(space)?;
    let nest_parent = nested.then_some(space);

    let mut out_segments: Vec<PipeSegment> = Vec::new();
    let mut current = input_struct;

    if let Some(base_name) = base {
        match an.spaces.lookup(space, &[base_name.to_string()], loc) {
            Lookup::Found(SpaceEntry::Query(turtle)) => {
                let mut base_segments = turtle.pipeline.segments;
                if let Some(refinement) = refinement {
                    if base_segments.is_empty() {
                        an.diagnostics.log(loc, "Cannot refine an empty query");
                    } else {
                        let first = base_segments.remove(0);
                        let (seg, out) =
                            run_op(an, &current, refinement, nest_parent, Some(&first));
                        out_segments.push(seg);
                        current = out;
                    }
                }
                for seg in base_segments {
                    current = advance(an, &current, &seg, loc);
                    out_segments.push(seg);
                }
            }
            Lookup::Found(_) => {
                an.diagnostics
                    .log(loc, format!("'{base_name}' is not a query"));
            }
            Lookup::Error(msg) => an.diagnostics.log(loc, msg),
        }
    } else if let Some(refinement) = refinement {
        // A refinement with nothing to refine runs as a plain first segment.
        let (seg, out) = run_op(an, &current, refinement, nest_parent, None);
        out_segments.push(seg);
        current = out;
    }

    for (i, desc) in segments.iter().enumerate() {
        let parent = if out_segments.is_empty() && i == 0 {
            nest_parent
        } else {
            None
        };
        let (seg, out) = run_op(an, &current, desc, parent, None);
        out_segments.push(seg);
        current = out;
    }

    Ok(Pipeline {
        pipe_head: None,
        segments: out_segments,
    })
}

/// Expand a pipe-head turtle reference so the pipeline's segments stand
/// alone.
fn materialize_pipeline(
    an: &mut Analyzer<'_>,
    input_struct: &StructDef,
    pipeline: &Pipeline,
    loc: &Location,
) -> Vec<PipeSegment> {
    let mut segments = Vec::new();
    if let Some(head) = &pipeline.pipe_head {
        match input_struct.field(&head.name) {
            Some(FieldDef::Turtle(t)) => {
                segments.extend(t.pipeline.segments.iter().cloned())
            }
            _ => an.diagnostics.log(
                loc,
                format!("'{}' is not a query field", head.name),
            ),
        }
    }
    segments.extend(pipeline.segments.iter().cloned());
    segments
}

fn resolve_struct_ref(an: &mut Analyzer<'_>, struct_ref: &StructRef, loc: &Location) -> StructDef {
    match struct_ref {
        StructRef::Inline(def) => (**def).clone(),
        StructRef::Ref(name) => match an.model.entry(name) {
            Some(entry) => match &entry.value {
                ModelValue::Source(def) => def.clone(),
                _ => {
                    an.diagnostics
                        .log(loc, format!("'{name}' is not a source"));
                    ErrorFactory::struct_def()
                }
            },
            None => {
                an.diagnostics
                    .log(loc, format!("Undefined source '{name}'"));
                ErrorFactory::struct_def()
            }
        },
    }
}

/// Run one segment description against the current input schema, producing
/// the segment and the schema it outputs. Internal failures log the
/// offending segment and substitute sentinels so the rest of the pipeline
/// still checks.
pub(crate) fn run_op(
    an: &mut Analyzer<'_>,
    input: &StructDef,
    desc: &QopDesc,
    nest_parent: Option<SpaceRef>,
    refine_from: Option<&PipeSegment>,
) -> (PipeSegment, StructDef) {
    let segment = match execute_op(an, input, desc, nest_parent, refine_from) {
        Ok(seg) => seg,
        Err(err) => {
            an.diagnostics
                .log(&desc.loc, format!("Internal error: {err}"));
            sentinel_like(refine_from)
        }
    };

    match next_struct_def(input, &segment) {
        Ok(output) => (segment, output),
        Err(err) => {
            an.diagnostics.log(
                &desc.loc,
                format!("Internal error: {err}; segment: {segment:#?}"),
            );
            let sentinel = sentinel_like(Some(&segment));
            let output =
                next_struct_def(input, &sentinel).unwrap_or_else(|_| ErrorFactory::struct_def());
            (sentinel, output)
        }
    }
}

fn sentinel_like(segment: Option<&PipeSegment>) -> PipeSegment {
    match segment {
        Some(PipeSegment::Project(_)) => ErrorFactory::project_segment(),
        Some(PipeSegment::Index(_)) => ErrorFactory::index_segment(),
        _ => ErrorFactory::reduce_segment(),
    }
}

fn execute_op(
    an: &mut Analyzer<'_>,
    input: &StructDef,
    desc: &QopDesc,
    nest_parent: Option<SpaceRef>,
    refine_from: Option<&PipeSegment>,
) -> Result<PipeSegment> {
    let ty = classify(desc, &mut an.diagnostics).unwrap_or_else(|| match refine_from {
        Some(PipeSegment::Project(_)) => SegmentType::Project,
        Some(PipeSegment::Index(_)) => SegmentType::Index,
        Some(PipeSegment::Reduce(_)) => SegmentType::Grouping,
        None => {
            an.diagnostics.log(
                &desc.loc,
                "Can't determine segment type, assuming grouping",
            );
            SegmentType::Grouping
        }
    });

    match ty {
        SegmentType::Grouping | SegmentType::Aggregate => {
            let mut executor = ReduceExecutor::new(an, input, nest_parent)?;
            if let Some(PipeSegment::Reduce(seg)) = refine_from {
                executor.seed_from(an, seg, &desc.loc);
            }
            for prop in &desc.properties {
                executor.execute(an, prop)?;
            }
            executor.finalize(an, refine_from, &desc.loc)
        }
        SegmentType::Project => {
            let mut executor = ProjectExecutor::new(an, input, nest_parent)?;
            if let Some(PipeSegment::Project(seg)) = refine_from {
                executor.seed_from(an, seg, &desc.loc);
            }
            for prop in &desc.properties {
                executor.execute(an, prop)?;
            }
            executor.finalize(an, refine_from, &desc.loc)
        }
        SegmentType::Index => {
            let mut executor = IndexExecutor::new(an, input, nest_parent)?;
            for prop in &desc.properties {
                executor.execute(an, prop)?;
            }
            executor.finalize(an, refine_from, &desc.loc)
        }
    }
}

fn advance(
    an: &mut Analyzer<'_>,
    current: &StructDef,
    segment: &PipeSegment,
    loc: &Location,
) -> StructDef {
    match next_struct_def(current, segment) {
        Ok(out) => out,
        Err(err) => {
            an.diagnostics.log(
                loc,
                format!("Internal error: {err}; segment: {segment:#?}"),
            );
            ErrorFactory::struct_def()
        }
    }
}
