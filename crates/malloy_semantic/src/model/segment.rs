use crate::model::datatype::AtomicFieldType;
use crate::model::expr::FilterExpr;
use crate::model::field::{AtomicFieldDef, FieldDef, StructDef, StructRelationship, StructSource};
use malloy_error::{MalloyError, Result};
use malloy_ast::Location;
use serde::{Deserialize, Serialize};

/// A field carried by a reduce or project segment: a reference into the
/// input space (dotted join path), an inline definition, or a nested query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SegmentField {
    /// Dotted path into the input space, e.g. `state` or `orders.status`.
    Reference(String),
    Atomic(AtomicFieldDef),
    Nested(NestDef),
}

impl SegmentField {
    /// The name this field takes in the segment's output.
    pub fn output_name(&self) -> &str {
        match self {
            Self::Reference(path) => path.rsplit('.').next().unwrap_or(path),
            Self::Atomic(def) => &def.name,
            Self::Nested(nest) => &nest.name,
        }
    }
}

/// A nested query produced per group by a reduce segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestDef {
    pub name: String,
    pub pipeline: Pipeline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderField {
    Name(String),
    /// One-based output column ordinal.
    Ordinal(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBySpec {
    pub field: OrderField,
    pub dir: Option<SortDirection>,
}

/// The `by` of a `top:` property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BySpec {
    /// An output field name.
    Name(String),
    /// An aggregate expression.
    Expression(crate::model::PlanExpr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Sampling {
    Enable(bool),
    Rows(u64),
    Percent(f64),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReduceSegment {
    pub fields: Vec<SegmentField>,
    pub order_by: Option<Vec<OrderBySpec>>,
    /// Set by `top: N by ...`.
    pub by: Option<BySpec>,
    pub limit: Option<u64>,
    pub filter_list: Vec<FilterExpr>,
    /// Fields and joins declared inside this segment, in insertion order.
    pub extend_source: Vec<FieldDef>,
}

/// Same shape as reduce, but its fields never contain aggregates or nests.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProjectSegment {
    pub fields: Vec<SegmentField>,
    pub order_by: Option<Vec<OrderBySpec>>,
    pub by: Option<BySpec>,
    pub limit: Option<u64>,
    pub filter_list: Vec<FilterExpr>,
    pub extend_source: Vec<FieldDef>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IndexSegment {
    /// Column / wildcard references, insertion-ordered, deduplicated by
    /// exact reference string.
    pub fields: Vec<String>,
    pub weight_measure: Option<String>,
    pub sample: Option<Sampling>,
    pub filter_list: Vec<FilterExpr>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipeSegment {
    Reduce(ReduceSegment),
    Project(ProjectSegment),
    Index(IndexSegment),
}

impl PipeSegment {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Reduce(_) => "reduce",
            Self::Project(_) => "project",
            Self::Index(_) => "index",
        }
    }
}

/// Reference to a turtle heading a pipeline. Mutually exclusive with inline
/// head refinement, which materializes the turtle's segments instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeHead {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Pipeline {
    pub pipe_head: Option<PipeHead>,
    pub segments: Vec<PipeSegment>,
}

/// The input source of a query: a bare name when the source is exported and
/// unparameterized, otherwise the struct inlined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StructRef {
    Ref(String),
    Inline(Box<StructDef>),
}

/// A fully planned query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub struct_ref: StructRef,
    pub pipeline: Pipeline,
    pub location: Option<Location>,
}

/// Computes the schema a segment produces from its input schema.
///
/// Pure: resolution and legality checking have already happened; failures
/// here are compiler bugs and surface as internal errors which the pipeline
/// composer converts to sentinels.
pub fn next_struct_def(input: &StructDef, segment: &PipeSegment) -> Result<StructDef> {
    // In-segment declares and joins extend the input before anything in the
    // segment resolves against it.
    let extended;
    let input = match segment {
        PipeSegment::Reduce(ReduceSegment { extend_source, .. })
        | PipeSegment::Project(ProjectSegment { extend_source, .. })
            if !extend_source.is_empty() =>
        {
            let mut with_extensions = input.clone();
            with_extensions.fields.extend(extend_source.iter().cloned());
            extended = with_extensions;
            &extended
        }
        _ => input,
    };

    let fields = match segment {
        PipeSegment::Reduce(seg) => output_fields(input, &seg.fields)?,
        PipeSegment::Project(seg) => output_fields(input, &seg.fields)?,
        PipeSegment::Index(_) => index_output_fields(),
    };

    Ok(StructDef {
        name: input.name.clone(),
        dialect: input.dialect.clone(),
        fields,
        parameters: Default::default(),
        filter_list: Vec::new(),
        primary_key: None,
        struct_source: StructSource::Nested,
        struct_relationship: StructRelationship::BaseTable,
        location: input.location.clone(),
    })
}

fn output_fields(input: &StructDef, fields: &[SegmentField]) -> Result<Vec<FieldDef>> {
    let mut atomics = Vec::new();
    let mut nests = Vec::new();

    for field in fields {
        match field {
            SegmentField::Reference(path) => {
                let def = resolve_path(input, path)?;
                atomics.push(FieldDef::Atomic(AtomicFieldDef {
                    name: field.output_name().to_string(),
                    ..def.clone()
                }));
            }
            SegmentField::Atomic(def) => atomics.push(FieldDef::Atomic(def.clone())),
            SegmentField::Nested(nest) => {
                let mut current = input.clone();
                for seg in &nest.pipeline.segments {
                    current = next_struct_def(&current, seg)?;
                }
                nests.push(FieldDef::Struct(StructDef {
                    name: nest.name.clone(),
                    struct_relationship: StructRelationship::Nested,
                    ..current
                }));
            }
        }
    }

    atomics.extend(nests);
    Ok(atomics)
}

fn resolve_path<'a>(input: &'a StructDef, path: &str) -> Result<&'a AtomicFieldDef> {
    let mut current = input;
    let mut segments = path.split('.').peekable();

    while let Some(seg) = segments.next() {
        let field = current.field(seg).ok_or_else(|| {
            MalloyError::internal(format!(
                "segment field '{path}' not found in struct '{}'",
                input.name
            ))
        })?;

        match field {
            FieldDef::Atomic(def) => {
                if segments.peek().is_some() {
                    return Err(MalloyError::internal(format!(
                        "'{seg}' in '{path}' is not a join"
                    )));
                }
                return Ok(def);
            }
            FieldDef::Struct(inner) => current = inner,
            FieldDef::Turtle(_) => {
                return Err(MalloyError::internal(format!(
                    "segment field '{path}' resolves to a query"
                )))
            }
        }
    }

    Err(MalloyError::internal(format!("empty field path in '{}'", input.name)))
}

/// The fixed output schema of an index segment.
fn index_output_fields() -> Vec<FieldDef> {
    [
        ("fieldName", AtomicFieldType::String),
        ("fieldValue", AtomicFieldType::String),
        ("fieldType", AtomicFieldType::String),
        ("weight", AtomicFieldType::Number),
    ]
    .into_iter()
    .map(|(name, ty)| FieldDef::Atomic(AtomicFieldDef::column(name, ty)))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::datatype::ExpressionKind;

    fn test_struct() -> StructDef {
        StructDef {
            name: "t".into(),
            dialect: "standardsql".into(),
            fields: vec![
                FieldDef::Atomic(AtomicFieldDef::column("state", AtomicFieldType::String)),
                FieldDef::Atomic(AtomicFieldDef::column("pop", AtomicFieldType::Number)),
            ],
            parameters: Default::default(),
            filter_list: Vec::new(),
            primary_key: None,
            struct_source: StructSource::Table { table: "t".into() },
            struct_relationship: StructRelationship::BaseTable,
            location: None,
        }
    }

    #[test]
    fn reduce_output_carries_referenced_columns() {
        let seg = PipeSegment::Reduce(ReduceSegment {
            fields: vec![
                SegmentField::Reference("state".into()),
                SegmentField::Atomic(AtomicFieldDef {
                    name: "total".into(),
                    data_type: AtomicFieldType::Number,
                    expr: None,
                    kind: ExpressionKind::Aggregate,
                    location: None,
                }),
            ],
            ..Default::default()
        });

        let out = next_struct_def(&test_struct(), &seg).unwrap();
        let names: Vec<_> = out.fields.iter().map(|f| f.name().to_string()).collect();
        assert_eq!(names, ["state", "total"]);
    }

    #[test]
    fn index_output_is_fixed() {
        let seg = PipeSegment::Index(IndexSegment::default());
        let out = next_struct_def(&test_struct(), &seg).unwrap();
        let names: Vec<_> = out.fields.iter().map(|f| f.name().to_string()).collect();
        assert_eq!(names, ["fieldName", "fieldValue", "fieldType", "weight"]);
    }

    #[test]
    fn unknown_reference_is_internal() {
        let seg = PipeSegment::Reduce(ReduceSegment {
            fields: vec![SegmentField::Reference("nope".into())],
            ..Default::default()
        });
        assert!(next_struct_def(&test_struct(), &seg).is_err());
    }

    #[test]
    fn pipeline_output_composes_per_segment() {
        // Output after each segment feeds the next.
        let s = test_struct();
        let seg1 = PipeSegment::Reduce(ReduceSegment {
            fields: vec![
                SegmentField::Reference("state".into()),
                SegmentField::Reference("pop".into()),
            ],
            ..Default::default()
        });
        let mid = next_struct_def(&s, &seg1).unwrap();
        let seg2 = PipeSegment::Project(ProjectSegment {
            fields: vec![SegmentField::Reference("pop".into())],
            ..Default::default()
        });
        let out = next_struct_def(&mid, &seg2).unwrap();
        assert_eq!(out.fields.len(), 1);
        assert_eq!(out.fields[0].name(), "pop");
    }
}
