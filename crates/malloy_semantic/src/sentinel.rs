use crate::model::{
    IndexSegment, PipeSegment, Pipeline, ProjectSegment, Query, ReduceSegment, StructDef,
    StructRef, StructRelationship, StructSource,
};

/// Names reserved for sentinels. The leading `//` makes them unproducible
/// from source.
const ERROR_STRUCT_NAME: &str = "//undefined_error_structdef//";
const ERROR_DIALECT: &str = "//undefined_dialect//";

/// Well-formed placeholder values substituted where compilation failed, so
/// downstream stages see a valid (if empty) shape instead of cascading.
pub struct ErrorFactory;

impl ErrorFactory {
    pub fn struct_def() -> StructDef {
        StructDef {
            name: ERROR_STRUCT_NAME.to_string(),
            dialect: ERROR_DIALECT.to_string(),
            fields: Vec::new(),
            parameters: Default::default(),
            filter_list: Vec::new(),
            primary_key: None,
            struct_source: StructSource::Table {
                table: "//undefined_table_path//".to_string(),
            },
            struct_relationship: StructRelationship::BaseTable,
            location: None,
        }
    }

    pub fn is_error_struct_def(s: &StructDef) -> bool {
        s.name == ERROR_STRUCT_NAME
    }

    pub fn reduce_segment() -> PipeSegment {
        PipeSegment::Reduce(ReduceSegment::default())
    }

    pub fn project_segment() -> PipeSegment {
        PipeSegment::Project(ProjectSegment::default())
    }

    pub fn index_segment() -> PipeSegment {
        PipeSegment::Index(IndexSegment::default())
    }

    pub fn query() -> Query {
        Query {
            struct_ref: StructRef::Inline(Box::new(Self::struct_def())),
            pipeline: Pipeline::default(),
            location: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_struct_is_recognizable() {
        assert!(ErrorFactory::is_error_struct_def(&ErrorFactory::struct_def()));
    }

    #[test]
    fn real_structs_are_not_sentinels() {
        let mut s = ErrorFactory::struct_def();
        s.name = "airports".to_string();
        assert!(!ErrorFactory::is_error_struct_def(&s));
    }
}
