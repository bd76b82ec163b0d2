//! Per-segment-kind executors. Each consumes a bag of query properties,
//! enforces what its segment kind allows, and finalizes into a
//! [`crate::model::PipeSegment`], optionally refining an existing one.

mod index;
mod project;
mod reduce;

pub use index::IndexExecutor;
pub use project::ProjectExecutor;
pub use reduce::ReduceExecutor;

use crate::diagnostics::Diagnostics;
use malloy_ast::{QopDesc, QueryProperty, SegmentKindHint};

/// What an unlabeled segment turns out to be. `Aggregate` is a reduce
/// without dimensions; a later `group_by:` promotes it to `Grouping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentType {
    Grouping,
    Aggregate,
    Project,
    Index,
}

impl SegmentType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Grouping => "grouping",
            Self::Aggregate => "aggregate",
            Self::Project => "project",
            Self::Index => "index",
        }
    }
}

pub fn prop_name(prop: &QueryProperty) -> &'static str {
    match prop {
        QueryProperty::GroupBy { .. } => "group_by",
        QueryProperty::Aggregate { .. } => "aggregate",
        QueryProperty::Project { .. } => "project",
        QueryProperty::Index { .. } => "index",
        QueryProperty::Nest { .. } => "nest",
        QueryProperty::Filter { having: false, .. } => "where",
        QueryProperty::Filter { having: true, .. } => "having",
        QueryProperty::Top { .. } => "top",
        QueryProperty::Limit { .. } => "limit",
        QueryProperty::Ordering { .. } => "order_by",
        QueryProperty::Join { .. } => "join",
        QueryProperty::Declare { .. } => "declare",
        QueryProperty::Sample { .. } => "sample",
    }
}

/// The segment kind a property fixes, if any.
fn fixes_type(prop: &QueryProperty) -> Option<SegmentType> {
    match prop {
        QueryProperty::Index { .. } => Some(SegmentType::Index),
        QueryProperty::GroupBy { .. } | QueryProperty::Nest { .. } => Some(SegmentType::Grouping),
        QueryProperty::Aggregate { .. } => Some(SegmentType::Aggregate),
        QueryProperty::Project { .. } => Some(SegmentType::Project),
        _ => None,
    }
}

/// Classify an unlabeled segment by scanning its properties in order: the
/// first kind-fixing property decides, and later contradicting ones are
/// individually diagnosed. Returns `None` when nothing fixes a kind.
pub fn classify(desc: &QopDesc, diagnostics: &mut Diagnostics) -> Option<SegmentType> {
    if let Some(hint) = desc.kind {
        return Some(match hint {
            SegmentKindHint::Reduce => SegmentType::Grouping,
            SegmentKindHint::Project => SegmentType::Project,
            SegmentKindHint::Index => SegmentType::Index,
        });
    }

    let mut chosen: Option<SegmentType> = None;
    for prop in &desc.properties {
        let Some(fixed) = fixes_type(prop) else {
            continue;
        };
        match chosen {
            None => chosen = Some(fixed),
            Some(current) => {
                let compatible = current == fixed
                    || (current == SegmentType::Aggregate && fixed == SegmentType::Grouping)
                    || (current == SegmentType::Grouping && fixed == SegmentType::Aggregate);
                if !compatible {
                    diagnostics.log(
                        prop.loc(),
                        format!(
                            "{}: not legal in a {} segment",
                            prop_name(prop),
                            current.name()
                        ),
                    );
                } else if current == SegmentType::Aggregate && fixed == SegmentType::Grouping {
                    chosen = Some(SegmentType::Grouping);
                }
            }
        }
    }
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;
    use malloy_ast::Location;

    fn desc(props: Vec<QueryProperty>) -> QopDesc {
        QopDesc::new(props, Location::detached())
    }

    fn group_by() -> QueryProperty {
        QueryProperty::GroupBy {
            items: Vec::new(),
            loc: Location::detached(),
        }
    }

    fn aggregate() -> QueryProperty {
        QueryProperty::Aggregate {
            items: Vec::new(),
            loc: Location::detached(),
        }
    }

    fn project() -> QueryProperty {
        QueryProperty::Project {
            items: Vec::new(),
            loc: Location::detached(),
        }
    }

    #[test]
    fn first_fixing_property_wins() {
        let mut diagnostics = Diagnostics::new();
        assert_eq!(
            classify(&desc(vec![group_by()]), &mut diagnostics),
            Some(SegmentType::Grouping)
        );
        assert_eq!(
            classify(&desc(vec![project()]), &mut diagnostics),
            Some(SegmentType::Project)
        );
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn aggregate_promotes_to_grouping() {
        let mut diagnostics = Diagnostics::new();
        assert_eq!(
            classify(&desc(vec![aggregate()]), &mut diagnostics),
            Some(SegmentType::Aggregate)
        );
        assert_eq!(
            classify(&desc(vec![aggregate(), group_by()]), &mut diagnostics),
            Some(SegmentType::Grouping)
        );
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn contradiction_is_diagnosed() {
        let mut diagnostics = Diagnostics::new();
        assert_eq!(
            classify(&desc(vec![group_by(), project()]), &mut diagnostics),
            Some(SegmentType::Grouping)
        );
        assert!(diagnostics.any_contains("project: not legal in a grouping segment"));
    }

    #[test]
    fn empty_segment_is_unclassified() {
        let mut diagnostics = Diagnostics::new();
        assert_eq!(classify(&desc(Vec::new()), &mut diagnostics), None);
        assert!(diagnostics.is_empty());
    }
}
