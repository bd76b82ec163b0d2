//! Property tests for the lattice merges and the space filtering laws.

use malloy_ast::{FieldListEdit, FieldListEditKind, Location};
use malloy_semantic::diagnostics::Diagnostics;
use malloy_semantic::model::{
    max_expression_type, merge_eval_spaces, AtomicFieldDef, AtomicFieldType, EvalSpace,
    ExpressionKind, FieldDef, StructDef, StructRelationship, StructSource,
};
use malloy_semantic::spaces::Spaces;
use proptest::prelude::*;
use std::collections::BTreeSet;

fn eval_space() -> impl Strategy<Value = EvalSpace> {
    prop_oneof![
        Just(EvalSpace::Constant),
        Just(EvalSpace::Literal),
        Just(EvalSpace::Input),
        Just(EvalSpace::Output),
    ]
}

fn expression_kind() -> impl Strategy<Value = ExpressionKind> {
    prop_oneof![
        Just(ExpressionKind::Scalar),
        Just(ExpressionKind::Aggregate),
        Just(ExpressionKind::Analytic),
        Just(ExpressionKind::UngroupedAggregate),
    ]
}

fn struct_with_fields(names: &[String]) -> StructDef {
    StructDef {
        name: "t".into(),
        dialect: "standardsql".into(),
        fields: names
            .iter()
            .map(|n| FieldDef::Atomic(AtomicFieldDef::column(n, AtomicFieldType::String)))
            .collect(),
        parameters: Default::default(),
        filter_list: Vec::new(),
        primary_key: None,
        struct_source: StructSource::Table { table: "t".into() },
        struct_relationship: StructRelationship::BaseTable,
        location: None,
    }
}

// Unique short field names.
fn field_names() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::btree_set("[a-e][a-z]{0,3}", 1..8)
        .prop_map(|set| set.into_iter().collect())
}

proptest! {
    #[test]
    fn eval_space_merge_is_commutative(a in eval_space(), b in eval_space()) {
        prop_assert_eq!(merge_eval_spaces(a, b), merge_eval_spaces(b, a));
    }

    #[test]
    fn eval_space_merge_is_idempotent(a in eval_space()) {
        prop_assert_eq!(merge_eval_spaces(a, a), a);
    }

    #[test]
    fn expression_kind_scalar_is_identity(k in expression_kind()) {
        prop_assert_eq!(max_expression_type(k, ExpressionKind::Scalar), k);
        prop_assert_eq!(max_expression_type(ExpressionKind::Scalar, k), k);
    }

    #[test]
    fn expression_kind_max_is_associative(
        a in expression_kind(),
        b in expression_kind(),
        c in expression_kind(),
    ) {
        prop_assert_eq!(
            max_expression_type(max_expression_type(a, b), c),
            max_expression_type(a, max_expression_type(b, c))
        );
    }

    #[test]
    fn accept_filter_is_intersection(names in field_names(), listed in field_names()) {
        let def = struct_with_fields(&names);
        let edit = FieldListEdit {
            kind: FieldListEditKind::Accept,
            names: listed.clone(),
            loc: Location::detached(),
        };
        let mut spaces = Spaces::new();
        let r = spaces.filtered_from(&def, Some(&edit));

        let expected: BTreeSet<&String> = {
            let listed: BTreeSet<&String> = listed.iter().collect();
            names.iter().filter(|n| listed.contains(n)).collect()
        };
        let got: BTreeSet<&String> = spaces.entries(r).unwrap().keys().collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn except_filter_is_difference(names in field_names(), listed in field_names()) {
        let def = struct_with_fields(&names);
        let edit = FieldListEdit {
            kind: FieldListEditKind::Except,
            names: listed.clone(),
            loc: Location::detached(),
        };
        let mut spaces = Spaces::new();
        let r = spaces.filtered_from(&def, Some(&edit));

        let expected: BTreeSet<&String> = {
            let listed: BTreeSet<&String> = listed.iter().collect();
            names.iter().filter(|n| !listed.contains(n)).collect()
        };
        let got: BTreeSet<&String> = spaces.entries(r).unwrap().keys().collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn finalize_is_deterministic(names in field_names()) {
        let def = struct_with_fields(&names);
        let mut diagnostics = Diagnostics::new();

        let mut spaces = Spaces::new();
        let r = spaces.new_dynamic(&def);
        let once = spaces.struct_def(r, &mut diagnostics).unwrap();
        let twice = spaces.struct_def(r, &mut diagnostics).unwrap();
        prop_assert_eq!(&once, &twice);

        // A fresh arena over the same struct produces the same result.
        let mut spaces = Spaces::new();
        let r = spaces.new_dynamic(&def);
        let again = spaces.struct_def(r, &mut diagnostics).unwrap();
        prop_assert_eq!(once, again);
    }
}
