//! End-to-end plan tests: documents built the way a parser would build
//! them, compiled against an in-memory schema zone, with assertions on the
//! produced plans and diagnostics.

use malloy_ast as ast;
use malloy_ast::{
    AggregateFunc, BinaryOperator, ExprKind, ExprNode, Location, QopDesc, QueryItem,
    QueryProperty, TypeName, UngroupKind,
};
use malloy_semantic::model::{
    AtomicFieldDef, AtomicFieldType, BySpec, Parameter, PipeSegment, PlanExpr, SegmentField,
    StructDef, StructRef, StructRelationship, StructSource,
};
use malloy_semantic::{execute, PassResult, SchemaZone, SqlZone};

fn loc() -> Location {
    Location::detached()
}

fn airports_schema() -> StructDef {
    StructDef {
        name: "airports".into(),
        dialect: "standardsql".into(),
        fields: vec![
            atomic("state", AtomicFieldType::String),
            atomic("city", AtomicFieldType::String),
            atomic("code", AtomicFieldType::String),
            atomic("elevation", AtomicFieldType::Number),
            atomic("amount", AtomicFieldType::Number),
        ],
        parameters: Default::default(),
        filter_list: Vec::new(),
        primary_key: None,
        struct_source: StructSource::Table {
            table: "airports".into(),
        },
        struct_relationship: StructRelationship::BaseTable,
        location: None,
    }
}

fn atomic(name: &str, ty: AtomicFieldType) -> malloy_semantic::model::FieldDef {
    malloy_semantic::model::FieldDef::Atomic(AtomicFieldDef::column(name, ty))
}

fn zones_with_airports() -> (SchemaZone, SqlZone) {
    let schema_zone = SchemaZone::new();
    schema_zone.define("airports", airports_schema());
    (schema_zone, SqlZone::new())
}

fn table(name: &str) -> ast::SourceDesc {
    ast::SourceDesc::Table {
        name: name.into(),
        loc: loc(),
    }
}

fn field_ref(name: &str) -> QueryItem {
    QueryItem::Ref {
        path: vec![name.into()],
        loc: loc(),
    }
}

fn field_def(name: &str, expr: ExprNode) -> QueryItem {
    QueryItem::Def(ast::FieldDecl {
        name: name.into(),
        expr,
        loc: loc(),
    })
}

fn sum_of(name: &str) -> ExprNode {
    ExprNode::synth(ExprKind::Aggregate {
        func: AggregateFunc::Sum,
        source: None,
        expr: Some(Box::new(ExprNode::id(&[name]))),
        distinct: false,
    })
}

fn source_query(source: ast::SourceDesc, segments: Vec<QopDesc>) -> ast::QueryDef {
    ast::QueryDef {
        head: ast::QueryHead::Source(source),
        refinement: None,
        turtle: None,
        segments,
        loc: loc(),
    }
}

fn run(statements: Vec<ast::Statement>) -> PassResult {
    let (schema_zone, sql_zone) = zones_with_airports();
    execute(
        &ast::Document { statements },
        &schema_zone,
        &sql_zone,
    )
}

fn messages(result: &PassResult) -> Vec<&str> {
    result
        .diagnostics
        .iter()
        .map(|d| d.message.as_str())
        .collect()
}

#[test]
fn simplest_group_by() {
    // query: q is table('airports') -> { group_by: state }
    let result = run(vec![ast::Statement::RunQuery {
        query: source_query(
            table("airports"),
            vec![QopDesc::new(
                vec![QueryProperty::GroupBy {
                    items: vec![field_ref("state")],
                    loc: loc(),
                }],
                loc(),
            )],
        ),
        loc: loc(),
    }]);

    assert!(messages(&result).is_empty(), "{:?}", messages(&result));
    assert!(result.is_complete());
    assert_eq!(result.queries.len(), 1);

    let query = &result.queries[0];
    match &query.struct_ref {
        StructRef::Inline(def) => assert_eq!(def.name, "airports"),
        other => panic!("expected inline struct ref, got {other:?}"),
    }

    assert_eq!(query.pipeline.segments.len(), 1);
    match &query.pipeline.segments[0] {
        PipeSegment::Reduce(seg) => {
            assert_eq!(seg.fields, [SegmentField::Reference("state".into())]);
            assert!(seg.order_by.is_none());
            assert!(seg.limit.is_none());
            assert!(seg.filter_list.is_empty());
        }
        other => panic!("expected reduce, got {other:?}"),
    }
}

#[test]
fn refinement_of_named_query_overlays_limit() {
    // query: q is table('airports') -> { group_by: state; order_by: state }
    // query: r is q + { limit: 10 }
    let base = source_query(
        table("airports"),
        vec![QopDesc::new(
            vec![
                QueryProperty::GroupBy {
                    items: vec![field_ref("state")],
                    loc: loc(),
                },
                QueryProperty::Filter {
                    clauses: vec![ExprNode::binary(
                        ExprNode::id(&["state"]),
                        BinaryOperator::NotEq,
                        ExprNode::synth(ExprKind::Null),
                    )],
                    having: false,
                    loc: loc(),
                },
                QueryProperty::Ordering {
                    items: vec![ast::OrderItem {
                        field: ast::OrderRef::Name("state".into()),
                        dir: None,
                        loc: loc(),
                    }],
                    loc: loc(),
                },
            ],
            loc(),
        )],
    );

    let refined = ast::QueryDef {
        head: ast::QueryHead::Query {
            name: "q".into(),
            loc: loc(),
        },
        refinement: Some(QopDesc::new(
            vec![QueryProperty::Limit { n: 10, loc: loc() }],
            loc(),
        )),
        turtle: None,
        segments: Vec::new(),
        loc: loc(),
    };

    let result = run(vec![
        ast::Statement::DefineQuery {
            name: "q".into(),
            query: base,
            exported: false,
            loc: loc(),
        },
        ast::Statement::RunQuery {
            query: refined,
            loc: loc(),
        },
    ]);

    assert!(messages(&result).is_empty(), "{:?}", messages(&result));

    let q = match &result.model.entry("q").unwrap().value {
        malloy_semantic::ModelValue::Query(q) => q.clone(),
        other => panic!("expected query, got {other:?}"),
    };
    let r = &result.queries[0];

    let expected = match &q.pipeline.segments[0] {
        PipeSegment::Reduce(seg) => {
            let mut seg = seg.clone();
            seg.limit = Some(10);
            seg
        }
        other => panic!("expected reduce, got {other:?}"),
    };
    match &r.pipeline.segments[0] {
        PipeSegment::Reduce(seg) => assert_eq!(seg, &expected),
        other => panic!("expected reduce, got {other:?}"),
    }
}

#[test]
fn project_rejects_aggregate_measures() {
    // ... -> { project: total is sum(amount) }
    let result = run(vec![ast::Statement::RunQuery {
        query: source_query(
            table("airports"),
            vec![QopDesc::new(
                vec![QueryProperty::Project {
                    items: vec![field_def("total", sum_of("amount"))],
                    loc: loc(),
                }],
                loc(),
            )],
        ),
        loc: loc(),
    }]);

    assert!(
        messages(&result).contains(&"Cannot add aggregate measures to project"),
        "{:?}",
        messages(&result)
    );

    match &result.queries[0].pipeline.segments[0] {
        PipeSegment::Project(seg) => match &seg.fields[0] {
            SegmentField::Atomic(def) => {
                assert_eq!(def.name, "total");
                assert_eq!(def.data_type, AtomicFieldType::Error);
            }
            other => panic!("expected error field entry, got {other:?}"),
        },
        other => panic!("expected project, got {other:?}"),
    }
}

#[test]
fn parameter_binding_casts_value() {
    // define s is table('airports') { p :: number }
    // query: s(p is @2020-01-01) -> { group_by: state }
    let source_def = ast::SourceDesc::Refined {
        base: Box::new(table("airports")),
        props: vec![ast::ExploreProperty::Parameters {
            decls: vec![ast::ParameterDecl {
                name: "p".into(),
                ty: TypeName::Number,
                default: None,
                constant: false,
                condition: false,
                loc: loc(),
            }],
            loc: loc(),
        }],
        loc: loc(),
    };

    let use_query = source_query(
        ast::SourceDesc::Named {
            name: "s".into(),
            params: vec![ast::ParameterValue {
                name: "p".into(),
                value: ExprNode::synth(ExprKind::TimeLit {
                    text: "2020-01-01".into(),
                    timestamp: false,
                    unit: Some(ast::TimeUnit::Day),
                }),
                loc: loc(),
            }],
            loc: loc(),
        },
        vec![QopDesc::new(
            vec![QueryProperty::GroupBy {
                items: vec![field_ref("state")],
                loc: loc(),
            }],
            loc(),
        )],
    );

    let result = run(vec![
        ast::Statement::DefineSource {
            name: "s".into(),
            source: source_def,
            exported: true,
            loc: loc(),
        },
        ast::Statement::RunQuery {
            query: use_query,
            loc: loc(),
        },
    ]);

    assert!(
        !messages(&result)
            .iter()
            .any(|m| m.contains("Required parameter")),
        "{:?}",
        messages(&result)
    );

    let query = &result.queries[0];
    let def = match &query.struct_ref {
        StructRef::Inline(def) => def,
        other => panic!("expected inline struct ref, got {other:?}"),
    };
    match def.parameters.get("p") {
        Some(Parameter::Value {
            value: Some(PlanExpr::Cast { to, safe, .. }),
            ..
        }) => {
            assert_eq!(*to, AtomicFieldType::Number);
            assert!(*safe);
        }
        other => panic!("expected cast parameter value, got {other:?}"),
    }
}

#[test]
fn binding_a_parameter_to_its_default_changes_nothing() {
    let source_def = |name: &str| ast::Statement::DefineSource {
        name: name.into(),
        source: ast::SourceDesc::Refined {
            base: Box::new(table("airports")),
            props: vec![ast::ExploreProperty::Parameters {
                decls: vec![ast::ParameterDecl {
                    name: "p".into(),
                    ty: TypeName::Number,
                    default: Some(ExprNode::number("10")),
                    constant: false,
                    condition: false,
                    loc: loc(),
                }],
                loc: loc(),
            }],
            loc: loc(),
        },
        exported: false,
        loc: loc(),
    };
    let query = |params: Vec<ast::ParameterValue>| ast::Statement::RunQuery {
        query: source_query(
            ast::SourceDesc::Named {
                name: "s".into(),
                params,
                loc: loc(),
            },
            vec![QopDesc::new(
                vec![QueryProperty::GroupBy {
                    items: vec![field_ref("state")],
                    loc: loc(),
                }],
                loc(),
            )],
        ),
        loc: loc(),
    };

    let omitted = run(vec![source_def("s"), query(Vec::new())]);
    let supplied = run(vec![
        source_def("s"),
        query(vec![ast::ParameterValue {
            name: "p".into(),
            value: ExprNode::number("10"),
            loc: loc(),
        }]),
    ]);

    assert!(messages(&omitted).is_empty(), "{:?}", messages(&omitted));
    assert!(messages(&supplied).is_empty(), "{:?}", messages(&supplied));
    assert_eq!(omitted.queries, supplied.queries);
}

#[test]
fn circular_field_definition_reports_once() {
    // define bad is table('airports') { dimension: x is x + 1 }
    let source_def = ast::SourceDesc::Refined {
        base: Box::new(table("airports")),
        props: vec![ast::ExploreProperty::Declare {
            kind: ast::DeclareKind::Dimension,
            fields: vec![ast::FieldDecl {
                name: "x".into(),
                expr: ExprNode::binary(
                    ExprNode::id(&["x"]),
                    BinaryOperator::Plus,
                    ExprNode::number("1"),
                ),
                loc: loc(),
            }],
            loc: loc(),
        }],
        loc: loc(),
    };

    let result = run(vec![ast::Statement::DefineSource {
        name: "bad".into(),
        source: source_def,
        exported: false,
        loc: loc(),
    }]);

    assert_eq!(
        messages(&result),
        ["Circular reference to 'x' in definition"]
    );
}

fn nested_exclude_doc(excluded: &str) -> Vec<ast::Statement> {
    // table('airports') -> {
    //   group_by: state
    //   nest: by_city is { group_by: city; aggregate: t is exclude(count(), <excluded>) }
    // }
    let exclude_expr = ExprNode::synth(ExprKind::Ungrouped {
        kind: UngroupKind::Exclude,
        expr: Box::new(ExprNode::synth(ExprKind::Aggregate {
            func: AggregateFunc::Count,
            source: None,
            expr: None,
            distinct: false,
        })),
        fields: vec![excluded.into()],
    });

    let nest = ast::NestEntry::Def {
        name: "by_city".into(),
        base: None,
        refinement: None,
        segments: vec![QopDesc::new(
            vec![
                QueryProperty::GroupBy {
                    items: vec![field_ref("city")],
                    loc: loc(),
                },
                QueryProperty::Aggregate {
                    items: vec![field_def("t", exclude_expr)],
                    loc: loc(),
                },
            ],
            loc(),
        )],
        loc: loc(),
    };

    vec![ast::Statement::RunQuery {
        query: source_query(
            table("airports"),
            vec![QopDesc::new(
                vec![
                    QueryProperty::GroupBy {
                        items: vec![field_ref("state")],
                        loc: loc(),
                    },
                    QueryProperty::Nest {
                        entries: vec![nest],
                        loc: loc(),
                    },
                ],
                loc(),
            )],
        ),
        loc: loc(),
    }]
}

#[test]
fn nested_exclude_of_outer_dimension_is_legal() {
    let result = run(nested_exclude_doc("state"));
    assert!(messages(&result).is_empty(), "{:?}", messages(&result));
}

#[test]
fn nested_exclude_of_missing_dimension_reports_once() {
    let result = run(nested_exclude_doc("region"));
    let found: Vec<_> = messages(&result)
        .into_iter()
        .filter(|m| m.contains("exclude()"))
        .collect();
    assert_eq!(found, ["exclude() 'region' is missing from query output"]);
}

#[test]
fn missing_table_schema_pauses_then_completes() {
    let schema_zone = SchemaZone::new();
    let sql_zone = SqlZone::new();
    let doc = ast::Document {
        statements: vec![ast::Statement::RunQuery {
            query: source_query(
                table("flights"),
                vec![QopDesc::new(
                    vec![QueryProperty::GroupBy {
                        items: vec![field_ref("carrier")],
                        loc: loc(),
                    }],
                    loc(),
                )],
            ),
            loc: loc(),
        }],
    };

    let first = execute(&doc, &schema_zone, &sql_zone);
    let request = first.request.expect("expected a data request");
    assert_eq!(request.table_schemas, ["flights"]);
    assert!(first.queries.is_empty());

    let mut schema = airports_schema();
    schema.name = "flights".into();
    schema.fields = vec![atomic("carrier", AtomicFieldType::String)];
    schema.struct_source = StructSource::Table {
        table: "flights".into(),
    };
    schema_zone.define("flights", schema);

    let second = execute(&doc, &schema_zone, &sql_zone);
    assert!(second.is_complete());
    assert_eq!(second.queries.len(), 1);
    assert!(second.diagnostics.is_empty());
}

#[test]
fn duplicate_primary_key_logs_both_occurrences() {
    let source_def = ast::SourceDesc::Refined {
        base: Box::new(table("airports")),
        props: vec![
            ast::ExploreProperty::PrimaryKey {
                name: "code".into(),
                loc: loc(),
            },
            ast::ExploreProperty::PrimaryKey {
                name: "state".into(),
                loc: loc(),
            },
        ],
        loc: loc(),
    };

    let result = run(vec![ast::Statement::DefineSource {
        name: "s".into(),
        source: source_def,
        exported: false,
        loc: loc(),
    }]);

    let dupes: Vec<_> = messages(&result)
        .into_iter()
        .filter(|m| m.contains("Duplicate primary key"))
        .collect();
    assert_eq!(dupes.len(), 2);
}

#[test]
fn top_by_aggregate_expression_is_legal() {
    let query = source_query(
        table("airports"),
        vec![QopDesc::new(
            vec![
                QueryProperty::GroupBy {
                    items: vec![field_ref("state")],
                    loc: loc(),
                },
                QueryProperty::Top {
                    n: 5,
                    by: Some(ast::TopBy::Expr(Box::new(sum_of("amount")))),
                    loc: loc(),
                },
            ],
            loc(),
        )],
    );
    let result = run(vec![ast::Statement::RunQuery {
        query,
        loc: loc(),
    }]);
    assert!(
        !messages(&result)
            .iter()
            .any(|m| m.contains("top by expression must be an aggregate")),
        "{:?}",
        messages(&result)
    );
    match &result.queries[0].pipeline.segments[0] {
        PipeSegment::Reduce(seg) => {
            assert_eq!(seg.limit, Some(5));
            assert!(matches!(seg.by, Some(BySpec::Expression(_))));
        }
        other => panic!("expected reduce, got {other:?}"),
    }
}

#[test]
fn top_by_scalar_expression_errors() {
    let query = source_query(
        table("airports"),
        vec![QopDesc::new(
            vec![
                QueryProperty::GroupBy {
                    items: vec![field_ref("state")],
                    loc: loc(),
                },
                QueryProperty::Top {
                    n: 5,
                    by: Some(ast::TopBy::Expr(Box::new(ExprNode::id(&["elevation"])))),
                    loc: loc(),
                },
            ],
            loc(),
        )],
    );
    let result = run(vec![ast::Statement::RunQuery {
        query,
        loc: loc(),
    }]);
    assert!(
        messages(&result).contains(&"top by expression must be an aggregate"),
        "{:?}",
        messages(&result)
    );
}

#[test]
fn duplicate_ordering_and_limit_log() {
    let query = source_query(
        table("airports"),
        vec![QopDesc::new(
            vec![
                QueryProperty::GroupBy {
                    items: vec![field_ref("state")],
                    loc: loc(),
                },
                QueryProperty::Ordering {
                    items: vec![ast::OrderItem {
                        field: ast::OrderRef::Ordinal(1),
                        dir: None,
                        loc: loc(),
                    }],
                    loc: loc(),
                },
                QueryProperty::Ordering {
                    items: vec![ast::OrderItem {
                        field: ast::OrderRef::Ordinal(1),
                        dir: None,
                        loc: loc(),
                    }],
                    loc: loc(),
                },
                QueryProperty::Limit { n: 5, loc: loc() },
                QueryProperty::Limit { n: 7, loc: loc() },
            ],
            loc(),
        )],
    );
    let result = run(vec![ast::Statement::RunQuery {
        query,
        loc: loc(),
    }]);
    assert!(messages(&result).contains(&"Query is already sorted"));
    assert!(messages(&result).contains(&"Query is already limited"));
    match &result.queries[0].pipeline.segments[0] {
        PipeSegment::Reduce(seg) => assert_eq!(seg.limit, Some(5)),
        other => panic!("expected reduce, got {other:?}"),
    }
}

#[test]
fn index_segment_dedups_and_keeps_order() {
    let query = source_query(
        table("airports"),
        vec![QopDesc::new(
            vec![QueryProperty::Index {
                fields: vec![
                    field_ref("state"),
                    field_ref("city"),
                    field_ref("state"),
                ],
                weight_by: None,
                loc: loc(),
            }],
            loc(),
        )],
    );
    let result = run(vec![ast::Statement::RunQuery {
        query,
        loc: loc(),
    }]);
    assert!(messages(&result).is_empty(), "{:?}", messages(&result));
    match &result.queries[0].pipeline.segments[0] {
        PipeSegment::Index(seg) => {
            assert_eq!(seg.fields, ["state", "city"]);
        }
        other => panic!("expected index, got {other:?}"),
    }
}

#[test]
fn aggregate_filter_in_where_is_rejected() {
    let query = source_query(
        table("airports"),
        vec![QopDesc::new(
            vec![
                QueryProperty::GroupBy {
                    items: vec![field_ref("state")],
                    loc: loc(),
                },
                QueryProperty::Filter {
                    clauses: vec![ExprNode::binary(
                        sum_of("amount"),
                        BinaryOperator::Gt,
                        ExprNode::number("10"),
                    )],
                    having: false,
                    loc: loc(),
                },
            ],
            loc(),
        )],
    );
    let result = run(vec![ast::Statement::RunQuery {
        query,
        loc: loc(),
    }]);
    assert!(
        messages(&result)
            .contains(&"Aggregate expressions are not allowed in `where:`"),
        "{:?}",
        messages(&result)
    );
}

#[test]
fn scalar_filter_in_having_is_rejected() {
    let query = source_query(
        table("airports"),
        vec![QopDesc::new(
            vec![
                QueryProperty::GroupBy {
                    items: vec![field_ref("state")],
                    loc: loc(),
                },
                QueryProperty::Filter {
                    clauses: vec![ExprNode::binary(
                        ExprNode::id(&["elevation"]),
                        BinaryOperator::Gt,
                        ExprNode::number("10"),
                    )],
                    having: true,
                    loc: loc(),
                },
            ],
            loc(),
        )],
    );
    let result = run(vec![ast::Statement::RunQuery {
        query,
        loc: loc(),
    }]);
    assert!(
        messages(&result).contains(&"`having:` requires an aggregate expression"),
        "{:?}",
        messages(&result)
    );
}

#[test]
fn rename_to_self_is_rejected() {
    let source_def = ast::SourceDesc::Refined {
        base: Box::new(table("airports")),
        props: vec![ast::ExploreProperty::Rename {
            renames: vec![ast::RenameDecl {
                name: "state".into(),
                from: "state".into(),
                loc: loc(),
            }],
            loc: loc(),
        }],
        loc: loc(),
    };
    let result = run(vec![ast::Statement::DefineSource {
        name: "s".into(),
        source: source_def,
        exported: false,
        loc: loc(),
    }]);
    assert!(
        messages(&result).contains(&"Can't rename 'state' to itself"),
        "{:?}",
        messages(&result)
    );
}

#[test]
fn turtle_head_becomes_pipe_head() {
    // define s is table('airports') { query: by_state is { group_by: state } }
    // query: s -> by_state
    let source_def = ast::SourceDesc::Refined {
        base: Box::new(table("airports")),
        props: vec![ast::ExploreProperty::Turtle {
            turtles: vec![ast::TurtleDecl {
                name: "by_state".into(),
                base: None,
                refinement: None,
                segments: vec![QopDesc::new(
                    vec![QueryProperty::GroupBy {
                        items: vec![field_ref("state")],
                        loc: loc(),
                    }],
                    loc(),
                )],
                loc: loc(),
            }],
            loc: loc(),
        }],
        loc: loc(),
    };

    let query = ast::QueryDef {
        head: ast::QueryHead::Source(ast::SourceDesc::Named {
            name: "s".into(),
            params: Vec::new(),
            loc: loc(),
        }),
        refinement: None,
        turtle: Some(ast::TurtleHead {
            name: "by_state".into(),
            refinement: None,
            loc: loc(),
        }),
        segments: Vec::new(),
        loc: loc(),
    };

    let result = run(vec![
        ast::Statement::DefineSource {
            name: "s".into(),
            source: source_def,
            exported: true,
            loc: loc(),
        },
        ast::Statement::RunQuery {
            query,
            loc: loc(),
        },
    ]);

    assert!(messages(&result).is_empty(), "{:?}", messages(&result));
    let q = &result.queries[0];
    assert_eq!(
        q.pipeline.pipe_head.as_ref().map(|h| h.name.as_str()),
        Some("by_state")
    );
    assert!(q.pipeline.segments.is_empty());
    // Exported, parameter-free source resolves by name.
    assert_eq!(q.struct_ref, StructRef::Ref("s".into()));
}

#[test]
fn turtle_head_refinement_materializes() {
    // query: s -> by_state + { limit: 3 }
    let source_def = ast::SourceDesc::Refined {
        base: Box::new(table("airports")),
        props: vec![ast::ExploreProperty::Turtle {
            turtles: vec![ast::TurtleDecl {
                name: "by_state".into(),
                base: None,
                refinement: None,
                segments: vec![QopDesc::new(
                    vec![QueryProperty::GroupBy {
                        items: vec![field_ref("state")],
                        loc: loc(),
                    }],
                    loc(),
                )],
                loc: loc(),
            }],
            loc: loc(),
        }],
        loc: loc(),
    };

    let query = ast::QueryDef {
        head: ast::QueryHead::Source(ast::SourceDesc::Named {
            name: "s".into(),
            params: Vec::new(),
            loc: loc(),
        }),
        refinement: None,
        turtle: Some(ast::TurtleHead {
            name: "by_state".into(),
            refinement: Some(QopDesc::new(
                vec![QueryProperty::Limit { n: 3, loc: loc() }],
                loc(),
            )),
            loc: loc(),
        }),
        segments: Vec::new(),
        loc: loc(),
    };

    let result = run(vec![
        ast::Statement::DefineSource {
            name: "s".into(),
            source: source_def,
            exported: true,
            loc: loc(),
        },
        ast::Statement::RunQuery {
            query,
            loc: loc(),
        },
    ]);

    assert!(messages(&result).is_empty(), "{:?}", messages(&result));
    let q = &result.queries[0];
    assert!(q.pipeline.pipe_head.is_none());
    match &q.pipeline.segments[0] {
        PipeSegment::Reduce(seg) => {
            assert_eq!(seg.fields, [SegmentField::Reference("state".into())]);
            assert_eq!(seg.limit, Some(3));
        }
        other => panic!("expected reduce, got {other:?}"),
    }
}

#[test]
fn accept_except_used_once() {
    let source_def = ast::SourceDesc::Refined {
        base: Box::new(table("airports")),
        props: vec![
            ast::ExploreProperty::FieldListEdit(ast::FieldListEdit {
                kind: ast::FieldListEditKind::Accept,
                names: vec!["state".into()],
                loc: loc(),
            }),
            ast::ExploreProperty::FieldListEdit(ast::FieldListEdit {
                kind: ast::FieldListEditKind::Except,
                names: vec!["city".into()],
                loc: loc(),
            }),
        ],
        loc: loc(),
    };
    let result = run(vec![ast::Statement::DefineSource {
        name: "s".into(),
        source: source_def,
        exported: false,
        loc: loc(),
    }]);
    assert!(
        messages(&result).contains(&"accept: and except: can only be used once"),
        "{:?}",
        messages(&result)
    );
}
