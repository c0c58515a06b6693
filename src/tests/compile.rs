use super::*;
use crate::compile_expr::ExprAst;
use crate::plan::{ArityEntry, ColumnRef, FormulaFn, GroupKind, SinkDescriptor, Source};
use crate::types::ApplicationMode;

fn name_source(name: &str) -> Source {
    Source::Column(ColumnRef::Name(name.to_string()))
}

#[test]
fn compile_and_bind_simple_transform_flow() {
    let planner = SimplePlanner;
    let req = request(
        EntryPoint::Transform,
        &[":c = f(:a, :b)", ":a + 1", "$\"b\""],
    );
    let (pipeline, manifest) = planner.compile(&req).expect("compile should succeed");
    assert_eq!(manifest.formula_count, 3);
    assert_eq!(manifest.source_count, 4);
    assert_eq!(manifest.simple_call_count, 1);
    assert_eq!(manifest.closure_count, 1);
    assert_eq!(manifest.multi_column_count, 0);
    assert!(manifest.summary_line().starts_with("formulas=3 sources=4"));

    let bound = planner
        .bind(&pipeline, &schema(&["a", "b"]), &Runtime::default())
        .expect("bind should succeed");
    assert_eq!(bound.invocations.len(), 3);
    assert_eq!(sink_names(&bound), vec!["c", "a_function", "b"]);
    assert_eq!(bound.invocations[0].flat_columns(), vec!["a", "b"]);
    assert!(bound.subset.is_none());
}

#[test]
fn repeated_reference_compiles_to_one_source_and_parameter() {
    let pipeline = compile_ok(EntryPoint::Transform, &[":y = :x * :x + :x"]);
    let formula = &pipeline.formulas[0];
    assert_eq!(formula.sources, vec![name_source("x")]);
    let FormulaFn::Closure { params, body } = &formula.function else {
        panic!("expected closure, got {:?}", formula.function);
    };
    assert_eq!(*params, 1);
    assert_eq!(body.to_string(), "((#arg0 * #arg0) + #arg0)");
}

#[test]
fn simple_call_returns_callee_and_keeps_duplicate_arguments() {
    let pipeline = compile_ok(
        EntryPoint::Select,
        &["f(:a, :b)", "f(:x, :x)", "g(:a, :b) + 1"],
    );
    assert_eq!(pipeline.formulas[0].function, FormulaFn::Named("f".to_string()));
    assert_eq!(pipeline.formulas[1].function, FormulaFn::Named("f".to_string()));
    assert_eq!(
        pipeline.formulas[1].sources,
        vec![name_source("x"), name_source("x")]
    );
    assert!(matches!(
        pipeline.formulas[2].function,
        FormulaFn::Closure { params: 2, .. }
    ));
}

#[test]
fn simple_calls_can_be_disabled() {
    let mut req = request(EntryPoint::Select, &["f(:a, :b)"]);
    req.opts.simple_calls = false;
    let (pipeline, manifest) = SimplePlanner.compile(&req).expect("compile should succeed");
    assert_eq!(manifest.simple_call_count, 0);
    assert!(matches!(
        pipeline.formulas[0].function,
        FormulaFn::Closure { params: 2, .. }
    ));
}

#[test]
fn broadcast_all_expands_to_one_invocation_per_column() {
    let bound = bind_ok(EntryPoint::Select, &["{All()}"], &["x", "y", "z"]);
    assert_eq!(bound.invocations.len(), 3);
    assert_eq!(sink_names(&bound), vec!["x", "y", "z"]);
    for inv in &bound.invocations {
        assert_eq!(inv.arity.entries, vec![ArityEntry::Scalar]);
    }

    let bound = bind_ok(EntryPoint::Select, &["\"{}_new\" = {All()}"], &["x", "y", "z"]);
    assert_eq!(sink_names(&bound), vec!["x_new", "y_new", "z_new"]);

    let bound = bind_ok(EntryPoint::Select, &["f({Not(:x)})"], &["x", "y", "z"]);
    assert_eq!(sink_names(&bound), vec!["y_f", "z_f"]);
}

#[test]
fn string_templates_resolve_one_based_and_report_bounds() {
    let bound = bind_ok(
        EntryPoint::Transform,
        &["\"{}_{2}\" = f(:a, :b)", "\"{1}x\" = f(:a, :b)"],
        &["a", "b"],
    );
    assert_eq!(sink_names(&bound), vec!["a_b", "ax"]);

    let err = bind_with(
        &Runtime::default(),
        EntryPoint::Transform,
        &["\"{3}\" = f(:a, :b)"],
        &["a", "b"],
    )
    .expect_err("index 3 is out of range");
    assert!(matches!(
        err,
        BindError::InvalidStringIndex {
            index: 3,
            count: 2,
            ..
        }
    ));
}

#[test]
fn expression_target_names_each_broadcast_invocation() {
    let bound = bind_ok(
        EntryPoint::Transform,
        &["$(uppercase({})) = {Cols(:a, :b)} * 2"],
        &["a", "b", "c"],
    );
    assert_eq!(sink_names(&bound), vec!["A", "B"]);
}

#[test]
fn static_name_list_must_match_invocation_count() {
    let bound = bind_ok(
        EntryPoint::Select,
        &["[:p, :q, :r] = {All()}"],
        &["x", "y", "z"],
    );
    assert_eq!(sink_names(&bound), vec!["p", "q", "r"]);

    let err = bind_with(
        &Runtime::default(),
        EntryPoint::Select,
        &["[:p, :q] = {All()}"],
        &["x", "y", "z"],
    )
    .expect_err("two names for three invocations");
    assert!(matches!(
        err,
        BindError::SinkArity {
            names: 2,
            invocations: 3
        }
    ));
}

#[test]
fn broadcast_groups_must_agree_in_length() {
    let err = bind_with(
        &Runtime::default(),
        EntryPoint::Select,
        &["f({Cols(:a, :b)}, {All()})"],
        &["a", "b", "c"],
    )
    .expect_err("lengths 2 and 3 differ");
    assert!(matches!(
        err,
        BindError::BroadcastLengthMismatch { lhs: 2, rhs: 3 }
    ));
}

#[test]
fn aggregate_group_arrives_as_one_tuple_argument() {
    let pipeline = compile_ok(EntryPoint::Combine, &[":t = tuple(:a, {{Not(:a)}})"]);
    let formula = &pipeline.formulas[0];
    assert!(matches!(
        formula.sources[1],
        Source::Deferred {
            kind: GroupKind::Aggregate,
            ..
        }
    ));
    assert!(matches!(formula.function, FormulaFn::Regroup { .. }));

    let runtime = Runtime::default();
    let bound = SimplePlanner
        .bind(&pipeline, &schema(&["a", "b", "c"]), &runtime)
        .expect("bind should succeed");
    assert_eq!(bound.invocations.len(), 1);
    let inv = &bound.invocations[0];
    assert_eq!(inv.args, vec![vec!["a"], vec!["b", "c"]]);
    assert_eq!(
        inv.arity.entries[1],
        ArityEntry::Group {
            kind: GroupKind::Aggregate,
            size: Some(2)
        }
    );
    let out = runtime
        .call(&inv.function, &[Value::Int(1), Value::Int(2), Value::Int(3)])
        .expect("call should succeed");
    assert_eq!(
        out,
        Value::Tuple(vec![
            Value::Int(1),
            Value::Tuple(vec![Value::Int(2), Value::Int(3)])
        ])
    );
}

#[test]
fn dynamic_and_positional_references_resolve_at_bind() {
    let mut runtime = Runtime::new();
    runtime.register_constant("col", Value::str("c"));
    let bound = bind_with(
        &runtime,
        EntryPoint::Select,
        &["$col", "$2", "$(\"a\")"],
        &["a", "b", "c"],
    )
    .expect("bind should succeed");
    assert_eq!(sink_names(&bound), vec!["c", "b", "a"]);

    let err = bind_with(&runtime, EntryPoint::Select, &["$9"], &["a"])
        .expect_err("position out of range");
    assert!(matches!(
        err,
        BindError::PositionOutOfRange {
            position: 9,
            count: 1
        }
    ));
    let err = bind_with(&runtime, EntryPoint::Select, &[":zz"], &["a"])
        .expect_err("unknown column");
    assert!(matches!(err, BindError::ColumnNotFound { .. }));
}

#[test]
fn escapes_and_qualified_paths_are_never_sources() {
    let pipeline = compile_ok(
        EntryPoint::Transform,
        &[":y = f(:a, ^(:b), Consts.scale)"],
    );
    assert_eq!(pipeline.formulas[0].sources, vec![name_source("a")]);
    let FormulaFn::Closure { body, .. } = &pipeline.formulas[0].function else {
        panic!("expected closure");
    };
    assert_eq!(body.to_string(), "f(#arg0, :b, Consts.scale)");
}

#[test]
fn elementwise_call_is_lowered_to_row_wise_callee() {
    let pipeline = compile_ok(EntryPoint::Transform, &[":y = f.(:x, :z)"]);
    let formula = &pipeline.formulas[0];
    assert_eq!(formula.function, FormulaFn::Named("f".to_string()));
    assert_eq!(formula.mode, ApplicationMode::ByRow);
}

#[test]
fn modifiers_select_mode_and_wrap_passmissing() {
    let pipeline = compile_ok(
        EntryPoint::Transform,
        &["@byrow @passmissing :z = h(:a, :b)", ":w = @byrow h(:a)"],
    );
    assert_eq!(pipeline.formulas[0].mode, ApplicationMode::ByRow);
    assert!(matches!(
        pipeline.formulas[0].function,
        FormulaFn::PassMissing(_)
    ));
    assert_eq!(pipeline.formulas[1].mode, ApplicationMode::ByRow);

    let pipeline = compile_ok(EntryPoint::RowTransform, &["@bycol :m = mean(:a)"]);
    assert_eq!(pipeline.formulas[0].mode, ApplicationMode::ByColumn);
}

#[test]
fn block_argument_expands_and_inherits_modifiers() {
    let pipeline = compile_ok(
        EntryPoint::Transform,
        &["@byrow begin\n  :a2 = :a * 2\n  @passmissing :b2 = :b + 1\nend"],
    );
    assert_eq!(pipeline.formulas.len(), 2);
    assert!(pipeline
        .formulas
        .iter()
        .all(|f| f.mode == ApplicationMode::ByRow));
    assert_eq!(
        pipeline.formulas[0].sink,
        SinkDescriptor::Static(vec!["a2".to_string()])
    );
    assert!(matches!(
        pipeline.formulas[1].function,
        FormulaFn::PassMissing(_)
    ));
}

#[test]
fn astable_block_produces_record_sink_and_reuses_variables() {
    let pipeline = compile_ok(
        EntryPoint::Transform,
        &["@astable begin a = first(:x); :out1 = a; :out2 = a * 10; :out1 = :out1 + 1 end"],
    );
    let formula = &pipeline.formulas[0];
    assert_eq!(formula.sink, SinkDescriptor::ExpandRecord);
    assert_eq!(formula.sources, vec![name_source("x")]);

    let out = Runtime::default()
        .call(&formula.function, &[ints(&[4, 5])])
        .expect("call should succeed");
    assert_eq!(out.field("out1"), Some(&Value::Int(5)));
    assert_eq!(out.field("out2"), Some(&Value::Int(40)));
    let Value::Record(fields) = &out else {
        panic!("expected record");
    };
    assert_eq!(fields.len(), 2, "reassignment reuses the same field");

    let bound = bind_ok(
        EntryPoint::Transform,
        &["@astable :hi = maximum(:x)"],
        &["x"],
    );
    assert_eq!(bound.invocations[0].sink, SinkTarget::ExpandRecord);
}

#[test]
fn astable_destructuring_exposes_each_name() {
    let pipeline = compile_ok(
        EntryPoint::Select,
        &["@astable begin (:lo, :hi) = (minimum(:x), maximum(:x)) end"],
    );
    let out = Runtime::default()
        .call(&pipeline.formulas[0].function, &[ints(&[3, 1, 2])])
        .expect("call should succeed");
    assert_eq!(
        out,
        Value::Record(vec![
            ("lo".to_string(), Value::Int(1)),
            ("hi".to_string(), Value::Int(3)),
        ])
    );
}

#[test]
fn kwargs_are_forwarded_verbatim() {
    let pipeline = compile_ok(
        EntryPoint::Combine,
        &[":m = mean(:a)", "@kwarg ungroup = false", "@kwarg(renamecols = true, n = 2)"],
    );
    assert_eq!(pipeline.formulas.len(), 1);
    assert_eq!(
        pipeline.kwargs,
        vec![
            ("ungroup".to_string(), ExprAst::Bool(false)),
            ("renamecols".to_string(), ExprAst::Bool(true)),
            ("n".to_string(), ExprAst::Integer(2)),
        ]
    );
}

#[test]
fn leading_subset_compiles_column_wise_predicates() {
    let (pipeline, manifest) = SimplePlanner
        .compile(&request(
            EntryPoint::RowTransformInPlace,
            &["@subset(:a > 1, ismissing(:b) == false)", ":c = :a + :b"],
        ))
        .expect("compile should succeed");
    assert_eq!(manifest.predicate_count, 2);
    let stage = pipeline.subset.as_ref().expect("subset stage");
    assert!(stage
        .predicates
        .iter()
        .all(|p| p.mode == ApplicationMode::ByColumn && p.sink == SinkDescriptor::Default));
    assert_eq!(pipeline.formulas[0].mode, ApplicationMode::ByRow);

    let bound = SimplePlanner
        .bind(&pipeline, &schema(&["a", "b"]), &Runtime::default())
        .expect("bind should succeed");
    assert_eq!(bound.subset.as_ref().map(Vec::len), Some(2));
}

#[test]
fn usage_errors_are_reported_at_compile_time() {
    assert!(matches!(
        compile_err(EntryPoint::Transform, &[]),
        CompileError::EmptyRequest
    ));
    assert!(matches!(
        compile_err(
            EntryPoint::TransformInPlace,
            &["@subset(:a > 1)", "@subset(:b > 1)", ":c = :a"]
        ),
        CompileError::MultipleFilters { count: 2 }
    ));
    assert!(matches!(
        compile_err(EntryPoint::Transform, &["@subset(:a > 1)", ":c = :a"]),
        CompileError::FilterNotSupported {
            entry: "transform"
        }
    ));
    assert!(matches!(
        compile_err(EntryPoint::SelectInPlace, &[":c = :a", "@subset(:a > 1)"]),
        CompileError::FilterNotFirst { position: 1 }
    ));
    assert!(matches!(
        compile_err(EntryPoint::Transform, &[":z = @astable begin :a = 1 end"]),
        CompileError::AstableTargetConflict { .. }
    ));
    assert!(matches!(
        compile_err(EntryPoint::Transform, &["@byrow @bycol :z = f(:a)"]),
        CompileError::ConflictingModifiers
    ));
    assert!(matches!(
        compile_err(EntryPoint::Transform, &["@passmissing :z = f(:a)"]),
        CompileError::PassMissingRequiresByRow
    ));
    assert!(matches!(
        compile_err(EntryPoint::Subset, &[":keep = :a > 1"]),
        CompileError::TargetNotAllowed { entry: "subset" }
    ));
    assert!(matches!(
        compile_err(EntryPoint::Transform, &["@custom f(:a)"]),
        CompileError::UnknownAnnotation { .. }
    ));
    assert!(matches!(
        compile_err(EntryPoint::Transform, &["\"{0}\" = f(:a)"]),
        CompileError::InvalidTarget { .. }
    ));
}

#[test]
fn passmissing_is_accepted_for_row_wise_entry_points() {
    let pipeline = compile_ok(EntryPoint::RowSelect, &["@passmissing :z = h(:a, :b)"]);
    assert!(matches!(
        pipeline.formulas[0].function,
        FormulaFn::PassMissing(_)
    ));
}

#[test]
fn elementwise_call_mode_is_settled_before_passmissing_check() {
    let pipeline = compile_ok(EntryPoint::Transform, &["@passmissing :y = f.(:a)"]);
    let formula = &pipeline.formulas[0];
    assert_eq!(formula.mode, ApplicationMode::ByRow);
    assert_eq!(
        formula.function,
        FormulaFn::PassMissing(Box::new(FormulaFn::Named("f".to_string())))
    );

    let pipeline = compile_ok(EntryPoint::Transform, &["@bycol :y = f.(:a)"]);
    let formula = &pipeline.formulas[0];
    assert_eq!(formula.mode, ApplicationMode::ByColumn);
    let FormulaFn::Closure { params, body } = &formula.function else {
        panic!("expected closure, got {:?}", formula.function);
    };
    assert_eq!(*params, 1);
    assert_eq!(body.to_string(), "f.(#arg0)");

    assert!(matches!(
        compile_err(EntryPoint::Transform, &["@bycol @passmissing :y = f.(:a)"]),
        CompileError::PassMissingRequiresByRow
    ));
}

#[test]
fn kwargs_before_the_filter_do_not_shift_its_position() {
    let pipeline = compile_ok(
        EntryPoint::TransformInPlace,
        &["@kwarg renamecols = false", "@subset(:a > 1)", ":b = :a"],
    );
    assert!(pipeline.subset.is_some());
    assert_eq!(pipeline.kwargs.len(), 1);

    assert!(matches!(
        compile_err(
            EntryPoint::TransformInPlace,
            &["@kwarg renamecols = false", ":b = :a", "@subset(:a > 1)"]
        ),
        CompileError::FilterNotFirst { position: 1 }
    ));
}
