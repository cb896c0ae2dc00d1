use super::{optimize, optimize_with, parse};
use crate::optimizer::ast::Literal;
use crate::optimizer::runtime::{Evaluator, Value};
use crate::optimizer::TransformConfig;

fn int(value: i64) -> Value {
    Value::Literal(Literal::INT(value))
}

fn assert_same_semantics(source: &str, optimized: &str, inputs: &[Vec<Value>]) {
    let before = parse(source);
    let after = parse(optimized);
    for arguments in inputs {
        let expected = Evaluator::evaluate_function(before.root(), arguments);
        let actual = Evaluator::evaluate_function(after.root(), arguments);
        assert_eq!(expected, actual, "loop semantics diverged for {:?}", arguments);
    }
}

#[test]
fn accumulating_loops_fold_to_their_final_value() {
    assert_eq!(
        optimize("int f() { int x = 0; for (int i = 0; i < 5; i = i + 1) { x = x + i; } return x; }"),
        "int f() {\n    return 10;\n}"
    );
}

#[test]
fn nested_loops_unroll_inside_out() {
    let source = "int f() { int x = 0; for (int i = 0; i < 2; i = i + 1) { for (int j = 0; j < 2; j = j + 1) { x = x + 1; } } return x; }";
    assert_eq!(optimize(source), "int f() {\n    return 4;\n}");
}

#[test]
fn loops_over_the_iteration_variable_fold() {
    assert_eq!(
        optimize("int f() { int x = 1; for (int i = 1; i < 5; i = i + 1) { x = x * i; } return x; }"),
        "int f() {\n    return 24;\n}"
    );
}

#[test]
fn runtime_bounds_roll_back_to_a_simplified_loop() {
    let source = "int f(int n) { int x = 0; for (int i = 0; i < n; i = i + 1) { x = x + 1; } return x; }";
    let optimized = optimize(source);
    assert_eq!(
        optimized,
        "int f(int n) {\n    int x;\n    for (int i = 0, x = 0; i < n; ) {\n        i = i + 1;\n        x = x + 1;\n    }\n    return x;\n}"
    );
    assert_same_semantics(source, &optimized, &[vec![int(0)], vec![int(1)], vec![int(6)]]);
}

#[test]
fn hitting_the_iteration_cap_rolls_back() {
    let source = "int f() { int x = 0; for (int i = 0; i < 10; i = i + 1) { x = x + 1; } return x; }";
    let mut config = TransformConfig::default();
    config.max_unroll_iterations = 3;
    let optimized = optimize_with(source, config);
    assert!(optimized.contains("for ("), "expected a residual loop: {}", optimized);
    assert_same_semantics(source, &optimized, &[vec![]]);
}

#[test]
fn nested_unrolling_respects_the_nesting_limit() {
    let source = "int f() { int x = 0; for (int i = 0; i < 2; i = i + 1) { x = x + 1; } return x; }";
    let mut config = TransformConfig::default();
    config.max_nested_unrollings = 0;
    let optimized = optimize_with(source, config);
    assert!(optimized.contains("for ("), "expected a residual loop: {}", optimized);
    assert_same_semantics(source, &optimized, &[vec![]]);
}

#[test]
fn while_loops_are_simplified_but_never_unrolled() {
    let source = "int f(int n) { int x = 0; while (x < n) { x = x + 1; } return x; }";
    let optimized = optimize(source);
    assert_eq!(
        optimized,
        "int f(int n) {\n    int x;\n    x = 0;\n    while (x < n) {\n        x = x + 1;\n    }\n    return x;\n}"
    );
    assert_same_semantics(source, &optimized, &[vec![int(0)], vec![int(4)]]);
}

#[test]
fn write_only_variables_keep_their_pre_loop_value() {
    // When the loop runs zero times, x must still be 0 afterwards, so its
    // pre-loop value has to survive into the residual initializer.
    let source = "int f(int n) { int x = 0; for (int i = 0; i < n; i = i + 1) { x = 42; } return x; }";
    let optimized = optimize(source);
    assert_same_semantics(source, &optimized, &[vec![int(0)], vec![int(2)]]);

    let twice = optimize(&optimized);
    assert_eq!(optimized, twice);
}

#[test]
fn rollback_leaves_a_stable_program() {
    // A rolled-back loop must not change further on a second pass: the
    // snapshot restore is total.
    let source = "int f(int n) { int x = 0; for (int i = 0; i < n; i = i + 1) { x = x + 1; } return x; }";
    let once = optimize(source);
    let twice = optimize(&once);
    assert_eq!(once, twice);
}

#[test]
fn unrolled_residue_keeps_non_absorbable_statements() {
    // The indexed write with an unknown slot cannot be absorbed; unrolling
    // still happens and each iteration's write survives.
    let source = "int f(int k) { int v; for (int i = 0; i < 2; i = i + 1) { v[k] = i; } return v[k]; }";
    let optimized = optimize(source);
    assert!(optimized.contains("v[k] = 0;"), "missing first iteration write: {}", optimized);
    assert!(optimized.contains("v[k] = 1;"), "missing second iteration write: {}", optimized);
}

#[test]
fn loop_variables_seeded_from_parameters_stay_symbolic() {
    let source = "int f(int n) { int x = n; for (int i = 0; i < 2; i = i + 1) { x = x + 1; } return x; }";
    let optimized = optimize(source);
    assert_eq!(optimized, "int f(int n) {\n    return n + 1 + 1;\n}");
    assert_same_semantics(source, &optimized, &[vec![int(0)], vec![int(40)]]);
}
