use super::{optimize, optimize_with, parse};
use crate::optimizer::error::{PassError, ProgramError};
use crate::optimizer::runtime::{Evaluator, Value};
use crate::optimizer::transform::{CancellationToken, ProgramTransformationPass};
use crate::optimizer::ast::Literal;
use crate::optimizer::{Optimizer, PestMorayParser, TransformConfig};

fn int(value: i64) -> Value {
    Value::Literal(Literal::INT(value))
}

/// Both versions of a program must agree on every probed input vector.
fn assert_same_semantics(source: &str, optimized: &str, inputs: &[Vec<Value>]) {
    let before = parse(source);
    let after = parse(optimized);
    for arguments in inputs {
        let expected = Evaluator::evaluate_function(before.root(), arguments);
        let actual = Evaluator::evaluate_function(after.root(), arguments);
        assert_eq!(expected, actual, "program semantics diverged for {:?}", arguments);
    }
}

#[test]
fn constant_folding() {
    assert_eq!(
        optimize("int f() { return 22 * 11; }"),
        "int f() {\n    return 242;\n}"
    );
}

#[test]
fn symbolic_substitution_into_a_surviving_operand() {
    assert_eq!(
        optimize("int f(secret int a) { return a * (4 * 7); }"),
        "int f(secret int a) {\n    return a * 28;\n}"
    );
}

#[test]
fn index_access_resolution_builds_sparse_lists() {
    assert_eq!(
        optimize("int f(int img) { int img2; img2[5] = 2 * img[1]; return img2; }"),
        "int f(int img) {\n    return {none, none, none, none, none, 2 * img[1]};\n}"
    );
}

#[test]
fn full_unroll_with_fold() {
    assert_eq!(
        optimize("int f() { int x = 0; for (int i = 0; i < 3; i = i + 1) { x = 42; } return x; }"),
        "int f() {\n    return 42;\n}"
    );
}

#[test]
fn division_by_zero_is_not_folded() {
    assert_eq!(
        optimize("int f(int a) { return a / (3 - 3); }"),
        "int f(int a) {\n    return a / 0;\n}"
    );
}

#[test]
fn known_index_reads_resolve_to_their_slot() {
    assert_eq!(
        optimize("int f() { int v; v[0] = 4; v[1] = 5; return v[0] + v[1]; }"),
        "int f() {\n    return 9;\n}"
    );
}

#[test]
fn compile_time_branches_are_selected() {
    assert_eq!(
        optimize("int f() { int r = 0; if (1 < 2) { r = 5; } else { r = 6; } return r; }"),
        "int f() {\n    return 5;\n}"
    );
    assert_eq!(
        optimize("int f() { int r = 0; if (false) { r = 5; } return r; }"),
        "int f() {\n    return 0;\n}"
    );
}

#[test]
fn runtime_branches_multiplex_their_writes() {
    let source = "int f(int c) { int r = 1; if (c == 0) { r = 2; } else { r = 3; } return r; }";
    let optimized = optimize(source);
    assert_eq!(
        optimized,
        "int f(int c) {\n    return (c == 0) * 2 + (1 - (c == 0)) * 3;\n}"
    );
    assert_same_semantics(source, &optimized, &[vec![int(0)], vec![int(7)]]);
}

#[test]
fn multiplexing_drops_the_vanishing_zero_term() {
    let source = "int f(int c) { int r = 0; if (c == 0) { r = 2; } return r; }";
    let optimized = optimize(source);
    assert_eq!(optimized, "int f(int c) {\n    return (c == 0) * 2;\n}");
    assert_same_semantics(source, &optimized, &[vec![int(0)], vec![int(4)]]);
}

#[test]
fn branches_with_residual_statements_keep_their_writes_observable() {
    let source = "int f(int c, int k) { int v; int x = 0; if (c > 0) { v[k] = 2; x = 1; } return x; }";
    let optimized = optimize(source);
    // The pre-branch value of x and its in-branch write both survive.
    assert!(optimized.contains("x = 0;"), "missing pre-branch value: {}", optimized);
    assert!(optimized.contains("x = 1;"), "missing in-branch write: {}", optimized);
    assert!(optimized.contains("if (c > 0) {"), "missing branch: {}", optimized);
    assert_same_semantics(source, &optimized, &[vec![int(1), int(0)], vec![int(-1), int(0)]]);

    let twice = optimize(&optimized);
    assert_eq!(optimized, twice);
}

#[test]
fn small_pure_callees_are_inlined() {
    let source = "int g(int x) { return x * x; }\nint f(secret int a) { return g(3) + g(a); }";
    assert_eq!(
        optimize(source),
        "int f(secret int a) {\n    return 9 + a * a;\n}"
    );
}

#[test]
fn inlining_respects_the_node_threshold() {
    let source = "int g(int x) { return x * x; }\nint f(int a) { return g(a); }";
    let mut config = TransformConfig::default();
    config.inline_call_node_threshold = 0;
    let optimized = optimize_with(source, config);
    assert!(optimized.contains("g(a)"), "call should have been kept: {}", optimized);
}

#[test]
fn external_calls_are_left_alone() {
    let optimized = optimize("int f(int a) { return rotate(a, 2 * 2); }");
    assert_eq!(optimized, "int f(int a) {\n    return rotate(a, 4);\n}");
}

#[test]
fn unbound_identifiers_are_fatal() {
    let result = Optimizer::<PestMorayParser>::default()
        .optimize_str("int f() { return ghost; }");
    assert!(matches!(result, Err(PassError::Program(ProgramError::Unbound { .. }))));
}

#[test]
fn redeclarations_are_fatal() {
    let result = Optimizer::<PestMorayParser>::default()
        .optimize_str("int f() { int x = 1; int x = 2; return x; }");
    assert!(matches!(result, Err(PassError::Program(ProgramError::Redeclaration { .. }))));
}

#[test]
fn arity_mismatches_are_fatal() {
    let result = Optimizer::<PestMorayParser>::default()
        .optimize_str("int g(int x) { return x; }\nint f() { return g(1, 2); }");
    assert!(matches!(result, Err(PassError::Program(ProgramError::ArityMismatch { .. }))));
}

#[test]
fn diagnostics_name_the_offending_node() {
    let error = Optimizer::<PestMorayParser>::default()
        .optimize_str("int f() { return ghost; }")
        .unwrap_err();
    let diagnostic = error.diagnostic();
    assert!(diagnostic.contains("unbound identifier 'ghost'"));
    assert!(diagnostic.contains("at node"));
}

#[test]
fn cancellation_stops_at_a_block_boundary() {
    let token = CancellationToken::new();
    token.cancel();
    let mut pass = ProgramTransformationPass::new(TransformConfig::default())
        .with_cancellation(token);
    let result = pass.transform(parse("int f() { int x = 1; return x; }"));
    assert!(matches!(result, Err(PassError::Cancelled)));
}

#[test]
fn transformation_is_idempotent() {
    let sources = [
        "int f() { return 22 * 11; }",
        "int f(secret int a) { return a * (4 * 7); }",
        "int f(int img) { int img2; img2[5] = 2 * img[1]; return img2; }",
        "int f() { int x = 0; for (int i = 0; i < 3; i = i + 1) { x = 42; } return x; }",
        "int f(int n) { int x = 0; for (int i = 0; i < n; i = i + 1) { x = x + 1; } return x; }",
        "int f(int n) { int x = 0; while (x < n) { x = x + 1; } return x; }",
        "int f(int c) { int r = 1; if (c == 0) { r = 2; } else { r = 3; } return r; }",
    ];
    for source in sources {
        let once = optimize(source);
        let twice = optimize(&once);
        assert_eq!(once, twice, "second pass changed the program for: {}", source);
    }
}

#[test]
fn semantics_are_preserved_across_the_seed_programs() {
    let programs: &[(&str, Vec<Vec<Value>>)] = &[
        ("int f() { return 22 * 11; }", vec![vec![]]),
        ("int f(secret int a) { return a * (4 * 7); }", vec![vec![int(0)], vec![int(-3)], vec![int(9)]]),
        (
            "int f() { int x = 0; for (int i = 0; i < 3; i = i + 1) { x = 42; } return x; }",
            vec![vec![]],
        ),
        (
            "int f(int n) { int x = 0; for (int i = 0; i < n; i = i + 1) { x = x + 1; } return x; }",
            vec![vec![int(0)], vec![int(5)]],
        ),
        (
            "int f(int c) { int r = 1; if (c == 0) { r = 2; } else { r = 3; } return r; }",
            vec![vec![int(0)], vec![int(1)]],
        ),
    ];
    for (source, inputs) in programs {
        let optimized = optimize(source);
        assert_same_semantics(source, &optimized, inputs);
    }
}

#[test]
fn secret_annotations_survive_the_pipeline() {
    let optimized = optimize("secret int f(secret int a, int b) { return a + b + 0; }");
    assert_eq!(optimized, "secret int f(secret int a, int b) {\n    return a + b + 0;\n}");
}

#[test]
fn ast_json_export_names_the_variants() {
    let ast = parse("int f(int a) { return a + 1; }");
    let json = ast.to_json().to_string();
    assert!(json.contains("FUNCTION"));
    assert!(json.contains("RETURN"));
    assert!(json.contains("\"secret\":false"));
}
