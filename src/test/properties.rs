use std::collections::HashMap;

use proptest::prelude::*;

use crate::optimizer::ast::{Ast, AstNode, BinaryOperation, Literal};
use crate::optimizer::cone::{apply_cone_rewriting, MultiplicativeDepthCalculator};
use crate::optimizer::runtime::{Evaluator, Value};

use super::{optimize, parse};

/// Expression shapes for generated straight-line programs. Variable indices
/// are resolved against whatever is in scope at the use site, so any tree is
/// well formed.
#[derive(Debug, Clone)]
enum GenExpr {
    Lit(i8),
    Var(u8),
    Add(Box<GenExpr>, Box<GenExpr>),
    Sub(Box<GenExpr>, Box<GenExpr>),
    Mul(Box<GenExpr>, Box<GenExpr>),
}

fn arb_expr() -> impl Strategy<Value = GenExpr> {
    let leaf = prop_oneof![
        any::<i8>().prop_map(GenExpr::Lit),
        any::<u8>().prop_map(GenExpr::Var),
    ];
    leaf.prop_recursive(3, 16, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| GenExpr::Add(Box::new(a), Box::new(b))),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| GenExpr::Sub(Box::new(a), Box::new(b))),
            (inner.clone(), inner).prop_map(|(a, b)| GenExpr::Mul(Box::new(a), Box::new(b))),
        ]
    })
}

/// Renders an expression over the parameter `p` and the first `declared`
/// generated locals.
fn render(expr: &GenExpr, declared: usize) -> String {
    match expr {
        GenExpr::Lit(value) => format!("({})", value),
        GenExpr::Var(index) => {
            let choices = declared + 1;
            let pick = *index as usize % choices;
            if pick == 0 {
                "p".to_string()
            } else {
                format!("v{}", pick - 1)
            }
        }
        GenExpr::Add(a, b) => format!("({} + {})", render(a, declared), render(b, declared)),
        GenExpr::Sub(a, b) => format!("({} - {})", render(a, declared), render(b, declared)),
        GenExpr::Mul(a, b) => format!("({} * {})", render(a, declared), render(b, declared)),
    }
}

fn straight_line_program(declarations: &[GenExpr], result: &GenExpr) -> String {
    let mut body = String::new();
    for (index, declaration) in declarations.iter().enumerate() {
        body.push_str(&format!("int v{} = {}; ", index, render(declaration, index)));
    }
    body.push_str(&format!("return {};", render(result, declarations.len())));
    format!("int f(int p) {{ {} }}", body)
}

fn int(value: i64) -> Value {
    Value::Literal(Literal::INT(value))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Running the engine twice never changes the program a second time.
    #[test]
    fn transformation_is_idempotent_on_random_programs(
        declarations in prop::collection::vec(arb_expr(), 0..4),
        result in arb_expr(),
    ) {
        let source = straight_line_program(&declarations, &result);
        let once = optimize(&source);
        let twice = optimize(&once);
        prop_assert_eq!(once, twice);
    }

    /// The residual program computes the same function as the input.
    #[test]
    fn semantics_are_preserved_on_random_programs(
        declarations in prop::collection::vec(arb_expr(), 0..4),
        result in arb_expr(),
    ) {
        let source = straight_line_program(&declarations, &result);
        let optimized = optimize(&source);
        let before = parse(&source);
        let after = parse(&optimized);
        for p in [-2i64, 0, 3, 17] {
            let expected = Evaluator::evaluate_function(before.root(), &[int(p)]);
            let actual = Evaluator::evaluate_function(after.root(), &[int(p)]);
            prop_assert_eq!(expected, actual);
        }
    }

    /// Bounded accumulation loops fully unroll and keep their semantics.
    #[test]
    fn bounded_loops_preserve_semantics(
        seed in -8i64..8,
        bound in 0i64..6,
        step in arb_expr(),
    ) {
        // The loop body may read the accumulator and the counter.
        let body = render(&step, 1)
            .replace('p', "x")
            .replace("v0", "i");
        let source = format!(
            "int f() {{ int x = {}; for (int i = 0; i < {}; i = i + 1) {{ x = x + {}; }} return x; }}",
            seed, bound, body,
        );
        let optimized = optimize(&source);
        prop_assert!(!optimized.contains("for ("), "loop should unroll: {}", optimized);

        let before = parse(&source);
        let after = parse(&optimized);
        let expected = Evaluator::evaluate_function(before.root(), &[]);
        let actual = Evaluator::evaluate_function(after.root(), &[]);
        prop_assert_eq!(expected, actual);
    }
}

/// Circuit shapes for the cone rewriter property.
#[derive(Debug, Clone)]
enum GenCircuit {
    Var(u8),
    And(Box<GenCircuit>, Box<GenCircuit>),
    Xor(Box<GenCircuit>, Box<GenCircuit>),
    Or(Box<GenCircuit>, Box<GenCircuit>),
}

const CIRCUIT_INPUTS: usize = 5;

fn arb_circuit() -> impl Strategy<Value = GenCircuit> {
    let leaf = any::<u8>().prop_map(GenCircuit::Var);
    leaf.prop_recursive(4, 32, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| GenCircuit::And(Box::new(a), Box::new(b))),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| GenCircuit::Xor(Box::new(a), Box::new(b))),
            (inner.clone(), inner).prop_map(|(a, b)| GenCircuit::Or(Box::new(a), Box::new(b))),
        ]
    })
}

fn build_circuit(circuit: &GenCircuit) -> AstNode {
    match circuit {
        GenCircuit::Var(index) => {
            AstNode::identifier(&format!("c{}", *index as usize % CIRCUIT_INPUTS))
        }
        GenCircuit::And(a, b) => AstNode::binary(
            build_circuit(a),
            BinaryOperation::LOGICAL_AND,
            build_circuit(b),
        ),
        GenCircuit::Xor(a, b) => AstNode::binary(
            build_circuit(a),
            BinaryOperation::LOGICAL_XOR,
            build_circuit(b),
        ),
        GenCircuit::Or(a, b) => AstNode::binary(
            build_circuit(a),
            BinaryOperation::LOGICAL_OR,
            build_circuit(b),
        ),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Cone rewriting never increases depth and never changes the function
    /// the circuit computes, exhaustively over all input assignments.
    #[test]
    fn cone_rewriting_preserves_random_circuits(circuit in arb_circuit()) {
        let original = build_circuit(&circuit);
        let depth_before = MultiplicativeDepthCalculator::new(&original)
            .maximum_multiplicative_depth();

        let rewritten = apply_cone_rewriting(Ast::new(original.clone())).into_root();
        let depth_after = MultiplicativeDepthCalculator::new(&rewritten)
            .maximum_multiplicative_depth();
        prop_assert!(depth_after <= depth_before);

        for assignment_bits in 0..(1u32 << CIRCUIT_INPUTS) {
            let assignment: HashMap<String, Literal> = (0..CIRCUIT_INPUTS)
                .map(|bit| (format!("c{}", bit), Literal::BOOL(assignment_bits & (1 << bit) != 0)))
                .collect();
            let expected = Evaluator::evaluate_expression(&original, &assignment).unwrap();
            let actual = Evaluator::evaluate_expression(&rewritten, &assignment).unwrap();
            prop_assert_eq!(expected, actual);
        }
    }
}
