use std::collections::{HashMap, HashSet};

use log::debug;

use crate::optimizer::ast::{Ast, AstNode, BinaryOperation, NodeId, NodeKind};

use super::depth_calculator::{is_multiplicative_gate, MultiplicativeDepthCalculator};

/// A reducible cone: the sub-DAG ending at a critical AND gate whose
/// critical input chain can be rebalanced so that the critical input meets
/// one less multiplicative gate on its way to the output.
#[derive(Debug)]
struct Cone {
    end: NodeId,
    nodes: HashSet<NodeId>,
}

/// Rewrites reducible cones round by round until the maximum multiplicative
/// depth stops improving. A round is only committed when the recomputed
/// depth strictly decreased, so the result never gets worse than the input.
pub struct ConeRewriter;

impl ConeRewriter {
    pub fn apply(ast: Ast) -> Ast {
        apply_cone_rewriting(ast)
    }
}

/// Entry point: depth-minimizes the boolean circuit reachable from the
/// AST's output expression. Trees without multiplicative gates are returned
/// unchanged.
///
/// Guarantees: evaluation is preserved for every input (the rewrite rules
/// are the distributivity and associativity identities of AND over XOR),
/// and `max_mult_depth(result) <= max_mult_depth(input)`.
pub fn apply_cone_rewriting(ast: Ast) -> Ast {
    let mut ast = ast;

    loop {
        let circuit = match circuit_root(ast.root()) {
            Some(circuit) => circuit,
            None => break,
        };
        let calculator = MultiplicativeDepthCalculator::new(circuit);
        let depth_before = calculator.maximum_multiplicative_depth();
        if depth_before == 0 {
            break;
        }

        let cones = compute_reducible_cones(circuit, &calculator);
        let selected = select_cones(cones);
        if selected.is_empty() {
            break;
        }

        let mut replacements: HashMap<NodeId, AstNode> = HashMap::new();
        for cone in &selected {
            if let Some(replacement) = rewrite_cone(circuit, cone, &calculator) {
                replacements.insert(cone.end, replacement);
            }
        }
        if replacements.is_empty() {
            break;
        }

        let mut candidate = ast.root().clone();
        apply_replacements(&mut candidate, &replacements);

        let depth_after = match circuit_root(&candidate) {
            Some(circuit) => MultiplicativeDepthCalculator::new(circuit).maximum_multiplicative_depth(),
            None => break,
        };
        if depth_after < depth_before {
            debug!(
                "cone rewriting reduced multiplicative depth {} -> {} ({} cone(s))",
                depth_before, depth_after, selected.len(),
            );
            ast = Ast::new(candidate);
        } else {
            // The heuristic found no profitable rewrite; keep the original.
            break;
        }
    }

    ast
}

/// The boolean circuit a program exposes: the expression of its (last)
/// return statement, or the node itself when it already is an expression.
fn circuit_root(node: &AstNode) -> Option<&AstNode> {
    match node.kind() {
        NodeKind::FUNCTION { body, .. } => circuit_root(body),
        NodeKind::SCOPE_BLOCK(statements) => statements.iter().rev().find_map(circuit_root),
        NodeKind::RETURN { expression } => expression.as_deref(),
        _ if node.is_expression() => Some(node),
        _ => None,
    }
}

/// Walks the circuit and constructs a cone for every critical AND gate that
/// admits one (Algorithm 1 of the paper, specialised to binary gates).
fn compute_reducible_cones(circuit: &AstNode, calculator: &MultiplicativeDepthCalculator) -> Vec<Cone> {
    let mut cones = vec![];
    collect_cones(circuit, calculator, &mut cones);
    cones
}

fn collect_cones(node: &AstNode, calculator: &MultiplicativeDepthCalculator, cones: &mut Vec<Cone>) {
    if is_multiplicative_gate(node) && calculator.is_critical(node.id()) {
        if let Some(cone) = construct_cone(node, calculator) {
            cones.push(cone);
        }
    }
    for child in super::depth_calculator::circuit_children(node) {
        collect_cones(child, calculator, cones);
    }
}

/// A cone ending at `v` is reducible when exactly one input of `v` is
/// critical, the critical chain runs through XOR gates, and every critical
/// term of that chain is an AND gate with exactly one critical input (those
/// are the gates whose operands can be re-associated to a shallower shape).
fn construct_cone(v: &AstNode, calculator: &MultiplicativeDepthCalculator) -> Option<Cone> {
    let (critical_input, _) = critical_and_non_critical_input(v, calculator)?;

    let mut nodes = HashSet::new();
    nodes.insert(v.id());

    let mut terms = vec![];
    flatten_xor_chain(critical_input, &mut nodes, &mut terms);

    let mut reducible_terms = 0;
    for term in &terms {
        if !calculator.is_critical(term.id()) {
            continue;
        }
        // A critical term only gets shallower if its own critical input can
        // be lifted past the cone's end gate.
        if critical_and_non_critical_input(term, calculator).is_none() {
            return None;
        }
        nodes.insert(term.id());
        reducible_terms += 1;
    }
    if reducible_terms == 0 {
        return None;
    }

    Some(Cone { end: v.id(), nodes })
}

/// Splits a binary AND gate into its critical and non-critical input.
/// Returns None unless exactly one input is critical.
fn critical_and_non_critical_input<'a>(
    gate: &'a AstNode,
    calculator: &MultiplicativeDepthCalculator,
) -> Option<(&'a AstNode, &'a AstNode)> {
    if !is_multiplicative_gate(gate) {
        return None;
    }
    let (lhs, rhs) = match gate.kind() {
        NodeKind::BINARY_OP { lhs, rhs, .. } => (lhs.as_ref(), rhs.as_ref()),
        _ => return None,
    };
    match (calculator.is_critical(lhs.id()), calculator.is_critical(rhs.id())) {
        (true, false) => Some((lhs, rhs)),
        (false, true) => Some((rhs, lhs)),
        _ => None,
    }
}

/// Collects the XOR-chain terms hanging off a cone's critical input,
/// recording the chain's internal gates as cone members.
fn flatten_xor_chain<'a>(node: &'a AstNode, nodes: &mut HashSet<NodeId>, terms: &mut Vec<&'a AstNode>) {
    match node.kind() {
        NodeKind::BINARY_OP { op, lhs, rhs } if op.is_xor() => {
            nodes.insert(node.id());
            flatten_xor_chain(lhs, nodes, terms);
            flatten_xor_chain(rhs, nodes, terms);
        }
        _ => terms.push(node),
    }
}

/// Algorithm 3: a maximal set of node-disjoint cones, greedily preferring
/// larger cones.
fn select_cones(mut cones: Vec<Cone>) -> Vec<Cone> {
    cones.sort_by(|a, b| b.nodes.len().cmp(&a.nodes.len()).then(a.end.cmp(&b.end)));

    let mut taken: HashSet<NodeId> = HashSet::new();
    let mut selected = vec![];
    for cone in cones {
        if cone.nodes.iter().any(|id| taken.contains(id)) {
            continue;
        }
        taken.extend(cone.nodes.iter().copied());
        selected.push(cone);
    }
    selected
}

/// Builds the replacement for a cone's end gate.
///
/// With `v = (t_1 ^^ ... ^^ t_k ^^ r) && nc` and every critical `t_j` of the
/// form `c_j && s_j` with only `c_j` critical, distributing `nc` over the
/// XOR chain and re-associating each critical term yields
///
///     ((s_1 && nc) && c_1) ^^ ... ^^ (r && nc)
///
/// which moves every `c_j` one multiplicative level closer to the output.
fn rewrite_cone(circuit: &AstNode, cone: &Cone, calculator: &MultiplicativeDepthCalculator) -> Option<AstNode> {
    let v = find_node(circuit, cone.end)?;
    let (critical_input, non_critical_input) = critical_and_non_critical_input(v, calculator)?;

    let mut chain_nodes = HashSet::new();
    let mut terms = vec![];
    flatten_xor_chain(critical_input, &mut chain_nodes, &mut terms);

    let mut rewritten_terms = vec![];
    for term in terms {
        let rebalanced = if calculator.is_critical(term.id()) {
            let (term_critical, term_non_critical) = critical_and_non_critical_input(term, calculator)?;
            AstNode::binary(
                AstNode::binary(
                    term_non_critical.clone_with_fresh_ids(),
                    BinaryOperation::LOGICAL_AND,
                    non_critical_input.clone_with_fresh_ids(),
                ),
                BinaryOperation::LOGICAL_AND,
                term_critical.clone_with_fresh_ids(),
            )
        } else {
            AstNode::binary(
                term.clone_with_fresh_ids(),
                BinaryOperation::LOGICAL_AND,
                non_critical_input.clone_with_fresh_ids(),
            )
        };
        rewritten_terms.push(rebalanced);
    }

    Some(rewrite_multi_input_gate_to_binary_gates_chain(rewritten_terms, BinaryOperation::LOGICAL_XOR))
}

/// Folds a list of inputs into a left-leaning chain of binary gates.
pub fn rewrite_multi_input_gate_to_binary_gates_chain(inputs: Vec<AstNode>, op: BinaryOperation) -> AstNode {
    let mut inputs = inputs.into_iter();
    let first = inputs.next()
        .unwrap_or_else(|| panic!("Cannot build a {} chain out of zero inputs", op.symbol()));
    inputs.fold(first, |acc, input| AstNode::binary(acc, op, input))
}

fn find_node(node: &AstNode, id: NodeId) -> Option<&AstNode> {
    if node.id() == id {
        return Some(node);
    }
    node.children().iter().find_map(|child| find_node(child, id))
}

fn apply_replacements(node: &mut AstNode, replacements: &HashMap<NodeId, AstNode>) {
    if let Some(replacement) = replacements.get(&node.id()) {
        *node = replacement.clone();
        return;
    }
    for child in node.children_mut() {
        apply_replacements(child, replacements);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::ast::{Ast, AstNode, BinaryOperation};

    fn and(lhs: AstNode, rhs: AstNode) -> AstNode {
        AstNode::binary(lhs, BinaryOperation::LOGICAL_AND, rhs)
    }

    fn xor(lhs: AstNode, rhs: AstNode) -> AstNode {
        AstNode::binary(lhs, BinaryOperation::LOGICAL_XOR, rhs)
    }

    fn var(name: &str) -> AstNode {
        AstNode::identifier(name)
    }

    /// The ten-input benchmark circuit:
    /// (((a1l && a1r) && (a2l ^^ a2r)) ^^ ((b1l && b1r) && (b2l ^^ b2r)) ^^ y1) && at
    fn benchmark_circuit() -> AstNode {
        let left_cone = and(and(var("a1l"), var("a1r")), xor(var("a2l"), var("a2r")));
        let right_cone = and(and(var("b1l"), var("b1r")), xor(var("b2l"), var("b2r")));
        let chain = xor(xor(left_cone, right_cone), var("y1"));
        and(chain, var("at"))
    }

    #[test]
    fn benchmark_circuit_has_a_reducible_cone() {
        let circuit = benchmark_circuit();
        let calculator = MultiplicativeDepthCalculator::new(&circuit);
        assert_eq!(calculator.maximum_multiplicative_depth(), 3);

        let cones = compute_reducible_cones(&circuit, &calculator);
        assert!(!cones.is_empty());
        let selected = select_cones(cones);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].end, circuit.id());
    }

    #[test]
    fn rewriting_reduces_depth() {
        let ast = Ast::new(benchmark_circuit());
        let rewritten = apply_cone_rewriting(ast);
        let depth = MultiplicativeDepthCalculator::new(rewritten.root())
            .maximum_multiplicative_depth();
        assert_eq!(depth, 2);
    }

    #[test]
    fn depth_never_increases_on_irreducible_circuits() {
        // Both inputs of every AND are critical; nothing to rewrite.
        let circuit = and(and(var("a"), var("b")), and(var("c"), var("d")));
        let before = MultiplicativeDepthCalculator::new(&circuit).maximum_multiplicative_depth();
        let rewritten = apply_cone_rewriting(Ast::new(circuit));
        let after = MultiplicativeDepthCalculator::new(rewritten.root()).maximum_multiplicative_depth();
        assert_eq!(before, after);
    }

    #[test]
    fn multi_input_chain_folds_left() {
        let chain = rewrite_multi_input_gate_to_binary_gates_chain(
            vec![var("a"), var("b"), var("c")],
            BinaryOperation::LOGICAL_XOR,
        );
        let printed = crate::optimizer::printer::print_program(&chain);
        assert_eq!(printed, "a ^^ b ^^ c");
    }
}
