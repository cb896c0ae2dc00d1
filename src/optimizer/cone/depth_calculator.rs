use std::collections::HashMap;

use crate::optimizer::ast::{AstNode, NodeId, NodeKind};

/// Precomputed multiplicative depths over the circuit view of an expression
/// tree.
///
/// The circuit view is a read-only index built on demand: `depths` holds
/// `md(n)`, the maximum number of multiplicative gates on any input-to-`n`
/// path, `reverse_depths` holds `rmd(n)`, the same along the reversed edges
/// from `n` to the output. The tree itself is never mutated or re-oriented.
///
/// A gate `n` is critical at the circuit's maximum `L*` iff
/// `md(n) + rmd(n) == L*`; the critical gates form the paths the cone
/// rewriter tries to shorten.
pub struct MultiplicativeDepthCalculator {
    depths: HashMap<NodeId, u32>,
    reverse_depths: HashMap<NodeId, u32>,
    maximum: u32,
}

impl MultiplicativeDepthCalculator {
    pub fn new(circuit: &AstNode) -> Self {
        let mut calculator = MultiplicativeDepthCalculator {
            depths: HashMap::new(),
            reverse_depths: HashMap::new(),
            maximum: 0,
        };
        calculator.compute_depths(circuit);
        calculator.compute_reverse_depths(circuit, 0);
        calculator.maximum = calculator.depths.keys()
            .map(|id| calculator.depth(*id) + calculator.reverse_depth(*id))
            .max()
            .unwrap_or(0);
        calculator
    }

    fn compute_depths(&mut self, node: &AstNode) -> u32 {
        let children_max = circuit_children(node).iter()
            .map(|child| self.compute_depths(child))
            .max()
            .unwrap_or(0);
        let depth = children_max + is_multiplicative_gate(node) as u32;
        self.depths.insert(node.id(), depth);
        depth
    }

    fn compute_reverse_depths(&mut self, node: &AstNode, reverse_depth: u32) {
        self.reverse_depths.insert(node.id(), reverse_depth);
        let child_reverse_depth = reverse_depth + is_multiplicative_gate(node) as u32;
        for child in circuit_children(node) {
            self.compute_reverse_depths(child, child_reverse_depth);
        }
    }

    /// md(n): multiplicative gates on the deepest input-to-n path.
    pub fn depth(&self, id: NodeId) -> u32 {
        self.depths.get(&id).copied().unwrap_or(0)
    }

    /// rmd(n): multiplicative gates between n and the output.
    pub fn reverse_depth(&self, id: NodeId) -> u32 {
        self.reverse_depths.get(&id).copied().unwrap_or(0)
    }

    pub fn maximum_multiplicative_depth(&self) -> u32 {
        self.maximum
    }

    pub fn is_critical(&self, id: NodeId) -> bool {
        self.maximum > 0
            && self.depths.contains_key(&id)
            && self.depth(id) + self.reverse_depth(id) == self.maximum
    }
}

/// Children of a node in the circuit view. Only expression nodes take part;
/// tree-only constructs contribute nothing.
pub(crate) fn circuit_children(node: &AstNode) -> Vec<&AstNode> {
    match node.kind() {
        NodeKind::BINARY_OP { lhs, rhs, .. } => vec![lhs, rhs],
        NodeKind::UNARY_OP { expression, .. } => vec![expression],
        _ => vec![],
    }
}

pub(crate) fn is_multiplicative_gate(node: &AstNode) -> bool {
    matches!(node.kind(), NodeKind::BINARY_OP { op, .. } if op.is_multiplicative())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::ast::{AstNode, BinaryOperation};

    fn and(lhs: AstNode, rhs: AstNode) -> AstNode {
        AstNode::binary(lhs, BinaryOperation::LOGICAL_AND, rhs)
    }

    fn xor(lhs: AstNode, rhs: AstNode) -> AstNode {
        AstNode::binary(lhs, BinaryOperation::LOGICAL_XOR, rhs)
    }

    fn var(name: &str) -> AstNode {
        AstNode::identifier(name)
    }

    #[test]
    fn xor_gates_are_free() {
        let circuit = xor(xor(var("a"), var("b")), var("c"));
        let calculator = MultiplicativeDepthCalculator::new(&circuit);
        assert_eq!(calculator.maximum_multiplicative_depth(), 0);
    }

    #[test]
    fn nested_ands_accumulate_depth() {
        let circuit = and(and(var("a"), var("b")), var("c"));
        let calculator = MultiplicativeDepthCalculator::new(&circuit);
        assert_eq!(calculator.maximum_multiplicative_depth(), 2);
    }

    #[test]
    fn critical_path_is_the_deep_branch() {
        let deep = and(and(var("a"), var("b")), var("c"));
        let deep_id = deep.id();
        let shallow = var("y");
        let shallow_id = shallow.id();
        let circuit = xor(deep, shallow);
        let calculator = MultiplicativeDepthCalculator::new(&circuit);

        assert_eq!(calculator.maximum_multiplicative_depth(), 2);
        assert!(calculator.is_critical(deep_id));
        assert!(!calculator.is_critical(shallow_id));
    }
}
