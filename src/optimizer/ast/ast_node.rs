use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::datatype::DataType;
use super::literals::Literal;
use super::operators::{BinaryOperation, UnaryOperation};

static NODE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// An identifier that is unique among all nodes during runtime.
/// Ids are handed out monotonically on construction and never reused; they
/// key every auxiliary structure (CFG/DFG nodes, depth maps, scope names)
/// so that cross references never need to own or point into the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(u64);

impl NodeId {
    pub fn fresh() -> NodeId {
        NodeId(NODE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A node of the abstract syntax tree: a stable identity plus a variant.
///
/// The derived `Clone` preserves node ids and is the snapshot operation used
/// for rollback during speculative loop unrolling. Anything that is destined
/// for the residual program must be duplicated with `clone_with_fresh_ids`
/// instead, so ids stay unique within a tree.
#[derive(Debug, Clone, Serialize)]
pub struct AstNode {
    id: NodeId,
    kind: NodeKind,
}

/// The variants of the AST model.
///
/// Ownership is strictly tree shaped: every child is owned by exactly one
/// parent through its `Box`/`Vec` slot, and arity is fixed per variant by
/// construction.
#[derive(Debug, Clone, Serialize)]
#[allow(non_camel_case_types)]
pub enum NodeKind {
    /// A constant value used within an expression.
    LITERAL(Literal),

    /// An occurrence of a variable within an expression.
    /// # Example:
    ///     return a * 28;
    ///            ^ -> Identifier
    IDENTIFIER(String),

    /// An expression operation with two arguments.
    /// # Syntax:
    ///     <lhs> <op> <rhs>
    BINARY_OP {
        op: BinaryOperation,
        lhs: Box<AstNode>,
        rhs: Box<AstNode>,
    },

    /// An expression operation with one argument.
    /// # Example:
    ///     return !(a && b);
    ///            ^ -> Unary Operator
    UNARY_OP {
        op: UnaryOperation,
        expression: Box<AstNode>,
    },

    /// Element selection out of a vector valued expression.
    /// # Example:
    ///     img2[5] = 2 * img[1];
    ///                      ^^^ -> Index Access
    INDEX_ACCESS {
        target: Box<AstNode>,
        index: Box<AstNode>,
    },

    /// A list of expression slots. Slots may be absent (`none` in the surface
    /// syntax), which is how sparse vector writes are represented before the
    /// runtime materialises them.
    EXPRESSION_LIST(Vec<Option<AstNode>>),

    /// A call to another function of the program. The callee's definition is
    /// embedded so the engine can inline small pure callees at the call site.
    FUNC_CALL {
        function: Box<AstNode>,
        arguments: Vec<AstNode>,
    },

    /// A call to a function the optimizer has no definition for. Never
    /// inlined and assumed to be opaque.
    EXTERNAL_CALL {
        identifier: String,
        arguments: Vec<AstNode>,
    },

    /// Declares a variable for use in future statements in scope.
    /// # Syntax:
    ///     <datatype> <identifier> (= <expression>)?;
    VAR_DECLARATION {
        datatype: DataType,
        identifier: String,
        expression: Option<Box<AstNode>>,
    },

    /// Assigns a new value to a variable (or one of its slots) within scope.
    /// The target is either an IDENTIFIER or an INDEX_ACCESS.
    ASSIGNMENT {
        target: Box<AstNode>,
        expression: Box<AstNode>,
    },

    /// A sequence of statements sharing one lexical scope.
    SCOPE_BLOCK(Vec<AstNode>),

    /// Conditionally runs one of two sections of code.
    /// # Syntax:
    ///     if (<expression>) { ... } (else { ... })?
    BRANCH {
        condition: Box<AstNode>,
        if_branch: Box<AstNode>,
        else_branch: Option<Box<AstNode>>,
    },

    /// Counting loop. Initializer and update are blocks so that loop-variable
    /// re-materialisation can prepend statements to them.
    /// # Syntax:
    ///     for (<initializer>; <condition>; <update>) { ... }
    FOR_LOOP {
        initializer: Box<AstNode>,
        condition: Box<AstNode>,
        update: Box<AstNode>,
        body: Box<AstNode>,
    },

    /// # Syntax:
    ///     while (<expression>) { ... }
    WHILE_LOOP {
        condition: Box<AstNode>,
        body: Box<AstNode>,
    },

    /// Returns the result of an expression to the function caller.
    RETURN {
        expression: Option<Box<AstNode>>,
    },

    /// A callable section of code. The body is always a SCOPE_BLOCK.
    FUNCTION {
        return_type: DataType,
        identifier: String,
        parameters: Vec<AstNode>,
        body: Box<AstNode>,
    },

    /// A typed parameter of a function definition.
    PARAMETER {
        datatype: DataType,
        identifier: String,
    },
}

impl AstNode {
    pub fn new(kind: NodeKind) -> AstNode {
        AstNode { id: NodeId::fresh(), kind }
    }

    /// Reassembles a node that was taken apart for transformation, keeping
    /// its identity. Only the engine uses this; a kept statement must not
    /// change its id across passes.
    pub(crate) fn rebuilt(id: NodeId, kind: NodeKind) -> AstNode {
        AstNode { id, kind }
    }

    /// Convenience constructor for binary expressions; used heavily by the
    /// branch multiplexer and the cone rewriter.
    pub fn binary(lhs: AstNode, op: BinaryOperation, rhs: AstNode) -> AstNode {
        AstNode::new(NodeKind::BINARY_OP {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    pub fn literal(literal: Literal) -> AstNode {
        AstNode::new(NodeKind::LITERAL(literal))
    }

    pub fn identifier(name: &str) -> AstNode {
        AstNode::new(NodeKind::IDENTIFIER(name.to_string()))
    }

    pub fn empty_block() -> AstNode {
        AstNode::new(NodeKind::SCOPE_BLOCK(vec![]))
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut NodeKind {
        &mut self.kind
    }

    pub fn into_kind(self) -> NodeKind {
        self.kind
    }

    /// Returns the children of a node in declaration order.
    /// This method is helpful when searching the AST for specific nodes
    /// without worrying about the implementation details of non target nodes.
    pub fn children(&self) -> Vec<&AstNode> {
        let mut output: Vec<&AstNode> = vec![];

        match &self.kind {
            NodeKind::LITERAL(_) => {}
            NodeKind::IDENTIFIER(_) => {}
            NodeKind::BINARY_OP { lhs, rhs, .. } => {
                output.push(lhs);
                output.push(rhs);
            }
            NodeKind::UNARY_OP { expression, .. } => {
                output.push(expression);
            }
            NodeKind::INDEX_ACCESS { target, index } => {
                output.push(target);
                output.push(index);
            }
            NodeKind::EXPRESSION_LIST(items) => {
                for item in items.iter().flatten() {
                    output.push(item);
                }
            }
            NodeKind::FUNC_CALL { function, arguments } => {
                output.push(function);
                for argument in arguments {
                    output.push(argument);
                }
            }
            NodeKind::EXTERNAL_CALL { arguments, .. } => {
                for argument in arguments {
                    output.push(argument);
                }
            }
            NodeKind::VAR_DECLARATION { expression, .. } => {
                if let Some(expression) = expression {
                    output.push(expression);
                }
            }
            NodeKind::ASSIGNMENT { target, expression } => {
                output.push(target);
                output.push(expression);
            }
            NodeKind::SCOPE_BLOCK(statements) => {
                for statement in statements {
                    output.push(statement);
                }
            }
            NodeKind::BRANCH { condition, if_branch, else_branch } => {
                output.push(condition);
                output.push(if_branch);
                if let Some(else_branch) = else_branch {
                    output.push(else_branch);
                }
            }
            NodeKind::FOR_LOOP { initializer, condition, update, body } => {
                output.push(initializer);
                output.push(condition);
                output.push(update);
                output.push(body);
            }
            NodeKind::WHILE_LOOP { condition, body } => {
                output.push(condition);
                output.push(body);
            }
            NodeKind::RETURN { expression } => {
                if let Some(expression) = expression {
                    output.push(expression);
                }
            }
            NodeKind::FUNCTION { parameters, body, .. } => {
                for parameter in parameters {
                    output.push(parameter);
                }
                output.push(body);
            }
            NodeKind::PARAMETER { .. } => {}
        }

        output
    }

    /// Mutable counterpart of `children`, in the same order.
    pub fn children_mut(&mut self) -> Vec<&mut AstNode> {
        let mut output: Vec<&mut AstNode> = vec![];

        match &mut self.kind {
            NodeKind::LITERAL(_) | NodeKind::IDENTIFIER(_) | NodeKind::PARAMETER { .. } => {}
            NodeKind::BINARY_OP { lhs, rhs, .. } => {
                output.push(lhs);
                output.push(rhs);
            }
            NodeKind::UNARY_OP { expression, .. } => output.push(expression),
            NodeKind::INDEX_ACCESS { target, index } => {
                output.push(target);
                output.push(index);
            }
            NodeKind::EXPRESSION_LIST(items) => {
                for item in items.iter_mut().flatten() {
                    output.push(item);
                }
            }
            NodeKind::FUNC_CALL { function, arguments } => {
                output.push(function);
                for argument in arguments {
                    output.push(argument);
                }
            }
            NodeKind::EXTERNAL_CALL { arguments, .. } => {
                for argument in arguments {
                    output.push(argument);
                }
            }
            NodeKind::VAR_DECLARATION { expression, .. } => {
                if let Some(expression) = expression {
                    output.push(expression);
                }
            }
            NodeKind::ASSIGNMENT { target, expression } => {
                output.push(target);
                output.push(expression);
            }
            NodeKind::SCOPE_BLOCK(statements) => {
                for statement in statements {
                    output.push(statement);
                }
            }
            NodeKind::BRANCH { condition, if_branch, else_branch } => {
                output.push(condition);
                output.push(if_branch);
                if let Some(else_branch) = else_branch {
                    output.push(else_branch);
                }
            }
            NodeKind::FOR_LOOP { initializer, condition, update, body } => {
                output.push(initializer);
                output.push(condition);
                output.push(update);
                output.push(body);
            }
            NodeKind::WHILE_LOOP { condition, body } => {
                output.push(condition);
                output.push(body);
            }
            NodeKind::RETURN { expression } => {
                if let Some(expression) = expression {
                    output.push(expression);
                }
            }
            NodeKind::FUNCTION { parameters, body, .. } => {
                for parameter in parameters {
                    output.push(parameter);
                }
                output.push(body);
            }
        }

        output
    }

    /// Number of nodes strictly below this one. Drives the call inlining
    /// threshold.
    pub fn count_descendants(&self) -> usize {
        self.children().iter()
            .map(|child| 1 + child.count_descendants())
            .sum()
    }

    /// Deep structural copy with newly generated node ids, for material that
    /// becomes part of the residual program.
    pub fn clone_with_fresh_ids(&self) -> AstNode {
        let kind = match &self.kind {
            NodeKind::LITERAL(literal) => NodeKind::LITERAL(literal.clone()),
            NodeKind::IDENTIFIER(name) => NodeKind::IDENTIFIER(name.clone()),
            NodeKind::BINARY_OP { op, lhs, rhs } => NodeKind::BINARY_OP {
                op: *op,
                lhs: Box::new(lhs.clone_with_fresh_ids()),
                rhs: Box::new(rhs.clone_with_fresh_ids()),
            },
            NodeKind::UNARY_OP { op, expression } => NodeKind::UNARY_OP {
                op: *op,
                expression: Box::new(expression.clone_with_fresh_ids()),
            },
            NodeKind::INDEX_ACCESS { target, index } => NodeKind::INDEX_ACCESS {
                target: Box::new(target.clone_with_fresh_ids()),
                index: Box::new(index.clone_with_fresh_ids()),
            },
            NodeKind::EXPRESSION_LIST(items) => NodeKind::EXPRESSION_LIST(
                items.iter()
                    .map(|item| item.as_ref().map(|node| node.clone_with_fresh_ids()))
                    .collect()
            ),
            NodeKind::FUNC_CALL { function, arguments } => NodeKind::FUNC_CALL {
                function: Box::new(function.clone_with_fresh_ids()),
                arguments: arguments.iter().map(|a| a.clone_with_fresh_ids()).collect(),
            },
            NodeKind::EXTERNAL_CALL { identifier, arguments } => NodeKind::EXTERNAL_CALL {
                identifier: identifier.clone(),
                arguments: arguments.iter().map(|a| a.clone_with_fresh_ids()).collect(),
            },
            NodeKind::VAR_DECLARATION { datatype, identifier, expression } => NodeKind::VAR_DECLARATION {
                datatype: *datatype,
                identifier: identifier.clone(),
                expression: expression.as_ref().map(|e| Box::new(e.clone_with_fresh_ids())),
            },
            NodeKind::ASSIGNMENT { target, expression } => NodeKind::ASSIGNMENT {
                target: Box::new(target.clone_with_fresh_ids()),
                expression: Box::new(expression.clone_with_fresh_ids()),
            },
            NodeKind::SCOPE_BLOCK(statements) => NodeKind::SCOPE_BLOCK(
                statements.iter().map(|s| s.clone_with_fresh_ids()).collect()
            ),
            NodeKind::BRANCH { condition, if_branch, else_branch } => NodeKind::BRANCH {
                condition: Box::new(condition.clone_with_fresh_ids()),
                if_branch: Box::new(if_branch.clone_with_fresh_ids()),
                else_branch: else_branch.as_ref().map(|e| Box::new(e.clone_with_fresh_ids())),
            },
            NodeKind::FOR_LOOP { initializer, condition, update, body } => NodeKind::FOR_LOOP {
                initializer: Box::new(initializer.clone_with_fresh_ids()),
                condition: Box::new(condition.clone_with_fresh_ids()),
                update: Box::new(update.clone_with_fresh_ids()),
                body: Box::new(body.clone_with_fresh_ids()),
            },
            NodeKind::WHILE_LOOP { condition, body } => NodeKind::WHILE_LOOP {
                condition: Box::new(condition.clone_with_fresh_ids()),
                body: Box::new(body.clone_with_fresh_ids()),
            },
            NodeKind::RETURN { expression } => NodeKind::RETURN {
                expression: expression.as_ref().map(|e| Box::new(e.clone_with_fresh_ids())),
            },
            NodeKind::FUNCTION { return_type, identifier, parameters, body } => NodeKind::FUNCTION {
                return_type: *return_type,
                identifier: identifier.clone(),
                parameters: parameters.iter().map(|p| p.clone_with_fresh_ids()).collect(),
                body: Box::new(body.clone_with_fresh_ids()),
            },
            NodeKind::PARAMETER { datatype, identifier } => NodeKind::PARAMETER {
                datatype: *datatype,
                identifier: identifier.clone(),
            },
        };

        AstNode::new(kind)
    }

    /// Structural equality that ignores node ids. Two trees compare equal
    /// exactly when they print identically, but this does not allocate.
    pub fn structural_eq(&self, other: &AstNode) -> bool {
        match (&self.kind, &other.kind) {
            (NodeKind::LITERAL(a), NodeKind::LITERAL(b)) => a == b,
            (NodeKind::IDENTIFIER(a), NodeKind::IDENTIFIER(b)) => a == b,
            (NodeKind::BINARY_OP { op: op_a, lhs: lhs_a, rhs: rhs_a },
             NodeKind::BINARY_OP { op: op_b, lhs: lhs_b, rhs: rhs_b }) => {
                op_a == op_b && lhs_a.structural_eq(lhs_b) && rhs_a.structural_eq(rhs_b)
            }
            (NodeKind::UNARY_OP { op: op_a, expression: expr_a },
             NodeKind::UNARY_OP { op: op_b, expression: expr_b }) => {
                op_a == op_b && expr_a.structural_eq(expr_b)
            }
            (NodeKind::INDEX_ACCESS { target: target_a, index: index_a },
             NodeKind::INDEX_ACCESS { target: target_b, index: index_b }) => {
                target_a.structural_eq(target_b) && index_a.structural_eq(index_b)
            }
            (NodeKind::EXPRESSION_LIST(items_a), NodeKind::EXPRESSION_LIST(items_b)) => {
                items_a.len() == items_b.len()
                    && items_a.iter().zip(items_b).all(|(a, b)| match (a, b) {
                        (Some(a), Some(b)) => a.structural_eq(b),
                        (None, None) => true,
                        _ => false,
                    })
            }
            (NodeKind::FUNC_CALL { function: func_a, arguments: args_a },
             NodeKind::FUNC_CALL { function: func_b, arguments: args_b }) => {
                func_a.structural_eq(func_b)
                    && args_a.len() == args_b.len()
                    && args_a.iter().zip(args_b).all(|(a, b)| a.structural_eq(b))
            }
            (NodeKind::EXTERNAL_CALL { identifier: id_a, arguments: args_a },
             NodeKind::EXTERNAL_CALL { identifier: id_b, arguments: args_b }) => {
                id_a == id_b
                    && args_a.len() == args_b.len()
                    && args_a.iter().zip(args_b).all(|(a, b)| a.structural_eq(b))
            }
            (NodeKind::VAR_DECLARATION { datatype: dt_a, identifier: id_a, expression: expr_a },
             NodeKind::VAR_DECLARATION { datatype: dt_b, identifier: id_b, expression: expr_b }) => {
                dt_a == dt_b && id_a == id_b && match (expr_a, expr_b) {
                    (Some(a), Some(b)) => a.structural_eq(b),
                    (None, None) => true,
                    _ => false,
                }
            }
            (NodeKind::ASSIGNMENT { target: target_a, expression: expr_a },
             NodeKind::ASSIGNMENT { target: target_b, expression: expr_b }) => {
                target_a.structural_eq(target_b) && expr_a.structural_eq(expr_b)
            }
            (NodeKind::SCOPE_BLOCK(stmts_a), NodeKind::SCOPE_BLOCK(stmts_b)) => {
                stmts_a.len() == stmts_b.len()
                    && stmts_a.iter().zip(stmts_b).all(|(a, b)| a.structural_eq(b))
            }
            (NodeKind::BRANCH { condition: cond_a, if_branch: if_a, else_branch: else_a },
             NodeKind::BRANCH { condition: cond_b, if_branch: if_b, else_branch: else_b }) => {
                cond_a.structural_eq(cond_b) && if_a.structural_eq(if_b) && match (else_a, else_b) {
                    (Some(a), Some(b)) => a.structural_eq(b),
                    (None, None) => true,
                    _ => false,
                }
            }
            (NodeKind::FOR_LOOP { initializer: init_a, condition: cond_a, update: update_a, body: body_a },
             NodeKind::FOR_LOOP { initializer: init_b, condition: cond_b, update: update_b, body: body_b }) => {
                init_a.structural_eq(init_b) && cond_a.structural_eq(cond_b)
                    && update_a.structural_eq(update_b) && body_a.structural_eq(body_b)
            }
            (NodeKind::WHILE_LOOP { condition: cond_a, body: body_a },
             NodeKind::WHILE_LOOP { condition: cond_b, body: body_b }) => {
                cond_a.structural_eq(cond_b) && body_a.structural_eq(body_b)
            }
            (NodeKind::RETURN { expression: expr_a }, NodeKind::RETURN { expression: expr_b }) => {
                match (expr_a, expr_b) {
                    (Some(a), Some(b)) => a.structural_eq(b),
                    (None, None) => true,
                    _ => false,
                }
            }
            (NodeKind::FUNCTION { return_type: rt_a, identifier: id_a, parameters: params_a, body: body_a },
             NodeKind::FUNCTION { return_type: rt_b, identifier: id_b, parameters: params_b, body: body_b }) => {
                rt_a == rt_b && id_a == id_b
                    && params_a.len() == params_b.len()
                    && params_a.iter().zip(params_b).all(|(a, b)| a.structural_eq(b))
                    && body_a.structural_eq(body_b)
            }
            (NodeKind::PARAMETER { datatype: dt_a, identifier: id_a },
             NodeKind::PARAMETER { datatype: dt_b, identifier: id_b }) => {
                dt_a == dt_b && id_a == id_b
            }
            _ => false,
        }
    }

    /// Debug/export serialization.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn is_expression(&self) -> bool {
        matches!(&self.kind,
            NodeKind::LITERAL(_) | NodeKind::IDENTIFIER(_) | NodeKind::BINARY_OP { .. }
          | NodeKind::UNARY_OP { .. } | NodeKind::INDEX_ACCESS { .. }
          | NodeKind::EXPRESSION_LIST(_) | NodeKind::FUNC_CALL { .. }
          | NodeKind::EXTERNAL_CALL { .. })
    }

    pub fn is_statement(&self) -> bool {
        !self.is_expression() && !matches!(&self.kind, NodeKind::PARAMETER { .. })
    }

    /// Whether the node can appear in the circuit view the cone rewriter
    /// operates on. Tree-only constructs (functions, blocks, loops) cannot.
    pub fn supports_circuit_mode(&self) -> bool {
        self.is_expression()
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match &self.kind {
            NodeKind::LITERAL(literal) => Some(literal),
            _ => None,
        }
    }

    pub fn as_int_literal(&self) -> Option<i64> {
        match &self.kind {
            NodeKind::LITERAL(Literal::INT(value)) => Some(*value),
            _ => None,
        }
    }

    /// Utility function for simplifying extracting the name out of an
    /// identifier-shaped node.
    pub fn identifier_name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::IDENTIFIER(name) => Some(name),
            NodeKind::VAR_DECLARATION { identifier, .. } => Some(identifier),
            NodeKind::PARAMETER { identifier, .. } => Some(identifier),
            NodeKind::FUNCTION { identifier, .. } => Some(identifier),
            _ => None,
        }
    }

    pub fn is_empty_block(&self) -> bool {
        matches!(&self.kind, NodeKind::SCOPE_BLOCK(statements) if statements.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::ast::Literal;

    fn sample_expression() -> AstNode {
        AstNode::binary(
            AstNode::literal(Literal::INT(22)),
            BinaryOperation::MUL,
            AstNode::literal(Literal::INT(11)),
        )
    }

    #[test]
    fn fresh_ids_are_unique() {
        let a = AstNode::literal(Literal::INT(1));
        let b = AstNode::literal(Literal::INT(1));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn snapshot_clone_preserves_ids() {
        let node = sample_expression();
        let snapshot = node.clone();
        assert_eq!(node.id(), snapshot.id());
        assert_eq!(node.children()[0].id(), snapshot.children()[0].id());
    }

    #[test]
    fn fresh_clone_renames_every_node() {
        let node = sample_expression();
        let copy = node.clone_with_fresh_ids();
        assert_ne!(node.id(), copy.id());
        assert_ne!(node.children()[0].id(), copy.children()[0].id());
        assert!(node.structural_eq(&copy));
    }

    #[test]
    fn structural_equality_ignores_ids_but_not_shape() {
        let node = sample_expression();
        let same = sample_expression();
        let different = AstNode::binary(
            AstNode::literal(Literal::INT(22)),
            BinaryOperation::ADD,
            AstNode::literal(Literal::INT(11)),
        );
        assert!(node.structural_eq(&same));
        assert!(!node.structural_eq(&different));
    }

    #[test]
    fn descendant_count() {
        assert_eq!(sample_expression().count_descendants(), 2);
        assert_eq!(AstNode::literal(Literal::INT(0)).count_descendants(), 0);
    }

    #[test]
    fn json_export_contains_variant_names() {
        let json = sample_expression().to_json().to_string();
        assert!(json.contains("BINARY_OP"));
        assert!(json.contains("MUL"));
    }
}
