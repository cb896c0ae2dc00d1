//! The program transformation engine: constant folding, symbolic value
//! propagation through the scoped environment, index-access specialization,
//! branch elimination with multiplex merging, call inlining, and speculative
//! full loop unrolling with rollback.
//!
//! The pass owns the tree it transforms. Handlers consume a node and return
//! an explicit result (kept node, or removed) that the parent applies, so no
//! hidden state flows between visits. Errors abort the pass before anything
//! is handed back to the caller.

pub mod folding;
mod loops;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{trace, warn};

use super::analysis::ControlFlowGraph;
use super::ast::{
    Ast,
    AstNode,
    DataType,
    Literal,
    NodeId,
    NodeKind,
    BinaryOperation,
    ScopeTracker,
    ScopedIdentifier,
    TypedValue,
    VariableEnvironment,
};
use super::config::TransformConfig;
use super::error::{InternalError, PassError, ProgramError};
use super::printer::print_program;

/// Cooperative cancellation handle. A pass checks it at block boundaries:
/// the current statement always finishes, then the pass raises `Cancelled`.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// What became of a visited statement.
#[derive(Debug)]
pub enum StmtResult {
    /// The statement stays in the program, possibly rewritten.
    Kept(AstNode),
    /// The statement's effect has been absorbed into the environment.
    Removed,
}

/// The main optimization pass. One instance drives exactly one invocation;
/// the scope tracker, environment and bookkeeping sets live only for that
/// long.
pub struct ProgramTransformationPass {
    pub(crate) scopes: ScopeTracker,
    pub(crate) env: VariableEnvironment,
    pub(crate) config: TransformConfig,

    /// Declarations the engine emitted itself (loop-variable
    /// re-materialisation, re-emitted outer declarations). Re-visiting one
    /// of these is not a redeclaration.
    pub(crate) emitted_declarations: HashSet<NodeId>,

    /// Variables whose declaration is known to exist in the residual
    /// program (parameters, emitted declarations). Guards against emitting
    /// the same declaration twice.
    pub(crate) declarations_present: HashSet<ScopedIdentifier>,

    /// Declarations requested for variables that stay runtime-dependent.
    /// Drained by the block that owns the variable's scope; dropped if the
    /// variable turns out to have a known value after all.
    pub(crate) pending_declarations: Vec<(ScopedIdentifier, DataType)>,

    /// Statements a loop handler asks its parent block to insert in front
    /// of the loop (pre-loop re-materialisation for while loops).
    pub(crate) pending_statements: Vec<AstNode>,

    /// (current nesting level, deepest nesting level) while visiting
    /// For loops; bounds how many nested levels may unroll.
    pub(crate) loop_depth: (usize, usize),

    cancellation: Option<CancellationToken>,
}

impl ProgramTransformationPass {
    pub fn new(config: TransformConfig) -> Self {
        ProgramTransformationPass {
            scopes: ScopeTracker::new(),
            env: VariableEnvironment::new(),
            config,
            emitted_declarations: HashSet::new(),
            declarations_present: HashSet::new(),
            pending_declarations: vec![],
            pending_statements: vec![],
            loop_depth: (0, 0),
            cancellation: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Runs the pass over an AST rooted at a function. The tree is owned by
    /// the pass for the duration; on error nothing is handed back, so the
    /// caller never observes partial mutation.
    pub fn transform(&mut self, ast: Ast) -> Result<Ast, PassError> {
        let root = ast.into_root();
        if !matches!(root.kind(), NodeKind::FUNCTION { .. }) {
            return Err(InternalError::malformed(&root, "pass input must be rooted at a function").into());
        }

        let entry_depth = self.scopes.depth();
        let root = match self.visit_statement(root)? {
            StmtResult::Kept(root) => root,
            StmtResult::Removed => {
                return Err(InternalError::MalformedNode {
                    node_id: String::new(),
                    message: "the root function cannot be removed".to_string(),
                }.into());
            }
        };
        if self.scopes.depth() != entry_depth {
            return Err(InternalError::ScopeStackUnderflow.into());
        }
        Ok(Ast::new(root))
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub(crate) fn visit_expression(&mut self, node: AstNode) -> Result<AstNode, PassError> {
        let id = node.id();
        match node.into_kind() {
            NodeKind::LITERAL(literal) => Ok(AstNode::rebuilt(id, NodeKind::LITERAL(literal))),
            NodeKind::IDENTIFIER(name) => self.visit_identifier(id, name),
            NodeKind::BINARY_OP { op, lhs, rhs } => self.visit_binary_op(id, op, *lhs, *rhs),
            NodeKind::UNARY_OP { op, expression } => self.visit_unary_op(id, op, *expression),
            NodeKind::INDEX_ACCESS { target, index } => self.visit_index_access(id, *target, *index),
            NodeKind::EXPRESSION_LIST(items) => {
                let items = items.into_iter()
                    .map(|item| item.map(|node| self.visit_expression(node)).transpose())
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(AstNode::rebuilt(id, NodeKind::EXPRESSION_LIST(items)))
            }
            NodeKind::FUNC_CALL { function, arguments } => self.visit_call(id, *function, arguments),
            NodeKind::EXTERNAL_CALL { identifier, arguments } => {
                let arguments = arguments.into_iter()
                    .map(|argument| self.visit_expression(argument))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(AstNode::rebuilt(id, NodeKind::EXTERNAL_CALL { identifier, arguments }))
            }
            other => {
                let node = AstNode::rebuilt(id, other);
                Err(InternalError::malformed(&node, "statement visited in expression position").into())
            }
        }
    }

    /// If the environment has a value for the variable, the occurrence is
    /// replaced by a fresh copy of it. Runtime-dependent variables stay and
    /// are noted so their declaration can be re-materialised if it was
    /// absorbed.
    fn visit_identifier(&mut self, id: NodeId, name: String) -> Result<AstNode, PassError> {
        let scoped = self.scopes.resolve(&name)
            .map_err(|error| error.detailed(id, name.clone()).in_scopes(self.scopes.scope_chain()))?;
        let entry = self.env.get(&scoped)
            .ok_or_else(|| InternalError::missing_entry(&scoped.to_string()))?;

        match &entry.value {
            Some(value) => {
                trace!("substituting {} with its tracked value", scoped);
                Ok(value.clone_with_fresh_ids())
            }
            None => {
                let datatype = entry.datatype;
                self.note_residual_reference(&scoped, datatype);
                Ok(AstNode::rebuilt(id, NodeKind::IDENTIFIER(name)))
            }
        }
    }

    fn visit_binary_op(&mut self, id: NodeId, op: BinaryOperation, lhs: AstNode, rhs: AstNode) -> Result<AstNode, PassError> {
        let lhs = self.visit_expression(lhs)?;
        let rhs = self.visit_expression(rhs)?;

        // Integral division by zero would fault at runtime; the fold is
        // declined and the expression left for the runtime to report.
        let division = matches!(
            op.plaintext_equivalent(),
            BinaryOperation::DIV | BinaryOperation::MOD
        );
        if division && matches!(rhs.as_literal(), Some(Literal::INT(0))) {
            let node = AstNode::rebuilt(id, NodeKind::BINARY_OP {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
            warn!("declining to fold division by zero in '{}'", print_program(&node));
            return Ok(node);
        }

        if let (Some(lhs_literal), Some(rhs_literal)) = (lhs.as_literal(), rhs.as_literal()) {
            match folding::fold_binary(op, lhs_literal, rhs_literal) {
                Ok(Some(folded)) => return Ok(AstNode::literal(folded)),
                Ok(None) => {}
                Err(error) => {
                    let node = AstNode::rebuilt(id, NodeKind::BINARY_OP {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    });
                    let text = print_program(&node);
                    return Err(error.detailed(node.id(), text).in_scopes(self.scopes.scope_chain()).into());
                }
            }
        }

        Ok(AstNode::rebuilt(id, NodeKind::BINARY_OP {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }))
    }

    fn visit_unary_op(&mut self, id: NodeId, op: super::ast::UnaryOperation, expression: AstNode) -> Result<AstNode, PassError> {
        let expression = self.visit_expression(expression)?;
        if let Some(literal) = expression.as_literal() {
            if let Some(folded) = folding::fold_unary(op, literal) {
                return Ok(AstNode::literal(folded));
            }
        }
        Ok(AstNode::rebuilt(id, NodeKind::UNARY_OP {
            op,
            expression: Box::new(expression),
        }))
    }

    /// Resolves `v[i]` when the index is a compile-time integer and the
    /// target's value is an expression list with that slot present.
    fn visit_index_access(&mut self, id: NodeId, target: AstNode, index: AstNode) -> Result<AstNode, PassError> {
        let index = self.visit_expression(index)?;
        let target = self.visit_expression(target)?;

        if let Some(slot) = index.as_int_literal() {
            if slot >= 0 {
                let take_slot = if let NodeKind::EXPRESSION_LIST(items) = target.kind() {
                    let slot = slot as usize;
                    slot < items.len() && items[slot].is_some()
                } else {
                    false
                };
                if take_slot {
                    let slot = slot as usize;
                    let mut items = match target.into_kind() {
                        NodeKind::EXPRESSION_LIST(items) => items,
                        _ => unreachable!(),
                    };
                    if let Some(element) = items.swap_remove(slot) {
                        return Ok(element);
                    }
                    unreachable!("take_slot guarantees items[slot] is Some");
                }
            }
        }

        Ok(AstNode::rebuilt(id, NodeKind::INDEX_ACCESS {
            target: Box::new(target),
            index: Box::new(index),
        }))
    }

    /// Inlines a call when the callee is small, closed over its parameters,
    /// free of loops and external calls, and every statement of its body is
    /// absorbed. Otherwise the call stays with simplified arguments.
    fn visit_call(&mut self, id: NodeId, function: AstNode, arguments: Vec<AstNode>) -> Result<AstNode, PassError> {
        let arguments = arguments.into_iter()
            .map(|argument| self.visit_expression(argument))
            .collect::<Result<Vec<_>, _>>()?;

        let (parameters, body, callee_name) = match function.kind() {
            NodeKind::FUNCTION { parameters, body, identifier, .. } => {
                (parameters, body.as_ref(), identifier.clone())
            }
            _ => {
                let error = InternalError::malformed(&function, "call target is not a function");
                return Err(error.into());
            }
        };

        if parameters.len() != arguments.len() {
            let error = ProgramError::arity_mismatch(&callee_name, parameters.len(), arguments.len())
                .detailed(id, format!("{}(...)", callee_name))
                .in_scopes(self.scopes.scope_chain());
            return Err(error.into());
        }

        let eligible = function.count_descendants() <= self.config.inline_call_node_threshold
            && callee_is_inlineable(parameters, body);

        if eligible {
            if let Some(result) = self.try_inline_call(id, parameters, body, &arguments)? {
                trace!("inlined call to '{}'", callee_name);
                return Ok(result);
            }
        }

        Ok(AstNode::rebuilt(id, NodeKind::FUNC_CALL {
            function: Box::new(function),
            arguments,
        }))
    }

    /// Simulates the callee body in a fresh scope with parameters bound to
    /// the (already simplified) arguments. Succeeds only if every statement
    /// before the trailing return is absorbed.
    fn try_inline_call(
        &mut self,
        call_id: NodeId,
        parameters: &[AstNode],
        body: &AstNode,
        arguments: &[AstNode],
    ) -> Result<Option<AstNode>, PassError> {
        self.scopes.enter_scope(call_id);

        for (parameter, argument) in parameters.iter().zip(arguments) {
            if let NodeKind::PARAMETER { datatype, identifier } = parameter.kind() {
                let scoped = self.scopes.redeclare(identifier, parameter.id());
                self.env.put(scoped.clone(), TypedValue::known(*datatype, argument.clone_with_fresh_ids()));
                self.declarations_present.insert(scoped);
            }
        }

        let statements = match body.kind() {
            NodeKind::SCOPE_BLOCK(statements) => statements,
            _ => {
                self.scopes.exit_scope()?;
                return Ok(None);
            }
        };

        let mut result = None;
        for statement in statements {
            if let NodeKind::RETURN { expression: Some(_) } = statement.kind() {
                let expression = match statement.clone_with_fresh_ids().into_kind() {
                    NodeKind::RETURN { expression: Some(expression) } => *expression,
                    _ => unreachable!(),
                };
                result = Some(self.visit_expression(expression)?);
                break;
            }
            match self.visit_statement(statement.clone_with_fresh_ids())? {
                StmtResult::Removed => {}
                StmtResult::Kept(_) => {
                    // A residual statement cannot become part of an
                    // expression; give up on inlining this call.
                    self.scopes.exit_scope()?;
                    return Ok(None);
                }
            }
        }

        self.scopes.exit_scope()?;
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    pub(crate) fn visit_statement(&mut self, node: AstNode) -> Result<StmtResult, PassError> {
        let id = node.id();
        match node.into_kind() {
            NodeKind::VAR_DECLARATION { datatype, identifier, expression } => {
                self.visit_variable_declaration(id, datatype, identifier, expression.map(|e| *e))
            }
            NodeKind::ASSIGNMENT { target, expression } => {
                self.visit_assignment(id, *target, *expression)
            }
            NodeKind::SCOPE_BLOCK(statements) => self.visit_block(id, statements),
            NodeKind::BRANCH { condition, if_branch, else_branch } => {
                self.visit_branch(id, *condition, *if_branch, else_branch.map(|e| *e))
            }
            NodeKind::FOR_LOOP { initializer, condition, update, body } => {
                self.visit_for_loop(id, *initializer, *condition, *update, *body)
            }
            NodeKind::WHILE_LOOP { condition, body } => {
                self.visit_while_loop(id, *condition, *body)
            }
            NodeKind::RETURN { expression } => {
                let expression = expression
                    .map(|expression| self.visit_expression(*expression))
                    .transpose()?;
                Ok(StmtResult::Kept(AstNode::rebuilt(id, NodeKind::RETURN {
                    expression: expression.map(Box::new),
                })))
            }
            NodeKind::FUNCTION { return_type, identifier, parameters, body } => {
                self.visit_function(id, return_type, identifier, parameters, *body)
            }
            other => {
                let node = AstNode::rebuilt(id, other);
                Err(InternalError::malformed(&node, "expression visited in statement position").into())
            }
        }
    }

    /// Declarations are absorbed into the environment; the statement is
    /// removed and re-materialised later only where the value becomes
    /// runtime-dependent.
    fn visit_variable_declaration(
        &mut self,
        id: NodeId,
        datatype: DataType,
        identifier: String,
        expression: Option<AstNode>,
    ) -> Result<StmtResult, PassError> {
        let value = expression
            .map(|expression| self.visit_expression(expression))
            .transpose()?;

        let scoped = if self.emitted_declarations.contains(&id) {
            self.scopes.redeclare(&identifier, id)
        } else {
            self.scopes.declare(&identifier, id).map_err(|error| {
                let text = format!("{} {}", datatype, identifier);
                error.detailed(id, text).in_scopes(self.scopes.scope_chain())
            })?
        };

        trace!("absorbing declaration of {}", scoped);
        self.env.put(scoped, TypedValue { datatype, value });
        Ok(StmtResult::Removed)
    }

    fn visit_assignment(&mut self, id: NodeId, target: AstNode, expression: AstNode) -> Result<StmtResult, PassError> {
        let value = self.visit_expression(expression)?;
        let target_id = target.id();

        match target.into_kind() {
            NodeKind::IDENTIFIER(name) => {
                let scoped = self.scopes.resolve(&name)
                    .map_err(|error| error.detailed(target_id, name.clone()).in_scopes(self.scopes.scope_chain()))?;
                let datatype = self.env.get(&scoped)
                    .ok_or_else(|| InternalError::missing_entry(&scoped.to_string()))?
                    .datatype;
                trace!("absorbing assignment to {}", scoped);
                self.env.put(scoped, TypedValue::known(datatype, value));
                Ok(StmtResult::Removed)
            }
            NodeKind::INDEX_ACCESS { target: inner, index } => {
                let index = self.visit_expression(*index)?;
                let inner_id = inner.id();
                match inner.into_kind() {
                    NodeKind::IDENTIFIER(name) => {
                        self.visit_indexed_assignment(id, inner_id, name, index, value)
                    }
                    other => {
                        // A non-variable indexed target is opaque to the
                        // engine; simplify children and keep the statement.
                        let inner = self.visit_expression(AstNode::rebuilt(inner_id, other))?;
                        Ok(StmtResult::Kept(AstNode::rebuilt(id, NodeKind::ASSIGNMENT {
                            target: Box::new(AstNode::rebuilt(target_id, NodeKind::INDEX_ACCESS {
                                target: Box::new(inner),
                                index: Box::new(index),
                            })),
                            expression: Box::new(value),
                        })))
                    }
                }
            }
            other => {
                let node = AstNode::rebuilt(target_id, other);
                Err(InternalError::malformed(&node, "assignment target must be a variable or index access").into())
            }
        }
    }

    /// `v[i] = e` with a compile-time `i` updates the tracked expression
    /// list (growing it with absent slots as needed) and removes the
    /// statement. A runtime `i` keeps the statement and invalidates `v`.
    fn visit_indexed_assignment(
        &mut self,
        id: NodeId,
        target_id: NodeId,
        name: String,
        index: AstNode,
        value: AstNode,
    ) -> Result<StmtResult, PassError> {
        let scoped = self.scopes.resolve(&name)
            .map_err(|error| error.detailed(target_id, name.clone()).in_scopes(self.scopes.scope_chain()))?;
        let entry = self.env.get(&scoped)
            .ok_or_else(|| InternalError::missing_entry(&scoped.to_string()))?;
        let datatype = entry.datatype;

        let slot = match index.as_int_literal() {
            Some(slot) if slot >= 0 => Some(slot as usize),
            _ => None,
        };

        match slot {
            Some(slot) => {
                let mut items = match &entry.value {
                    Some(tracked) => match tracked.kind() {
                        NodeKind::EXPRESSION_LIST(items) => items.clone(),
                        _ => {
                            let error = ProgramError::type_mismatch("[]", &datatype.to_string(), "expression list")
                                .detailed(id, format!("{}[{}]", name, slot))
                                .in_scopes(self.scopes.scope_chain());
                            return Err(error.into());
                        }
                    },
                    None => vec![],
                };
                while items.len() <= slot {
                    items.push(None);
                }
                items[slot] = Some(value);
                trace!("absorbing indexed write {}[{}]", scoped, slot);
                self.env.put(scoped, TypedValue::known(
                    datatype,
                    AstNode::new(NodeKind::EXPRESSION_LIST(items)),
                ));
                Ok(StmtResult::Removed)
            }
            None => {
                // The written slot is unknown; every tracked fact about the
                // variable is stale from here on.
                self.env.invalidate(&scoped);
                self.note_residual_reference(&scoped, datatype);
                Ok(StmtResult::Kept(AstNode::rebuilt(id, NodeKind::ASSIGNMENT {
                    target: Box::new(AstNode::rebuilt(target_id, NodeKind::INDEX_ACCESS {
                        target: Box::new(AstNode::identifier(&name)),
                        index: Box::new(index),
                    })),
                    expression: Box::new(value),
                })))
            }
        }
    }

    fn visit_block(&mut self, id: NodeId, statements: Vec<AstNode>) -> Result<StmtResult, PassError> {
        self.scopes.enter_scope(id);

        let mut output = vec![];
        for statement in statements {
            let result = self.visit_statement(statement)?;
            self.drain_pending(&mut output);
            match result {
                StmtResult::Kept(node) if node.is_empty_block() => {}
                StmtResult::Kept(node) => output.push(node),
                StmtResult::Removed => {}
            }
            if let Some(token) = &self.cancellation {
                if token.is_cancelled() {
                    self.scopes.exit_scope()?;
                    return Err(PassError::Cancelled);
                }
            }
        }

        self.scopes.exit_scope()?;
        Ok(StmtResult::Kept(AstNode::rebuilt(id, NodeKind::SCOPE_BLOCK(output))))
    }

    /// Compile-time conditions select a branch outright. Runtime conditions
    /// are merged: each branch runs against its own copy of the environment
    /// and every variable the branches disagree on receives a multiplexed
    /// value, provided both branches were fully absorbed.
    fn visit_branch(
        &mut self,
        id: NodeId,
        condition: AstNode,
        if_branch: AstNode,
        else_branch: Option<AstNode>,
    ) -> Result<StmtResult, PassError> {
        let condition = self.visit_expression(condition)?;

        if let Some(truth) = condition.as_literal().and_then(Literal::truthiness) {
            return if truth {
                self.inline_taken_branch(if_branch)
            } else {
                match else_branch {
                    Some(else_branch) => self.inline_taken_branch(else_branch),
                    None => Ok(StmtResult::Removed),
                }
            };
        }

        let before = self.env.snapshot();

        let then_result = self.visit_statement(if_branch)?;
        let mut then_node = into_block(then_result);
        let env_then = self.env.snapshot();
        self.env.restore(before.snapshot());

        let (mut else_node, env_else) = match else_branch {
            Some(else_branch) => {
                let result = self.visit_statement(else_branch)?;
                let node = into_block(result);
                let env = self.env.snapshot();
                (Some(node), env)
            }
            None => (None, before.snapshot()),
        };
        self.env.restore(before.snapshot());

        let then_empty = then_node.is_empty_block();
        let else_empty = else_node.as_ref().map(|n| n.is_empty_block()).unwrap_or(true);

        if then_empty && else_empty {
            self.merge_branch_environments(&condition, &before, &env_then, &env_else);
            return Ok(StmtResult::Removed);
        }

        // Residual statements remain in at least one arm; the branch stays.
        // Writes that were absorbed while visiting an arm must become real
        // statements again at that arm's tail, and everything either arm
        // writes is runtime-dependent afterwards.
        let absorbed_then = self.branch_environment_diff(&before, &env_then);
        append_to_block(&mut then_node, ordered_assignments(absorbed_then.clone()));
        let absorbed_else = self.branch_environment_diff(&before, &env_else);
        if let Some(else_node) = &mut else_node {
            append_to_block(else_node, ordered_assignments(absorbed_else.clone()));
        }

        let mut written: Vec<(ScopedIdentifier, DataType)> = absorbed_then.into_iter()
            .chain(absorbed_else)
            .map(|(scoped, datatype, _)| (scoped, datatype))
            .collect();
        collect_assignment_targets(&then_node, &mut |name| {
            if let Ok(scoped) = self.scopes.resolve(name) {
                if let Some(entry) = self.env.get(&scoped) {
                    written.push((scoped.clone(), entry.datatype));
                }
            }
        });
        if let Some(else_node) = &else_node {
            collect_assignment_targets(else_node, &mut |name| {
                if let Ok(scoped) = self.scopes.resolve(name) {
                    if let Some(entry) = self.env.get(&scoped) {
                        written.push((scoped.clone(), entry.datatype));
                    }
                }
            });
        }
        written.sort_by(|a, b| a.0.name.cmp(&b.0.name).then(a.0.scope.cmp(&b.0.scope)));
        written.dedup_by(|a, b| a.0 == b.0);

        // The pre-branch values of partially written variables must be
        // observable on the path that skips the write; the parent block
        // inserts these assignments in front of the branch.
        let pre_branch: Vec<(ScopedIdentifier, DataType, AstNode)> = written.iter()
            .filter_map(|(scoped, datatype)| {
                let value = before.get(scoped)?.value.as_ref()?;
                Some((scoped.clone(), *datatype, value.clone()))
            })
            .collect();
        self.pending_statements.extend(ordered_assignments(pre_branch));

        for (scoped, datatype) in written {
            self.env.invalidate(&scoped);
            self.note_residual_reference(&scoped, datatype);
        }

        Ok(StmtResult::Kept(AstNode::rebuilt(id, NodeKind::BRANCH {
            condition: Box::new(condition),
            if_branch: Box::new(then_node),
            else_branch: else_node.map(Box::new),
        })))
    }

    /// The outer-scope variables whose tracked value an arm changed to a
    /// known expression, together with that expression.
    fn branch_environment_diff(
        &self,
        before: &VariableEnvironment,
        after: &VariableEnvironment,
    ) -> Vec<(ScopedIdentifier, DataType, AstNode)> {
        let mut diff: Vec<(ScopedIdentifier, DataType, AstNode)> = vec![];
        for (scoped, entry) in after.iter() {
            if !self.scopes.is_active(scoped.scope) {
                continue;
            }
            let previous = before.get(scoped).and_then(|e| e.value.as_ref());
            if value_eq(entry.value.as_ref(), previous) {
                continue;
            }
            if let Some(value) = &entry.value {
                diff.push((scoped.clone(), entry.datatype, value.clone()));
            }
        }
        diff.sort_by(|a, b| a.0.name.cmp(&b.0.name).then(a.0.scope.cmp(&b.0.scope)));
        diff
    }

    fn inline_taken_branch(&mut self, branch: AstNode) -> Result<StmtResult, PassError> {
        let result = self.visit_statement(branch)?;
        let node = into_block(result);
        if node.is_empty_block() {
            Ok(StmtResult::Removed)
        } else {
            Ok(StmtResult::Kept(node))
        }
    }

    /// For every outer variable the two branch environments disagree on,
    /// synthesises `cond*then + (1 - cond)*else`, with the vanishing product
    /// dropped when one side is the type's zero.
    fn merge_branch_environments(
        &mut self,
        condition: &AstNode,
        before: &VariableEnvironment,
        env_then: &VariableEnvironment,
        env_else: &VariableEnvironment,
    ) {
        let mut variables: Vec<ScopedIdentifier> = env_then.iter()
            .chain(env_else.iter())
            .map(|(scoped, _)| scoped.clone())
            .filter(|scoped| self.scopes.is_active(scoped.scope))
            .collect();
        variables.sort();
        variables.dedup();

        for scoped in variables {
            let previous = before.get(&scoped).and_then(|entry| entry.value.as_ref());
            let then_value = env_then.get(&scoped).and_then(|entry| entry.value.as_ref());
            let else_value = env_else.get(&scoped).and_then(|entry| entry.value.as_ref());
            let datatype = match env_then.get(&scoped).or_else(|| env_else.get(&scoped)) {
                Some(entry) => entry.datatype,
                None => continue,
            };

            if value_eq(then_value, previous) && value_eq(else_value, previous) {
                continue;
            }
            if value_eq(then_value, else_value) {
                let value = then_value.map(|value| value.clone());
                self.env.put(scoped, TypedValue { datatype, value });
                continue;
            }
            match (then_value, else_value) {
                (Some(then_value), Some(else_value)) => {
                    let merged = build_multiplexer(condition, then_value, else_value, datatype);
                    trace!("multiplexing branch-dependent value of {}", scoped);
                    self.env.put(scoped, TypedValue::known(datatype, merged));
                }
                _ => {
                    self.env.invalidate(&scoped);
                }
            }
        }
    }

    fn visit_function(
        &mut self,
        id: NodeId,
        return_type: DataType,
        identifier: String,
        parameters: Vec<AstNode>,
        body: AstNode,
    ) -> Result<StmtResult, PassError> {
        self.scopes.enter_scope(id);

        for parameter in &parameters {
            if let NodeKind::PARAMETER { datatype, identifier } = parameter.kind() {
                let scoped = self.scopes.declare(identifier, parameter.id()).map_err(|error| {
                    let text = format!("{} {}", datatype, identifier);
                    error.detailed(parameter.id(), text).in_scopes(self.scopes.scope_chain())
                })?;
                self.env.put(scoped.clone(), TypedValue::unknown(*datatype));
                self.declarations_present.insert(scoped);
            }
        }

        let body_result = self.visit_statement(body)?;
        let body = into_block(body_result);

        self.scopes.exit_scope()?;
        Ok(StmtResult::Kept(AstNode::rebuilt(id, NodeKind::FUNCTION {
            return_type,
            identifier,
            parameters,
            body: Box::new(body),
        })))
    }

    // ------------------------------------------------------------------
    // Re-materialisation bookkeeping
    // ------------------------------------------------------------------

    /// Records that a runtime-dependent variable is referenced by the
    /// residual program. If its declaration was absorbed, the block owning
    /// its scope re-emits one, unless the variable turns out to have a
    /// tracked value again by the time that block drains its requests.
    pub(crate) fn note_residual_reference(&mut self, scoped: &ScopedIdentifier, datatype: DataType) {
        if self.declarations_present.contains(scoped) {
            return;
        }
        self.declarations_present.insert(scoped.clone());
        self.pending_declarations.push((scoped.clone(), datatype));
    }

    /// Inserts requested declarations (for this block's scope) and pre-loop
    /// statements in front of the statement that raised them.
    pub(crate) fn drain_pending(&mut self, output: &mut Vec<AstNode>) {
        let current = self.scopes.current_scope();

        let pending = std::mem::take(&mut self.pending_declarations);
        for (scoped, datatype) in pending {
            if scoped.scope != current {
                self.pending_declarations.push((scoped, datatype));
                continue;
            }
            let still_unknown = self.env.get(&scoped)
                .map(|entry| entry.value.is_none())
                .unwrap_or(false);
            if still_unknown {
                let declaration = AstNode::new(NodeKind::VAR_DECLARATION {
                    datatype,
                    identifier: scoped.name.clone(),
                    expression: None,
                });
                self.emitted_declarations.insert(declaration.id());
                self.scopes.redeclare(&scoped.name, declaration.id());
                trace!("re-materialising declaration of {}", scoped);
                output.push(declaration);
            } else {
                // The variable has a known value after all; no declaration
                // is needed and a later region may request one again.
                self.declarations_present.remove(&scoped);
            }
        }

        output.append(&mut self.pending_statements);
    }

    /// Builds the CFG for a loop subtree and answers the two variable sets
    /// the loop pipeline needs, filtered to scopes visible at the loop.
    pub(crate) fn loop_variable_sets(&mut self, loop_node: &AstNode) -> Result<(Vec<ScopedIdentifier>, Vec<ScopedIdentifier>), PassError> {
        let graph = ControlFlowGraph::build(loop_node, &mut self.scopes)?;

        let mut read_and_written: Vec<ScopedIdentifier> = graph.read_and_written()
            .into_iter()
            .filter(|scoped| self.scopes.is_active(scoped.scope))
            .collect();
        read_and_written.sort_by(|a, b| a.name.cmp(&b.name).then(a.scope.cmp(&b.scope)));

        let mut written: Vec<ScopedIdentifier> = graph.written()
            .into_iter()
            .filter(|scoped| self.scopes.is_active(scoped.scope))
            .collect();
        written.sort_by(|a, b| a.name.cmp(&b.name).then(a.scope.cmp(&b.scope)));

        Ok((read_and_written, written))
    }
}

/// The block a visited branch arm or body collapsed to.
pub(crate) fn into_block(result: StmtResult) -> AstNode {
    match result {
        StmtResult::Kept(node) => node,
        StmtResult::Removed => AstNode::empty_block(),
    }
}

/// A callee qualifies for inlining when it is closed over its parameters,
/// contains no loops or external calls, and returns exactly once, as its
/// last top-level statement.
fn callee_is_inlineable(parameters: &[AstNode], body: &AstNode) -> bool {
    let statements = match body.kind() {
        NodeKind::SCOPE_BLOCK(statements) => statements,
        _ => return false,
    };
    match statements.last() {
        Some(last) if matches!(last.kind(), NodeKind::RETURN { expression: Some(_) }) => {}
        _ => return false,
    }

    let mut return_count = 0;
    let mut has_opaque_construct = false;
    count_returns_and_opaque(body, &mut return_count, &mut has_opaque_construct);
    if return_count != 1 || has_opaque_construct {
        return false;
    }

    let mut bound: HashSet<String> = parameters.iter()
        .filter_map(|parameter| parameter.identifier_name().map(str::to_string))
        .collect();
    collect_declared_names(body, &mut bound);

    let mut closed = true;
    collect_free_names(body, &mut |name| {
        if !bound.contains(name) {
            closed = false;
        }
    });
    closed
}

fn count_returns_and_opaque(node: &AstNode, returns: &mut usize, opaque: &mut bool) {
    match node.kind() {
        NodeKind::RETURN { .. } => *returns += 1,
        NodeKind::FOR_LOOP { .. } | NodeKind::WHILE_LOOP { .. } | NodeKind::EXTERNAL_CALL { .. } => {
            *opaque = true;
        }
        _ => {}
    }
    for child in node.children() {
        count_returns_and_opaque(child, returns, opaque);
    }
}

fn collect_declared_names(node: &AstNode, names: &mut HashSet<String>) {
    if let NodeKind::VAR_DECLARATION { identifier, .. } = node.kind() {
        names.insert(identifier.clone());
    }
    for child in node.children() {
        collect_declared_names(child, names);
    }
}

/// Visits every identifier occurrence, skipping embedded callee definitions.
fn collect_free_names(node: &AstNode, record: &mut impl FnMut(&str)) {
    match node.kind() {
        NodeKind::IDENTIFIER(name) => record(name),
        NodeKind::FUNC_CALL { arguments, .. } => {
            for argument in arguments {
                collect_free_names(argument, record);
            }
        }
        _ => {
            for child in node.children() {
                collect_free_names(child, record);
            }
        }
    }
}

/// Emits one assignment per entry, ordered so that no assignment reads a
/// variable overwritten by an earlier one. Cyclically dependent values are
/// staged through temporaries first.
pub(crate) fn ordered_assignments(entries: Vec<(ScopedIdentifier, DataType, AstNode)>) -> Vec<AstNode> {
    struct Entry {
        scoped: ScopedIdentifier,
        datatype: DataType,
        value: AstNode,
        reads: HashSet<String>,
    }

    let mut entries: Vec<Entry> = entries.into_iter()
        .map(|(scoped, datatype, value)| {
            let mut reads = HashSet::new();
            collect_free_names(&value, &mut |name| {
                reads.insert(name.to_string());
            });
            Entry { scoped, datatype, value, reads }
        })
        .collect();

    let mut statements = vec![];
    loop {
        // Pick the first entry whose value does not read any other
        // still-pending target.
        let position = entries.iter().position(|candidate| {
            entries.iter().all(|other| {
                other.scoped == candidate.scoped || !candidate.reads.contains(&other.scoped.name)
            })
        });
        match position {
            Some(position) => {
                let entry = entries.remove(position);
                statements.push(AstNode::new(NodeKind::ASSIGNMENT {
                    target: Box::new(AstNode::identifier(&entry.scoped.name)),
                    expression: Box::new(entry.value.clone_with_fresh_ids()),
                }));
            }
            None => break,
        }
    }

    for entry in &entries {
        statements.push(AstNode::new(NodeKind::VAR_DECLARATION {
            datatype: entry.datatype,
            identifier: format!("__tmp_{}", entry.scoped.name),
            expression: Some(Box::new(entry.value.clone_with_fresh_ids())),
        }));
    }
    for entry in &entries {
        statements.push(AstNode::new(NodeKind::ASSIGNMENT {
            target: Box::new(AstNode::identifier(&entry.scoped.name)),
            expression: Box::new(AstNode::identifier(&format!("__tmp_{}", entry.scoped.name))),
        }));
    }

    statements
}

pub(crate) fn append_to_block(block: &mut AstNode, tail: Vec<AstNode>) {
    if let NodeKind::SCOPE_BLOCK(statements) = block.kind_mut() {
        statements.extend(tail);
    }
}

/// Structural comparison of two optional tracked values.
pub(crate) fn value_eq(a: Option<&AstNode>, b: Option<&AstNode>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.structural_eq(b),
        (None, None) => true,
        _ => false,
    }
}

/// `cond*then + (1 - cond)*else`, with the vanishing side dropped when a
/// branch value is the type's zero.
fn build_multiplexer(condition: &AstNode, then_value: &AstNode, else_value: &AstNode, datatype: DataType) -> AstNode {
    let zero = datatype.primitive.zero_literal();
    let is_zero = |node: &AstNode| {
        match (node.as_literal(), &zero) {
            (Some(literal), Some(zero)) => literal == zero,
            _ => false,
        }
    };

    let then_term = || AstNode::binary(
        condition.clone_with_fresh_ids(),
        BinaryOperation::MUL,
        then_value.clone_with_fresh_ids(),
    );
    let else_term = || AstNode::binary(
        AstNode::binary(
            AstNode::literal(Literal::INT(1)),
            BinaryOperation::SUB,
            condition.clone_with_fresh_ids(),
        ),
        BinaryOperation::MUL,
        else_value.clone_with_fresh_ids(),
    );

    if is_zero(else_value) {
        then_term()
    } else if is_zero(then_value) {
        else_term()
    } else {
        AstNode::binary(then_term(), BinaryOperation::ADD, else_term())
    }
}

/// Names assigned to anywhere within a residual subtree.
fn collect_assignment_targets(node: &AstNode, record: &mut impl FnMut(&str)) {
    if let NodeKind::ASSIGNMENT { target, .. } = node.kind() {
        match target.kind() {
            NodeKind::IDENTIFIER(name) => record(name),
            NodeKind::INDEX_ACCESS { target: inner, .. } => {
                if let NodeKind::IDENTIFIER(name) = inner.kind() {
                    record(name);
                }
            }
            _ => {}
        }
    }
    for child in node.children() {
        collect_assignment_targets(child, record);
    }
}
