//! Loop handling: simplification of For/While bodies against a blinded
//! environment, re-materialisation of loop variables, and speculative full
//! unrolling of For loops with rollback.

use log::debug;

use super::{append_to_block, into_block, ordered_assignments, ProgramTransformationPass, StmtResult};
use super::super::ast::{
    AstNode,
    Literal,
    NodeId,
    NodeKind,
    ScopeId,
    ScopedIdentifier,
};
use super::super::error::PassError;

impl ProgramTransformationPass {
    /// The For-loop pipeline: identify loop variables, absorb the
    /// initializer, re-materialise and blind the loop variables, simplify
    /// condition/body/update, re-emit per-iteration writes, then
    /// speculatively unroll and either commit the unrolled block or roll
    /// back to the simplified loop.
    pub(crate) fn visit_for_loop(
        &mut self,
        id: NodeId,
        initializer: AstNode,
        condition: AstNode,
        update: AstNode,
        body: AstNode,
    ) -> Result<StmtResult, PassError> {
        self.entered_for_loop();
        self.scopes.enter_scope(id);
        let for_scope = self.scopes.current_scope();

        // Loop-variable identification must see the loop before anything is
        // simplified away.
        let loop_node = AstNode::rebuilt(id, NodeKind::FOR_LOOP {
            initializer: Box::new(initializer),
            condition: Box::new(condition),
            update: Box::new(update),
            body: Box::new(body),
        });
        let (loop_variables, written) = self.loop_variable_sets(&loop_node)?;
        let (initializer, condition, update, body) = match loop_node.into_kind() {
            NodeKind::FOR_LOOP { initializer, condition, update, body } => {
                (*initializer, *condition, *update, *body)
            }
            _ => unreachable!(),
        };

        // Absorb the initializer. Its statements run in the loop scope
        // itself, not in a scope of their own.
        let mut initializer = self.visit_statements_in_place(initializer)?;

        // Re-materialise every variable the loop writes, so that blinding
        // the loop variables below (and re-emitting per-iteration writes at
        // the body tail) keeps the observable program state even when the
        // loop runs zero times.
        let written_targets = self.union_sorted(&written, &loop_variables);
        let mut rematerialized = vec![];
        for scoped in &written_targets {
            if let Some(statement) = self.materialize_loop_variable(scoped, for_scope) {
                rematerialized.push(statement);
            }
        }
        prepend_statements(&mut initializer, rematerialized);

        // Their initializer values must not be baked into the body: every
        // iteration sees different ones.
        for scoped in &loop_variables {
            self.env.invalidate(scoped);
        }

        // Simplify condition, body and update against the blinded
        // environment.
        let condition = self.visit_expression(condition)?;
        let body_result = self.visit_statement(body)?;
        let mut body = into_block(body_result);
        let update = self.visit_statements_in_place(update)?;

        // Absorbed writes must stay observable per iteration: re-emit them
        // at the tail of the body, then forget their (per-iteration) values.
        let tail_targets = written_targets;
        let tail = self.ordered_tail_assignments(&tail_targets);
        append_to_block(&mut body, tail);
        for scoped in &tail_targets {
            self.env.invalidate(scoped);
        }

        let mut committed: Option<Vec<AstNode>> = None;
        if self.is_unroll_allowed() {
            let env_snapshot = self.env.snapshot();
            let initializer_snapshot = initializer.clone();

            // Re-visiting the initializer loads the concrete loop-variable
            // values back into the environment.
            initializer = self.visit_statements_in_place(initializer)?;

            let mut unrolled = vec![];
            let mut iterations = 0usize;
            let mut condition_state = self.evaluate_condition(&condition)?;
            while condition_state == Some(true) && iterations < self.config.max_unroll_iterations {
                let body_result = self.visit_statement(body.clone_with_fresh_ids())?;
                if let StmtResult::Kept(node) = body_result {
                    splice_block(node, &mut unrolled);
                }
                let update_clone = self.visit_statements_in_place(update.clone_with_fresh_ids())?;
                splice_block(update_clone, &mut unrolled);

                condition_state = self.evaluate_condition(&condition)?;
                iterations += 1;
            }

            if condition_state == Some(false) {
                debug!("fully unrolled loop {} after {} iteration(s)", id, iterations);
                let mut statements = take_statements(initializer);
                initializer = AstNode::empty_block();
                statements.extend(unrolled);
                committed = Some(statements);
            } else {
                debug!(
                    "rolling back speculative unrolling of loop {} after {} iteration(s): {}",
                    id,
                    iterations,
                    if condition_state.is_none() { "condition is runtime-dependent" } else { "iteration cap reached" },
                );
                self.env.restore(env_snapshot);
                initializer = initializer_snapshot;
            }
        }

        // Declarations requested for variables of the loop's own scope
        // belong in front of the initializer (or the committed block).
        let mut front = vec![];
        self.drain_pending(&mut front);

        self.scopes.exit_scope()?;
        self.left_for_loop();

        match committed {
            Some(statements) => {
                let mut block = front;
                block.extend(statements);
                Ok(StmtResult::Kept(AstNode::new(NodeKind::SCOPE_BLOCK(block))))
            }
            None => {
                prepend_statements(&mut initializer, front);
                Ok(StmtResult::Kept(AstNode::rebuilt(id, NodeKind::FOR_LOOP {
                    initializer: Box::new(initializer),
                    condition: Box::new(condition),
                    update: Box::new(update),
                    body: Box::new(body),
                })))
            }
        }
    }

    /// While loops are never unrolled: the write set is re-materialised in
    /// front of the loop (through the parent block), blinded, and re-emitted
    /// at the body tail, exactly like the simplification half of the For
    /// pipeline.
    pub(crate) fn visit_while_loop(
        &mut self,
        id: NodeId,
        condition: AstNode,
        body: AstNode,
    ) -> Result<StmtResult, PassError> {
        let loop_node = AstNode::rebuilt(id, NodeKind::WHILE_LOOP {
            condition: Box::new(condition),
            body: Box::new(body),
        });
        let (loop_variables, written) = self.loop_variable_sets(&loop_node)?;
        let (condition, body) = match loop_node.into_kind() {
            NodeKind::WHILE_LOOP { condition, body } => (*condition, *body),
            _ => unreachable!(),
        };

        let targets = self.union_sorted(&written, &loop_variables);

        // The values absorbed before the loop must flow in through real
        // statements again; the parent block inserts these in front of us,
        // together with declarations for the targets they assign to.
        let pre_loop = self.ordered_tail_assignments(&targets);
        self.pending_statements.extend(pre_loop);
        for scoped in &targets {
            if let Some(entry) = self.env.get(scoped) {
                if entry.value.is_some() {
                    let datatype = entry.datatype;
                    self.note_residual_reference(scoped, datatype);
                }
            }
        }

        for scoped in &loop_variables {
            self.env.invalidate(scoped);
        }

        let condition = self.visit_expression(condition)?;
        let body_result = self.visit_statement(body)?;
        let mut body = into_block(body_result);

        let tail = self.ordered_tail_assignments(&targets);
        append_to_block(&mut body, tail);
        for scoped in &targets {
            self.env.invalidate(scoped);
        }

        Ok(StmtResult::Kept(AstNode::rebuilt(id, NodeKind::WHILE_LOOP {
            condition: Box::new(condition),
            body: Box::new(body),
        })))
    }

    /// Visits the statements of a loop-header block without opening a scope
    /// of its own; initializer and update statements live in the loop scope.
    pub(crate) fn visit_statements_in_place(&mut self, block: AstNode) -> Result<AstNode, PassError> {
        let id = block.id();
        match block.into_kind() {
            NodeKind::SCOPE_BLOCK(statements) => {
                let mut output = vec![];
                for statement in statements {
                    let result = self.visit_statement(statement)?;
                    self.drain_pending(&mut output);
                    match result {
                        StmtResult::Kept(node) if node.is_empty_block() => {}
                        StmtResult::Kept(node) => output.push(node),
                        StmtResult::Removed => {}
                    }
                }
                Ok(AstNode::rebuilt(id, NodeKind::SCOPE_BLOCK(output)))
            }
            other => {
                let result = self.visit_statement(AstNode::rebuilt(id, other))?;
                Ok(match result {
                    StmtResult::Kept(node) => AstNode::new(NodeKind::SCOPE_BLOCK(vec![node])),
                    StmtResult::Removed => AstNode::empty_block(),
                })
            }
        }
    }

    /// Restores one loop variable's observable state: a declaration when it
    /// belongs to the loop scope itself, an assignment otherwise. Variables
    /// without a tracked value need nothing.
    fn materialize_loop_variable(&mut self, scoped: &ScopedIdentifier, for_scope: ScopeId) -> Option<AstNode> {
        let entry = self.env.get(scoped)?;
        let value = entry.value.as_ref()?.clone_with_fresh_ids();
        let datatype = entry.datatype;

        if scoped.scope == for_scope {
            let declaration = AstNode::new(NodeKind::VAR_DECLARATION {
                datatype,
                identifier: scoped.name.clone(),
                expression: Some(Box::new(value)),
            });
            self.emitted_declarations.insert(declaration.id());
            self.declarations_present.insert(scoped.clone());
            self.scopes.redeclare(&scoped.name, declaration.id());
            Some(declaration)
        } else {
            // The assignment references a variable whose declaration was
            // absorbed; request its re-materialisation up front. The parent
            // block drops the request again should the loop unroll away.
            self.note_residual_reference(scoped, datatype);
            Some(AstNode::new(NodeKind::ASSIGNMENT {
                target: Box::new(AstNode::identifier(&scoped.name)),
                expression: Box::new(value),
            }))
        }
    }

    /// Re-emits one assignment per target that still has a tracked value.
    fn ordered_tail_assignments(&mut self, targets: &[ScopedIdentifier]) -> Vec<AstNode> {
        let entries = targets.iter()
            .filter_map(|scoped| {
                let entry = self.env.get(scoped)?;
                let value = entry.value.as_ref()?.clone();
                Some((scoped.clone(), entry.datatype, value))
            })
            .collect();
        ordered_assignments(entries)
    }

    /// Evaluates a copy of the loop condition against the current
    /// environment. `None` means the truth value is not compile-time known.
    fn evaluate_condition(&mut self, condition: &AstNode) -> Result<Option<bool>, PassError> {
        let evaluated = self.visit_expression(condition.clone_with_fresh_ids())?;
        Ok(evaluated.as_literal().and_then(Literal::truthiness))
    }

    fn union_sorted(&self, written: &[ScopedIdentifier], loop_variables: &[ScopedIdentifier]) -> Vec<ScopedIdentifier> {
        let mut union: Vec<ScopedIdentifier> = written.to_vec();
        for scoped in loop_variables {
            if !union.contains(scoped) {
                union.push(scoped.clone());
            }
        }
        union.sort_by(|a, b| a.name.cmp(&b.name).then(a.scope.cmp(&b.scope)));
        union
    }

    /// Tracks (current, deepest) For nesting. Only increase the maximum when
    /// descending from the current deepest level, so sibling loops do not
    /// inflate it.
    fn entered_for_loop(&mut self) {
        if self.loop_depth.0 == self.loop_depth.1 {
            self.loop_depth.1 += 1;
        }
        self.loop_depth.0 += 1;
    }

    fn left_for_loop(&mut self) {
        if self.loop_depth.0 == 1 {
            self.loop_depth = (0, 0);
        } else {
            self.loop_depth.0 -= 1;
        }
    }

    /// Unrolling is allowed as long as fewer than the configured number of
    /// nested levels sit below the current one.
    fn is_unroll_allowed(&self) -> bool {
        self.loop_depth.1 - self.loop_depth.0 < self.config.max_nested_unrollings
    }
}

fn prepend_statements(block: &mut AstNode, mut front: Vec<AstNode>) {
    if front.is_empty() {
        return;
    }
    if let NodeKind::SCOPE_BLOCK(statements) = block.kind_mut() {
        front.append(statements);
        *statements = front;
    }
}

fn take_statements(block: AstNode) -> Vec<AstNode> {
    let id = block.id();
    match block.into_kind() {
        NodeKind::SCOPE_BLOCK(statements) => statements,
        other => vec![AstNode::rebuilt(id, other)],
    }
}

fn splice_block(node: AstNode, output: &mut Vec<AstNode>) {
    let id = node.id();
    match node.into_kind() {
        NodeKind::SCOPE_BLOCK(statements) => output.extend(statements),
        other => output.push(AstNode::rebuilt(id, other)),
    }
}
