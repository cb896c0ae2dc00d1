use std::collections::{HashMap, HashSet, VecDeque};

use crate::optimizer::ast::{AstNode, NodeId, NodeKind, ScopeTracker, ScopedIdentifier};
use crate::optimizer::error::PassError;

/// How a variable was accessed within one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum VariableAccessType {
    READ,
    WRITE,
    READ_AND_WRITE,
}

impl VariableAccessType {
    fn merge(self, other: VariableAccessType) -> VariableAccessType {
        if self == other {
            self
        } else {
            VariableAccessType::READ_AND_WRITE
        }
    }

    fn reads(&self) -> bool {
        matches!(self, VariableAccessType::READ | VariableAccessType::READ_AND_WRITE)
    }

    fn writes(&self) -> bool {
        matches!(self, VariableAccessType::WRITE | VariableAccessType::READ_AND_WRITE)
    }
}

/// A node in the control/data flow graph, wrapping one statement (or one
/// condition) of the analysed subtree.
#[derive(Debug, Clone)]
pub struct GraphNode {
    statement: NodeId,
    accessed_variables: HashMap<ScopedIdentifier, VariableAccessType>,
}

impl GraphNode {
    pub fn statement(&self) -> NodeId {
        self.statement
    }

    pub fn accessed_variables(&self) -> &HashMap<ScopedIdentifier, VariableAccessType> {
        &self.accessed_variables
    }
}

/// Control- and data-flow graph of a statement subtree.
///
/// Control-flow edges follow the successor relation: both branch arms
/// converge at the join point, loops carry a back edge from the update
/// through the condition into the body. Data-flow edges run from the writer
/// of a variable to each subsequent reader until the next writer.
///
/// Building the graph does not mutate the AST. It borrows the engine's scope
/// tracker transiently so scoped identifiers agree with the engine's own
/// resolution; scope ids are derived from node ids, so walking the same
/// subtree twice lands in the same scopes.
#[derive(Debug)]
pub struct ControlFlowGraph {
    nodes: Vec<GraphNode>,
    successors: Vec<Vec<usize>>,
    data_flow_edges: Vec<(usize, usize, ScopedIdentifier)>,
}

impl ControlFlowGraph {
    pub fn build(subtree: &AstNode, scopes: &mut ScopeTracker) -> Result<ControlFlowGraph, PassError> {
        let mut builder = Builder {
            scopes,
            nodes: vec![],
            successors: vec![],
        };
        builder.statement(subtree, vec![])?;

        let mut graph = ControlFlowGraph {
            nodes: builder.nodes,
            successors: builder.successors,
            data_flow_edges: vec![],
        };
        graph.build_data_flow_edges();
        Ok(graph)
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// Scoped identifiers that are both read and written within the subtree,
    /// as witnessed by a write reaching a read along some control-flow path.
    pub fn read_and_written(&self) -> HashSet<ScopedIdentifier> {
        self.data_flow_edges.iter()
            .map(|(_, _, variable)| variable.clone())
            .collect()
    }

    /// Every scoped identifier written somewhere within the subtree.
    pub fn written(&self) -> HashSet<ScopedIdentifier> {
        let mut written = HashSet::new();
        for node in &self.nodes {
            for (variable, access) in &node.accessed_variables {
                if access.writes() {
                    written.insert(variable.clone());
                }
            }
        }
        written
    }

    /// Walks forward from every writer, recording an edge to each reader
    /// reached before the variable is written again.
    fn build_data_flow_edges(&mut self) {
        for writer in 0..self.nodes.len() {
            let written: Vec<ScopedIdentifier> = self.nodes[writer].accessed_variables.iter()
                .filter(|(_, access)| access.writes())
                .map(|(variable, _)| variable.clone())
                .collect();

            for variable in written {
                let mut visited = HashSet::new();
                let mut queue: VecDeque<usize> = self.successors[writer].iter().copied().collect();

                while let Some(current) = queue.pop_front() {
                    if !visited.insert(current) {
                        continue;
                    }
                    let access = self.nodes[current].accessed_variables.get(&variable).copied();
                    if access.map(|a| a.reads()).unwrap_or(false) {
                        self.data_flow_edges.push((writer, current, variable.clone()));
                    }
                    // A new write kills the chain.
                    if access.map(|a| a.writes()).unwrap_or(false) {
                        continue;
                    }
                    queue.extend(self.successors[current].iter().copied());
                }
            }
        }
    }
}

struct Builder<'a> {
    scopes: &'a mut ScopeTracker,
    nodes: Vec<GraphNode>,
    successors: Vec<Vec<usize>>,
}

impl<'a> Builder<'a> {
    /// Adds a graph node for one statement and wires the incoming frontier
    /// to it. Returns the node's index.
    fn add_node(&mut self, statement: NodeId, accessed: HashMap<ScopedIdentifier, VariableAccessType>, frontier: &[usize]) -> usize {
        let index = self.nodes.len();
        self.nodes.push(GraphNode { statement, accessed_variables: accessed });
        self.successors.push(vec![]);
        for &from in frontier {
            self.successors[from].push(index);
        }
        index
    }

    fn link(&mut self, from: usize, to: usize) {
        self.successors[from].push(to);
    }

    /// Walks one statement. `frontier` is the set of nodes control can fall
    /// through from; the return value is the frontier after the statement.
    fn statement(&mut self, node: &AstNode, frontier: Vec<usize>) -> Result<Vec<usize>, PassError> {
        match node.kind() {
            NodeKind::VAR_DECLARATION { identifier, expression, .. } => {
                let mut accessed = HashMap::new();
                if let Some(expression) = expression {
                    self.expression_reads(expression, &mut accessed)?;
                }
                let scoped = self.scopes.declare(identifier, node.id())
                    .map_err(|error| error.at(node).in_scopes(self.scopes.scope_chain()))?;
                record(&mut accessed, scoped, VariableAccessType::WRITE);
                Ok(vec![self.add_node(node.id(), accessed, &frontier)])
            }
            NodeKind::ASSIGNMENT { target, expression } => {
                let mut accessed = HashMap::new();
                self.expression_reads(expression, &mut accessed)?;
                match target.kind() {
                    NodeKind::IDENTIFIER(name) => {
                        let scoped = self.scopes.resolve(name)
                            .map_err(|error| error.at(node).in_scopes(self.scopes.scope_chain()))?;
                        record(&mut accessed, scoped, VariableAccessType::WRITE);
                    }
                    NodeKind::INDEX_ACCESS { target: inner, index } => {
                        self.expression_reads(index, &mut accessed)?;
                        if let NodeKind::IDENTIFIER(name) = inner.kind() {
                            let scoped = self.scopes.resolve(name)
                                .map_err(|error| error.at(node).in_scopes(self.scopes.scope_chain()))?;
                            record(&mut accessed, scoped, VariableAccessType::WRITE);
                        }
                    }
                    _ => {}
                }
                Ok(vec![self.add_node(node.id(), accessed, &frontier)])
            }
            NodeKind::RETURN { expression } => {
                let mut accessed = HashMap::new();
                if let Some(expression) = expression {
                    self.expression_reads(expression, &mut accessed)?;
                }
                self.add_node(node.id(), accessed, &frontier);
                // Control does not fall through a return.
                Ok(vec![])
            }
            NodeKind::SCOPE_BLOCK(statements) => {
                self.scopes.enter_scope(node.id());
                let mut frontier = frontier;
                for statement in statements {
                    frontier = self.statement(statement, frontier)?;
                }
                self.scopes.exit_scope()?;
                Ok(frontier)
            }
            NodeKind::BRANCH { condition, if_branch, else_branch } => {
                let mut accessed = HashMap::new();
                self.expression_reads(condition, &mut accessed)?;
                let condition_node = self.add_node(node.id(), accessed, &frontier);

                let mut exits = self.statement(if_branch, vec![condition_node])?;
                match else_branch {
                    Some(else_branch) => {
                        exits.extend(self.statement(else_branch, vec![condition_node])?);
                    }
                    None => exits.push(condition_node),
                }
                Ok(exits)
            }
            NodeKind::FOR_LOOP { initializer, condition, update, body } => {
                self.scopes.enter_scope(node.id());

                let mut frontier = frontier;
                if let NodeKind::SCOPE_BLOCK(statements) = initializer.kind() {
                    for statement in statements {
                        frontier = self.statement(statement, frontier)?;
                    }
                }

                let mut accessed = HashMap::new();
                self.expression_reads(condition, &mut accessed)?;
                let condition_node = self.add_node(node.id(), accessed, &frontier);

                let body_exits = self.statement(body, vec![condition_node])?;
                let mut update_exits = body_exits;
                if let NodeKind::SCOPE_BLOCK(statements) = update.kind() {
                    for statement in statements {
                        update_exits = self.statement(statement, update_exits)?;
                    }
                }
                for exit in update_exits {
                    self.link(exit, condition_node);
                }

                self.scopes.exit_scope()?;
                Ok(vec![condition_node])
            }
            NodeKind::WHILE_LOOP { condition, body } => {
                let mut accessed = HashMap::new();
                self.expression_reads(condition, &mut accessed)?;
                let condition_node = self.add_node(node.id(), accessed, &frontier);

                let body_exits = self.statement(body, vec![condition_node])?;
                for exit in body_exits {
                    self.link(exit, condition_node);
                }
                Ok(vec![condition_node])
            }
            NodeKind::FUNCTION { body, .. } => self.statement(body, frontier),
            // Anything else contributes no statement node of its own.
            _ => Ok(frontier),
        }
    }

    /// Collects the variables an expression reads. Embedded callee bodies are
    /// skipped: they execute in their own scope and cannot touch ours.
    fn expression_reads(&mut self, node: &AstNode, accessed: &mut HashMap<ScopedIdentifier, VariableAccessType>) -> Result<(), PassError> {
        match node.kind() {
            NodeKind::IDENTIFIER(name) => {
                let scoped = self.scopes.resolve(name)
                    .map_err(|error| error.at(node).in_scopes(self.scopes.scope_chain()))?;
                record(accessed, scoped, VariableAccessType::READ);
            }
            NodeKind::FUNC_CALL { arguments, .. } => {
                for argument in arguments {
                    self.expression_reads(argument, accessed)?;
                }
            }
            _ => {
                for child in node.children() {
                    self.expression_reads(child, accessed)?;
                }
            }
        }
        Ok(())
    }
}

fn record(
    accessed: &mut HashMap<ScopedIdentifier, VariableAccessType>,
    variable: ScopedIdentifier,
    access: VariableAccessType,
) {
    let merged = match accessed.get(&variable) {
        Some(existing) => existing.merge(access),
        None => access,
    };
    accessed.insert(variable, merged);
}
