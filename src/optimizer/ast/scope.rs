use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use super::ast_node::NodeId;
use crate::optimizer::error::{InternalError, ProgramError};

/// Identifier of a lexical scope. Scope names are derived from the unique id
/// of the construct that opens them, so re-walking the same subtree (the
/// CFG builder, or a second visit of a loop initializer) deterministically
/// lands in the same scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ScopeId(u64);

impl ScopeId {
    /// The root scope enclosing the whole program.
    pub fn global() -> ScopeId {
        ScopeId(u64::MAX)
    }

    pub fn of(owner: NodeId) -> ScopeId {
        ScopeId(owner.as_u64())
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == ScopeId::global() {
            write!(f, "global")
        } else {
            write!(f, "scope_n{}", self.0)
        }
    }
}

/// A (scope, name) pair uniquely naming a variable across the program.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ScopedIdentifier {
    pub scope: ScopeId,
    pub name: String,
}

impl ScopedIdentifier {
    pub fn new(scope: ScopeId, name: &str) -> Self {
        ScopedIdentifier { scope, name: name.to_string() }
    }
}

impl fmt::Display for ScopedIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.scope, self.name)
    }
}

/// A single lexical region: parent link plus the identifiers declared in it.
/// Declarations remember the declaring node so that re-visiting the same
/// declaration (speculative unrolling re-visits loop initializers) is not
/// mistaken for a redeclaration.
#[derive(Debug, Clone)]
struct Scope {
    parent: Option<ScopeId>,
    declared: HashMap<String, NodeId>,
}

/// Tracks the scope tree and the currently active scope chain while walking
/// an AST recursively. Enter and exit must be balanced; the builder of the
/// control flow graph borrows this tracker transiently and walks the same
/// subtree, which is why scopes are reused rather than recreated.
#[derive(Debug, Clone)]
pub struct ScopeTracker {
    scopes: HashMap<ScopeId, Scope>,
    stack: Vec<ScopeId>,
}

impl ScopeTracker {
    pub fn new() -> Self {
        let mut scopes = HashMap::new();
        scopes.insert(ScopeId::global(), Scope { parent: None, declared: HashMap::new() });
        ScopeTracker {
            scopes,
            stack: vec![ScopeId::global()],
        }
    }

    pub fn current_scope(&self) -> ScopeId {
        // The stack always holds at least the global scope.
        *self.stack.last().unwrap_or(&ScopeId::global())
    }

    /// Pushes the scope owned by the given node, creating it on first entry.
    pub fn enter_scope(&mut self, owner: NodeId) {
        let id = ScopeId::of(owner);
        let parent = self.current_scope();
        self.scopes.entry(id).or_insert(Scope { parent: Some(parent), declared: HashMap::new() });
        self.stack.push(id);
    }

    /// Pops the current scope. The global scope can never be popped.
    pub fn exit_scope(&mut self) -> Result<(), InternalError> {
        if self.stack.len() <= 1 {
            return Err(InternalError::ScopeStackUnderflow);
        }
        self.stack.pop();
        Ok(())
    }

    /// Registers a declaration in the current scope. Shadowing an outer scope
    /// is permitted; a second, distinct declaration of the same name in the
    /// same scope is a redeclaration.
    pub fn declare(&mut self, name: &str, declaring_node: NodeId) -> Result<ScopedIdentifier, ProgramError> {
        let current = self.current_scope();
        let scope = self.scopes.get_mut(&current)
            .unwrap_or_else(|| panic!("Malformed scope stack: active scope {} unknown", current));

        match scope.declared.get(name) {
            Some(existing) if *existing != declaring_node => {
                Err(ProgramError::redeclaration(name))
            }
            _ => {
                scope.declared.insert(name.to_string(), declaring_node);
                Ok(ScopedIdentifier::new(current, name))
            }
        }
    }

    /// Replaces the declaring node recorded for a name in the current scope.
    /// Used when the engine itself re-materialises a declaration it absorbed.
    pub fn redeclare(&mut self, name: &str, declaring_node: NodeId) -> ScopedIdentifier {
        let current = self.current_scope();
        if let Some(scope) = self.scopes.get_mut(&current) {
            scope.declared.insert(name.to_string(), declaring_node);
        }
        ScopedIdentifier::new(current, name)
    }

    /// Innermost-first lookup along the active scope chain.
    pub fn resolve(&self, name: &str) -> Result<ScopedIdentifier, ProgramError> {
        let mut cursor = Some(self.current_scope());
        while let Some(id) = cursor {
            let scope = match self.scopes.get(&id) {
                Some(scope) => scope,
                None => break,
            };
            if scope.declared.contains_key(name) {
                return Ok(ScopedIdentifier::new(id, name));
            }
            cursor = scope.parent;
        }
        Err(ProgramError::unbound(name))
    }

    /// Whether a scope is on the active chain. Loop-variable identification
    /// uses this to drop variables declared inside inner regions of a loop.
    pub fn is_active(&self, scope: ScopeId) -> bool {
        self.stack.contains(&scope)
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Names of the active scope chain, outermost first. Reported alongside
    /// fatal diagnostics.
    pub fn scope_chain(&self) -> Vec<String> {
        self.stack.iter().map(|scope| scope.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_walks_outward_and_prefers_innermost() {
        let mut tracker = ScopeTracker::new();
        let outer_owner = NodeId::fresh();
        let inner_owner = NodeId::fresh();

        tracker.enter_scope(outer_owner);
        let outer_x = tracker.declare("x", NodeId::fresh()).unwrap();
        tracker.enter_scope(inner_owner);
        assert_eq!(tracker.resolve("x").unwrap(), outer_x);

        let inner_x = tracker.declare("x", NodeId::fresh()).unwrap();
        assert_eq!(tracker.resolve("x").unwrap(), inner_x);
        assert_ne!(outer_x, inner_x);

        tracker.exit_scope().unwrap();
        assert_eq!(tracker.resolve("x").unwrap(), outer_x);
    }

    #[test]
    fn redeclaration_in_same_scope_is_rejected() {
        let mut tracker = ScopeTracker::new();
        tracker.enter_scope(NodeId::fresh());
        tracker.declare("x", NodeId::fresh()).unwrap();
        assert!(tracker.declare("x", NodeId::fresh()).is_err());
    }

    #[test]
    fn revisiting_the_same_declaration_is_not_a_redeclaration() {
        let mut tracker = ScopeTracker::new();
        tracker.enter_scope(NodeId::fresh());
        let declaring_node = NodeId::fresh();
        tracker.declare("x", declaring_node).unwrap();
        assert!(tracker.declare("x", declaring_node).is_ok());
    }

    #[test]
    fn unbound_names_error() {
        let tracker = ScopeTracker::new();
        assert!(tracker.resolve("ghost").is_err());
    }

    #[test]
    fn global_scope_cannot_be_popped() {
        let mut tracker = ScopeTracker::new();
        assert!(tracker.exit_scope().is_err());
        tracker.enter_scope(NodeId::fresh());
        assert!(tracker.exit_scope().is_ok());
        assert!(tracker.exit_scope().is_err());
    }

    #[test]
    fn scope_ids_are_stable_across_re_entry() {
        let mut tracker = ScopeTracker::new();
        let owner = NodeId::fresh();
        tracker.enter_scope(owner);
        let first = tracker.current_scope();
        tracker.exit_scope().unwrap();
        tracker.enter_scope(owner);
        assert_eq!(tracker.current_scope(), first);
    }
}
