use thiserror::Error;

use super::ast::AstNode;
use super::printer::print_program;

/// User-visible errors caused by the input program. Fatal to the pass.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProgramError {
    #[error("unbound identifier '{identifier}'")]
    Unbound {
        identifier: String,
        node_id: String,
        source_text: String,
        scope_chain: Vec<String>,
    },

    #[error("redeclaration of '{identifier}'")]
    Redeclaration {
        identifier: String,
        node_id: String,
        source_text: String,
        scope_chain: Vec<String>,
    },

    #[error("type mismatch: cannot apply '{operator}' to {lhs_type} and {rhs_type}")]
    TypeMismatch {
        operator: String,
        lhs_type: String,
        rhs_type: String,
        node_id: String,
        source_text: String,
        scope_chain: Vec<String>,
    },

    #[error("arity mismatch: '{callee}' expects {expected} argument(s), got {actual}")]
    ArityMismatch {
        callee: String,
        expected: usize,
        actual: usize,
        node_id: String,
        source_text: String,
        scope_chain: Vec<String>,
    },
}

impl ProgramError {
    pub fn unbound(identifier: &str) -> Self {
        ProgramError::Unbound {
            identifier: identifier.to_string(),
            node_id: String::new(),
            source_text: String::new(),
            scope_chain: vec![],
        }
    }

    pub fn redeclaration(identifier: &str) -> Self {
        ProgramError::Redeclaration {
            identifier: identifier.to_string(),
            node_id: String::new(),
            source_text: String::new(),
            scope_chain: vec![],
        }
    }

    pub fn type_mismatch(operator: &str, lhs_type: &str, rhs_type: &str) -> Self {
        ProgramError::TypeMismatch {
            operator: operator.to_string(),
            lhs_type: lhs_type.to_string(),
            rhs_type: rhs_type.to_string(),
            node_id: String::new(),
            source_text: String::new(),
            scope_chain: vec![],
        }
    }

    pub fn arity_mismatch(callee: &str, expected: usize, actual: usize) -> Self {
        ProgramError::ArityMismatch {
            callee: callee.to_string(),
            expected,
            actual,
            node_id: String::new(),
            source_text: String::new(),
            scope_chain: vec![],
        }
    }

    /// Attaches the offending subtree: its unique id and its source
    /// representation, both reported in diagnostics.
    pub fn at(mut self, node: &AstNode) -> Self {
        let (id, text) = (node.id().to_string(), print_program(node));
        match &mut self {
            ProgramError::Unbound { node_id, source_text, .. }
            | ProgramError::Redeclaration { node_id, source_text, .. }
            | ProgramError::TypeMismatch { node_id, source_text, .. }
            | ProgramError::ArityMismatch { node_id, source_text, .. } => {
                *node_id = id;
                *source_text = text;
            }
        }
        self
    }

    /// Attaches the offending node's id and source fragment directly, for
    /// call sites that have already taken the node apart.
    pub fn detailed(mut self, id: super::ast::NodeId, text: String) -> Self {
        match &mut self {
            ProgramError::Unbound { node_id, source_text, .. }
            | ProgramError::Redeclaration { node_id, source_text, .. }
            | ProgramError::TypeMismatch { node_id, source_text, .. }
            | ProgramError::ArityMismatch { node_id, source_text, .. } => {
                *node_id = id.to_string();
                *source_text = text;
            }
        }
        self
    }

    /// Attaches the chain of enclosing scope openers active when the error
    /// was raised.
    pub fn in_scopes(mut self, chain: Vec<String>) -> Self {
        match &mut self {
            ProgramError::Unbound { scope_chain, .. }
            | ProgramError::Redeclaration { scope_chain, .. }
            | ProgramError::TypeMismatch { scope_chain, .. }
            | ProgramError::ArityMismatch { scope_chain, .. } => {
                *scope_chain = chain;
            }
        }
        self
    }

    fn parts(&self) -> (&str, &str, &[String]) {
        match self {
            ProgramError::Unbound { node_id, source_text, scope_chain, .. }
            | ProgramError::Redeclaration { node_id, source_text, scope_chain, .. }
            | ProgramError::TypeMismatch { node_id, source_text, scope_chain, .. }
            | ProgramError::ArityMismatch { node_id, source_text, scope_chain, .. } => {
                (node_id.as_str(), source_text.as_str(), scope_chain.as_slice())
            }
        }
    }
}

/// Assertion-class failures indicating engine bugs. Fatal; the pass aborts
/// without partial commit.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InternalError {
    #[error("scope stack underflow")]
    ScopeStackUnderflow,

    #[error("missing environment entry for resolved identifier '{identifier}'")]
    MissingEnvironmentEntry { identifier: String },

    #[error("malformed node {node_id}: {message}")]
    MalformedNode { node_id: String, message: String },
}

impl InternalError {
    pub fn missing_entry(identifier: &str) -> Self {
        InternalError::MissingEnvironmentEntry { identifier: identifier.to_string() }
    }

    pub fn malformed(node: &AstNode, message: &str) -> Self {
        InternalError::MalformedNode {
            node_id: node.id().to_string(),
            message: message.to_string(),
        }
    }
}

/// Everything that can abort a pass. `RuntimeFoldError`-class conditions
/// (division by zero in a foldable expression) are deliberately absent:
/// they are recovered locally at the folding site and only produce a
/// diagnostic.
#[derive(Error, Debug)]
pub enum PassError {
    #[error(transparent)]
    Program(#[from] ProgramError),

    #[error(transparent)]
    Internal(#[from] InternalError),

    #[error("pass cancelled")]
    Cancelled,
}

impl PassError {
    /// Renders the multi-line diagnostic reported to the user: the error
    /// kind, the offending node's id, its source representation, and the
    /// chain of enclosing scope openers.
    pub fn diagnostic(&self) -> String {
        match self {
            PassError::Program(error) => {
                let (node_id, source_text, scope_chain) = error.parts();
                let mut out = format!("{}\n", error);
                if !node_id.is_empty() {
                    out.push_str(&format!("  at node {}\n", node_id));
                }
                if !source_text.is_empty() {
                    out.push_str(&format!("  in: {}\n", source_text));
                }
                for (depth, scope) in scope_chain.iter().enumerate() {
                    out.push_str(&format!("  {}{}\n", "  ".repeat(depth), scope));
                }
                out
            }
            PassError::Internal(error) => format!("internal error: {}\n", error),
            PassError::Cancelled => "pass cancelled\n".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::ast::{AstNode, Literal};

    #[test]
    fn diagnostic_contains_kind_node_and_source() {
        let node = AstNode::literal(Literal::INT(7));
        let error = PassError::Program(
            ProgramError::unbound("x")
                .at(&node)
                .in_scopes(vec!["global".to_string(), "scope_n1".to_string()]),
        );
        let diagnostic = error.diagnostic();
        assert!(diagnostic.contains("unbound identifier 'x'"));
        assert!(diagnostic.contains(&node.id().to_string()));
        assert!(diagnostic.contains("7"));
        assert!(diagnostic.contains("global"));
    }
}
