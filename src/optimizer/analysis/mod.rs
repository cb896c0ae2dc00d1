//! Control-flow and data-flow analysis over statement subtrees.
//!
//! The transformation engine asks one question of this module: which
//! variables are both read and written within a loop subtree. Those are the
//! iteration variables that must not be inlined while the loop body is
//! simplified.

pub mod control_flow_graph;

pub use control_flow_graph::{ControlFlowGraph, GraphNode, VariableAccessType};
