//! Multiplicative-depth minimization over boolean circuits.
//!
//! Implements the cone rewriting heuristic of Aubry et al. 2019 ("Faster
//! Homomorphic Encryption Is Not Enough: Improved Heuristic for
//! Multiplicative Depth Minimization of Boolean Circuits"): precompute
//! per-gate multiplicative depths, find reducible cones ending at critical
//! AND gates, select a node-disjoint subset, and rewrite each so the
//! critical input moves to a shallower position.

pub mod cone_rewriter;
pub mod depth_calculator;

pub use cone_rewriter::{apply_cone_rewriting, rewrite_multi_input_gate_to_binary_gates_chain, ConeRewriter};
pub use depth_calculator::MultiplicativeDepthCalculator;
