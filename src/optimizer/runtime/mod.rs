//! Reference interpreter for the surface language.
//!
//! Not on any optimization path: the evaluator is the oracle that the
//! semantics-preservation and circuit-equivalence tests compare transformed
//! programs against.

pub mod evaluator;

pub use evaluator::{EvalError, Evaluator, Value};
