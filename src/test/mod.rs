//! Cross-module tests: end-to-end transformation scenarios, loop unrolling
//! behaviour, cone rewriting equivalence, and property-based checks.

mod loop_unrolling;
mod properties;
mod transform_scenarios;

use crate::optimizer::parser::AstParser;
use crate::optimizer::{Ast, Optimizer, PestMorayParser, TransformConfig};

pub(crate) fn parse(source: &str) -> Ast {
    <PestMorayParser as AstParser>::default().parse(source)
}

pub(crate) fn optimize(source: &str) -> String {
    Optimizer::<PestMorayParser>::default()
        .optimize_str(source)
        .unwrap_or_else(|error| panic!("optimization failed:\n{}", error.diagnostic()))
}

pub(crate) fn optimize_with(source: &str, config: TransformConfig) -> String {
    Optimizer::<PestMorayParser>::default()
        .set_config(config)
        .optimize_str(source)
        .unwrap_or_else(|error| panic!("optimization failed:\n{}", error.diagnostic()))
}
