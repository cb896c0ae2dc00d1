//! Renders an AST back to source text in the C-like surface syntax.
//!
//! The output is normalized: a single space around binary operators, one
//! statement per line, opening braces on the same line, four-space
//! indentation. Tests compare transformed programs through this printer, so
//! the normalization is part of the observable surface.

mod program_printer;

pub use program_printer::print_program;
