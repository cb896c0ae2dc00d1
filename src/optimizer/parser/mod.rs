use super::ast::Ast;

pub mod pest_moray_parser;

/// Parser handles interpretation of high-level tokens into the intermediate
/// representation. Put another way the parser turns a source string into an
/// abstract syntax tree.
pub trait AstParser {
    /// Creates a default configuration of an AstParser
    fn default() -> Self;

    /// Parse a source string into an Abstract Syntax Tree
    fn parse(&self, source: &str) -> Ast;
}

// Concrete Definition Export
pub use self::pest_moray_parser::PestMorayParser;
